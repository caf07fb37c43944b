pub mod crypto;
pub mod env;
pub mod file;
pub mod paths;
