use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("Download corrupted, please retry: {0}")]
    Integrity(String),
    #[error("No download link: {0}")]
    NoDownloadLink(String),
    #[error("Not enough disk space: required {required} bytes, available {available} bytes")]
    NotEnoughSpace { required: u64, available: u64 },
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("Install error: {0}")]
    Install(#[from] InstallError),
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] TransitionError),
    #[error("Already downloading: {0}")]
    AlreadyDownloading(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl LauncherError {
    /// Errors raised by a finish hook that downgrade a completed transfer to a cancellation.
    pub fn is_cancellation_cause(&self) -> bool {
        match self {
            LauncherError::Io(err) => err.kind() == io::ErrorKind::NotFound,
            LauncherError::NotFound(_) | LauncherError::Archive(_) => true,
            LauncherError::Install(InstallError::CorruptedArchive(_)) => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("invalid xml: {0}")]
    Xml(String),
    #[error("unexpected root element <{0}>")]
    UnexpectedRoot(String),
    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("attribute '{attribute}' is not a valid number: {value}")]
    InvalidNumber {
        attribute: &'static str,
        value: String,
    },
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("invalid checksum '{0}'")]
    InvalidChecksum(String),
    #[error("chunk {id} starts at {found_from}, expected {expected_from}")]
    NonContiguousChunks {
        id: u32,
        expected_from: u64,
        found_from: u64,
    },
    #[error("declared total size {declared} does not match chunk sum {chunks}")]
    SizeMismatch { declared: u64, chunks: u64 },
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("installer archive is corrupted: {0}")]
    CorruptedArchive(String),
    #[error("not enough disk space to install: {0}")]
    NotEnoughSpace(String),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("installer exited with failure: {0}")]
    InstallerFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("event {event} is not valid in state {state}")]
    InvalidTransition { state: String, event: String },
    #[error("unknown game: {0}")]
    UnknownGame(String),
}

pub type Result<T> = std::result::Result<T, LauncherError>;
