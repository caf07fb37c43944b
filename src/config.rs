use std::path::PathBuf;
use std::time::Duration;

use crate::utils::env::{read_env_bool, read_env_string, read_env_u64, read_env_usize};
use crate::utils::paths::{
    resolve_cache_dir, resolve_games_dir, resolve_installers_dir, resolve_log_dir, resolve_root_dir,
};

pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_MIN_RESUME_SIZE: u64 = 20 * 1024 * 1024;
const DEFAULT_ASSET_WORKERS: usize = 4;

#[derive(Clone, Debug)]
pub struct DownloadConfig {
    pub chunk_size: u64,
    pub min_resume_size: u64,
    pub verify_checksums: bool,
    pub keep_corrupt_files: bool,
    pub check_disk_space: bool,
    pub asset_workers: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub proxy: Option<String>,
    pub disable_system_proxy: bool,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_resume_size: DEFAULT_MIN_RESUME_SIZE,
            verify_checksums: true,
            keep_corrupt_files: false,
            check_disk_space: true,
            asset_workers: DEFAULT_ASSET_WORKERS,
            request_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(20),
            proxy: None,
            disable_system_proxy: false,
            user_agent: format!("launcher-pipeline/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DownloadConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: read_env_u64(
                "LAUNCHER_DOWNLOAD_CHUNK_BYTES",
                DEFAULT_CHUNK_SIZE,
                4 * 1024,
                64 * 1024 * 1024,
            ),
            min_resume_size: read_env_u64(
                "LAUNCHER_MIN_RESUME_BYTES",
                DEFAULT_MIN_RESUME_SIZE,
                0,
                u64::MAX,
            ),
            verify_checksums: read_env_bool("LAUNCHER_VERIFY_CHECKSUMS", true),
            keep_corrupt_files: read_env_bool("LAUNCHER_KEEP_CORRUPT_DOWNLOADS", false),
            check_disk_space: read_env_bool("LAUNCHER_CHECK_DISK_SPACE", true),
            asset_workers: read_env_usize("LAUNCHER_ASSET_WORKERS", DEFAULT_ASSET_WORKERS, 1, 16),
            request_timeout: Duration::from_secs(read_env_u64(
                "LAUNCHER_HTTP_TIMEOUT_SECONDS",
                600,
                60,
                7200,
            )),
            connect_timeout: Duration::from_secs(read_env_u64(
                "LAUNCHER_HTTP_CONNECT_TIMEOUT_SECONDS",
                20,
                5,
                120,
            )),
            proxy: read_env_string("LAUNCHER_PROXY"),
            disable_system_proxy: read_env_bool("LAUNCHER_DISABLE_SYSTEM_PROXY", false),
            user_agent: read_env_string("LAUNCHER_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InstallSettings {
    pub language: String,
    pub keep_installers: bool,
    pub create_desktop_entry: bool,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            keep_installers: false,
            create_desktop_entry: true,
        }
    }
}

impl InstallSettings {
    pub fn from_env() -> Self {
        Self {
            language: read_env_string("LAUNCHER_INSTALL_LANGUAGE").unwrap_or_else(|| "en".to_string()),
            keep_installers: read_env_bool("LAUNCHER_KEEP_INSTALLERS", false),
            create_desktop_entry: read_env_bool("LAUNCHER_CREATE_DESKTOP_ENTRY", true),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub root_dir: PathBuf,
    pub installers_dir: PathBuf,
    pub games_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    pub download: DownloadConfig,
    pub install: InstallSettings,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let root_dir = resolve_root_dir();
        Self::with_root(root_dir, DownloadConfig::from_env(), InstallSettings::from_env())
    }

    pub fn with_root(root_dir: PathBuf, download: DownloadConfig, install: InstallSettings) -> Self {
        Self {
            installers_dir: resolve_installers_dir(&root_dir),
            games_dir: resolve_games_dir(&root_dir),
            cache_dir: resolve_cache_dir(&root_dir),
            log_dir: resolve_log_dir(&root_dir),
            root_dir,
            download,
            install,
        }
    }
}
