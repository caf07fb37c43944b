pub mod discovery_service;
pub mod download;
pub mod download_manager;
pub mod game_lifecycle;
pub mod installer_queue;
pub mod lifecycle_service;
pub mod manifest_service;
pub mod progress_watcher;

pub use discovery_service::{Discovery, InstallDirDiscovery};
pub use download::{
    CancelTarget, Download, DownloadCallbacks, DownloadEvent, DownloadGroup, DownloadKind,
    DownloadListener, DownloadState, ListenerId,
};
pub use download_manager::DownloadManager;
pub use game_lifecycle::{GameLifecycle, LifecycleEvent, LifecycleState};
pub use installer_queue::{
    InstallExecutor, InstallOutcome, InstallRequest, InstallResult, InstallTask, InstallerQueue,
};
pub use lifecycle_service::{GameLifecycleService, LifecycleChange, LifecycleListener};
pub use manifest_service::DownloadManifest;
pub use progress_watcher::CombinedProgressWatcher;
