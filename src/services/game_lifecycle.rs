use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::errors::TransitionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Downloadable,
    Installable,
    Queued,
    Downloading,
    Installing,
    Installed,
    Updatable,
    Updating,
    Uninstalling,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Downloadable => "DOWNLOADABLE",
            LifecycleState::Installable => "INSTALLABLE",
            LifecycleState::Queued => "QUEUED",
            LifecycleState::Downloading => "DOWNLOADING",
            LifecycleState::Installing => "INSTALLING",
            LifecycleState::Installed => "INSTALLED",
            LifecycleState::Updatable => "UPDATABLE",
            LifecycleState::Updating => "UPDATING",
            LifecycleState::Uninstalling => "UNINSTALLING",
        }
    }

    /// States in which refresh requests are ignored.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            LifecycleState::Queued
                | LifecycleState::Downloading
                | LifecycleState::Installing
                | LifecycleState::Uninstalling
                | LifecycleState::Updating
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Acquisition {
    Install,
    Update,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    RequestDownload,
    RequestUpdate,
    RequestInstall { installer: PathBuf },
    DownloadProgress(u8),
    DownloadComplete { installer: PathBuf },
    DownloadFailed(String),
    Cancel,
    InstallSucceeded { install_dir: PathBuf },
    InstallFailed(String),
    UpdateFound(String),
    RequestUninstall,
    UninstallFinished,
    UninstallFailed(String),
    Refresh {
        installed_version: Option<String>,
        install_dir: Option<PathBuf>,
        installer: Option<PathBuf>,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::RequestDownload => "request_download",
            LifecycleEvent::RequestUpdate => "request_update",
            LifecycleEvent::RequestInstall { .. } => "request_install",
            LifecycleEvent::DownloadProgress(_) => "download_progress",
            LifecycleEvent::DownloadComplete { .. } => "download_complete",
            LifecycleEvent::DownloadFailed(_) => "download_failed",
            LifecycleEvent::Cancel => "cancel",
            LifecycleEvent::InstallSucceeded { .. } => "install_succeeded",
            LifecycleEvent::InstallFailed(_) => "install_failed",
            LifecycleEvent::UpdateFound(_) => "update_found",
            LifecycleEvent::RequestUninstall => "request_uninstall",
            LifecycleEvent::UninstallFinished => "uninstall_finished",
            LifecycleEvent::UninstallFailed(_) => "uninstall_failed",
            LifecycleEvent::Refresh { .. } => "refresh",
        }
    }
}

/// Per-game acquisition and install state.
///
/// `generation` changes whenever a new acquisition starts or one is
/// canceled, so callers can tell events of an abandoned acquisition apart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameLifecycle {
    pub state: LifecycleState,
    pub acquisition: Option<Acquisition>,
    pub generation: u64,
    pub progress: u8,
    pub installed_version: Option<String>,
    pub available_version: Option<String>,
    pub install_dir: Option<PathBuf>,
    pub installer: Option<PathBuf>,
    pub last_error: Option<String>,
}

impl Default for GameLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl GameLifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Downloadable,
            acquisition: None,
            generation: 0,
            progress: 0,
            installed_version: None,
            available_version: None,
            install_dir: None,
            installer: None,
            last_error: None,
        }
    }

    /// Initial state from what is already on disk.
    pub fn discovered(
        installed_version: Option<String>,
        install_dir: Option<PathBuf>,
        installer: Option<PathBuf>,
    ) -> Self {
        let state = if installed_version.is_some() {
            LifecycleState::Installed
        } else if installer.is_some() {
            LifecycleState::Installable
        } else {
            LifecycleState::Downloadable
        };
        Self {
            state,
            installed_version,
            install_dir,
            installer,
            ..Self::new()
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Applies `event`. Returns the new state when it changed, `None` when the
    /// event was accepted without a state change, and an error for a pair the
    /// machine does not define. A rejected event leaves `self` untouched.
    pub fn apply(&mut self, event: &LifecycleEvent) -> Result<Option<LifecycleState>, TransitionError> {
        use LifecycleEvent as E;
        use LifecycleState as S;

        let before = self.state;
        let mut next = self.clone();

        match (self.state, event) {
            (S::Downloadable | S::Installable, E::RequestDownload) => {
                next.begin_acquisition(Acquisition::Install);
            }
            (S::Updatable, E::RequestUpdate) => {
                next.begin_acquisition(Acquisition::Update);
            }
            (S::Installable, E::RequestInstall { installer }) => {
                next.state = S::Installing;
                next.acquisition = Some(Acquisition::Install);
                next.generation += 1;
                next.installer = Some(installer.clone());
                next.last_error = None;
            }
            (S::Queued | S::Downloading, E::DownloadProgress(percent)) => {
                next.state = S::Downloading;
                next.progress = (*percent).min(100);
            }
            (S::Queued | S::Downloading, E::DownloadComplete { installer }) => {
                next.progress = 100;
                next.installer = Some(installer.clone());
                next.state = match self.acquisition {
                    Some(Acquisition::Update) => S::Updating,
                    _ => S::Installing,
                };
            }
            (S::Queued | S::Downloading, E::Cancel) => {
                next.end_acquisition(None);
                next.generation += 1;
            }
            (S::Queued | S::Downloading, E::DownloadFailed(message)) => {
                next.end_acquisition(Some(message.clone()));
            }
            (S::Installing | S::Updating, E::InstallSucceeded { install_dir }) => {
                next.state = S::Installed;
                next.acquisition = None;
                next.install_dir = Some(install_dir.clone());
                next.installer = None;
                if let Some(version) = next.available_version.take() {
                    next.installed_version = Some(version);
                }
            }
            (S::Installing | S::Updating, E::InstallFailed(message)) => {
                next.end_acquisition(Some(message.clone()));
            }
            (S::Installed | S::Updatable, E::UpdateFound(version)) => {
                next.state = S::Updatable;
                next.available_version = Some(version.clone());
            }
            (S::Installed | S::Updatable, E::RequestUninstall) => {
                next.state = S::Uninstalling;
                next.last_error = None;
            }
            (S::Uninstalling, E::UninstallFinished) => {
                next.state = S::Downloadable;
                next.installed_version = None;
                next.available_version = None;
                next.install_dir = None;
            }
            (S::Uninstalling, E::UninstallFailed(message)) => {
                next.state = S::Installed;
                next.last_error = Some(message.clone());
            }
            (state, E::Refresh { .. }) if state.is_busy() => return Ok(None),
            (
                _,
                E::Refresh {
                    installed_version,
                    install_dir,
                    installer,
                },
            ) => {
                next.state = match installed_version {
                    Some(installed) => match next.available_version.as_deref() {
                        Some(available) if available != installed.as_str() => S::Updatable,
                        _ => S::Installed,
                    },
                    None if installer.is_some() => S::Installable,
                    None => S::Downloadable,
                };
                next.installed_version = installed_version.clone();
                next.install_dir = install_dir.clone();
                next.installer = installer.clone();
                if next.installed_version.is_none() {
                    next.available_version = None;
                }
            }
            (state, event) => {
                return Err(TransitionError::InvalidTransition {
                    state: state.to_string(),
                    event: event.name().to_string(),
                })
            }
        }

        *self = next;
        Ok((self.state != before).then_some(self.state))
    }

    fn begin_acquisition(&mut self, acquisition: Acquisition) {
        self.state = LifecycleState::Queued;
        self.acquisition = Some(acquisition);
        self.generation += 1;
        self.progress = 0;
        self.last_error = None;
    }

    fn end_acquisition(&mut self, error: Option<String>) {
        self.state = match self.acquisition {
            Some(Acquisition::Update) => LifecycleState::Updatable,
            _ => LifecycleState::Downloadable,
        };
        self.acquisition = None;
        self.progress = 0;
        self.last_error = error;
    }
}
