use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::services::manifest_service::DownloadManifest;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadState {
    Queued,
    Started,
    Progress,
    Completed,
    Failed,
    Canceled,
    Stopped,
    Paused,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::Queued => "QUEUED",
            DownloadState::Started => "STARTED",
            DownloadState::Progress => "PROGRESS",
            DownloadState::Completed => "COMPLETED",
            DownloadState::Failed => "FAILED",
            DownloadState::Canceled => "CANCELED",
            DownloadState::Stopped => "STOPPED",
            DownloadState::Paused => "PAUSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed
                | DownloadState::Failed
                | DownloadState::Canceled
                | DownloadState::Stopped
        )
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadKind {
    Game,
    Update,
    Dlc,
    Thumbnail,
    Icon,
}

impl DownloadKind {
    /// Small UI assets are drained by the asset queue, never the game queue.
    pub fn is_asset(&self) -> bool {
        matches!(self, DownloadKind::Thumbnail | DownloadKind::Icon)
    }
}

/// How an interrupted transfer should end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CancelTarget {
    /// Partial file is deleted.
    Canceled,
    /// Partial file is kept; the download is forgotten until enqueued again.
    Stopped,
    /// Partial file is kept and the download can be resumed.
    Paused,
}

impl CancelTarget {
    pub fn state(&self) -> DownloadState {
        match self {
            CancelTarget::Canceled => DownloadState::Canceled,
            CancelTarget::Stopped => DownloadState::Stopped,
            CancelTarget::Paused => DownloadState::Paused,
        }
    }
}

pub trait DownloadCallbacks: Send + Sync {
    fn on_progress(&self, _percent: u8) {}

    /// Called once the file is complete. Returning a not-found or archive error
    /// turns the completed transfer into a cancellation.
    fn on_finish(&self, path: &Path) -> Result<()>;

    fn on_cancel(&self) {}

    fn on_failure(&self, _message: &str) {}
}

pub(crate) type ProgressObserver = Arc<dyn Fn(&Path, u8) + Send + Sync>;

struct DownloadStatus {
    state: DownloadState,
    progress: u8,
    observers: Vec<(u64, ProgressObserver)>,
}

#[derive(Clone)]
pub struct Download {
    pub url: String,
    pub destination: PathBuf,
    pub expected_size: Option<u64>,
    pub kind: DownloadKind,
    pub game_id: Option<String>,
    pub group_index: usize,
    pub group_size: usize,
    pub manifest: Option<Arc<DownloadManifest>>,
    callbacks: Option<Arc<dyn DownloadCallbacks>>,
    status: Arc<Mutex<DownloadStatus>>,
}

impl Download {
    pub fn new(url: &str, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.to_string(),
            destination: destination.into(),
            expected_size: None,
            kind: DownloadKind::Game,
            game_id: None,
            group_index: 0,
            group_size: 1,
            manifest: None,
            callbacks: None,
            status: Arc::new(Mutex::new(DownloadStatus {
                state: DownloadState::Queued,
                progress: 0,
                observers: Vec::new(),
            })),
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_kind(mut self, kind: DownloadKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_game(mut self, game_id: &str) -> Self {
        self.game_id = Some(game_id.to_string());
        self
    }

    pub fn with_manifest(mut self, manifest: DownloadManifest) -> Self {
        if self.expected_size.is_none() {
            self.expected_size = Some(manifest.total_size);
        }
        self.manifest = Some(Arc::new(manifest));
        self
    }

    /// Hooks for this download. Inside a [`DownloadGroup`] they become the
    /// group's hooks, see [`DownloadGroup::new`].
    pub fn with_callbacks(mut self, callbacks: Arc<dyn DownloadCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn state(&self) -> DownloadState {
        self.lock().state
    }

    pub fn progress(&self) -> u8 {
        self.lock().progress
    }

    pub(crate) fn set_state(&self, state: DownloadState) {
        if state == DownloadState::Progress {
            return;
        }
        self.lock().state = state;
    }

    pub(crate) fn set_progress(&self, percent: u8) {
        let percent = percent.min(100);
        let observers: Vec<ProgressObserver> = {
            let mut status = self.lock();
            status.progress = percent;
            status.observers.iter().map(|(_, observer)| Arc::clone(observer)).collect()
        };
        for observer in observers {
            observer(&self.destination, percent);
        }
    }

    pub(crate) fn add_progress_observer(&self, id: u64, observer: ProgressObserver) {
        let mut status = self.lock();
        if status.observers.iter().any(|(existing, _)| *existing == id) {
            return;
        }
        status.observers.push((id, observer));
    }

    pub(crate) fn remove_progress_observer(&self, id: u64) {
        self.lock().observers.retain(|(existing, _)| *existing != id);
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        let status = self.lock();
        DownloadSnapshot {
            url: self.url.clone(),
            destination: self.destination.clone(),
            expected_size: self.expected_size,
            kind: self.kind,
            game_id: self.game_id.clone(),
            group_index: self.group_index,
            group_size: self.group_size,
            state: status.state,
            progress: status.progress,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DownloadStatus> {
        match self.status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PartialEq for Download {
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination
    }
}

impl Eq for Download {}

impl Hash for Download {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.destination.hash(state);
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("url", &self.url)
            .field("destination", &self.destination)
            .field("kind", &self.kind)
            .field("group", &format_args!("{}/{}", self.group_index + 1, self.group_size))
            .field("state", &self.state())
            .field("progress", &self.progress())
            .finish()
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSnapshot {
    pub url: String,
    pub destination: PathBuf,
    pub expected_size: Option<u64>,
    pub kind: DownloadKind,
    pub game_id: Option<String>,
    pub group_index: usize,
    pub group_size: usize,
    pub state: DownloadState,
    pub progress: u8,
}

/// The files of one package acquisition, downloaded in order and finished together.
#[derive(Clone)]
pub struct DownloadGroup {
    pub downloads: Vec<Download>,
    pub callbacks: Option<Arc<dyn DownloadCallbacks>>,
}

impl DownloadGroup {
    /// Hooks set on members move to the group: the first member carrying
    /// callbacks supplies the group's, any others are dropped with a warning.
    pub fn new(downloads: Vec<Download>) -> Self {
        let group_size = downloads.len();
        let mut callbacks: Option<Arc<dyn DownloadCallbacks>> = None;
        let downloads = downloads
            .into_iter()
            .enumerate()
            .map(|(index, mut download)| {
                download.group_index = index;
                download.group_size = group_size;
                if let Some(member_callbacks) = download.callbacks.take() {
                    if callbacks.is_none() {
                        callbacks = Some(member_callbacks);
                    } else {
                        tracing::warn!(
                            "member callbacks dropped in group path={} index={}",
                            download.destination.display(),
                            index
                        );
                    }
                }
                download
            })
            .collect();
        Self { downloads, callbacks }
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn DownloadCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }
}

impl From<Download> for DownloadGroup {
    fn from(download: Download) -> Self {
        DownloadGroup::new(vec![download])
    }
}

#[derive(Clone)]
pub struct DownloadEvent {
    pub state: DownloadState,
    pub download: Download,
    pub message: Option<String>,
}

impl fmt::Debug for DownloadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadEvent")
            .field("state", &self.state)
            .field("destination", &self.download.destination)
            .field("progress", &self.download.progress())
            .field("message", &self.message)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

pub trait DownloadListener: Send + Sync {
    fn on_event(&self, event: &DownloadEvent);
}

impl DownloadListener for mpsc::UnboundedSender<DownloadEvent> {
    fn on_event(&self, event: &DownloadEvent) {
        let _ = self.send(event.clone());
    }
}
