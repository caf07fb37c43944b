use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::config::InstallSettings;
use crate::errors::{InstallError, Result};
use crate::models::Game;

pub type InstallCallback = Arc<dyn Fn(InstallResult) + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallOutcome {
    #[serde(rename_all = "camelCase")]
    Success { install_dir: PathBuf },
    Failure { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    pub task_id: String,
    pub outcome: InstallOutcome,
}

impl InstallResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, InstallOutcome::Success { .. })
    }
}

#[derive(Clone, Debug)]
pub struct InstallRequest {
    pub game: Game,
    pub installer_path: PathBuf,
    pub language: String,
    pub install_dir: Option<PathBuf>,
    pub create_desktop_entry: bool,
}

/// Platform-specific install mechanics. Calls block until the operation ends.
pub trait InstallExecutor: Send + Sync {
    fn install(&self, request: &InstallRequest) -> std::result::Result<PathBuf, InstallError>;

    fn uninstall(&self, game: &Game, install_dir: &Path) -> std::result::Result<(), InstallError>;
}

/// One install job. A task cannot exist without its game and result callback.
#[derive(Clone)]
pub struct InstallTask {
    pub id: String,
    pub game: Game,
    pub installer_path: PathBuf,
    pub language: String,
    pub install_dir: Option<PathBuf>,
    pub keep_installers: bool,
    pub create_desktop_entry: bool,
    result_callback: InstallCallback,
}

impl InstallTask {
    pub fn new<F>(game: Game, installer_path: impl Into<PathBuf>, result_callback: F) -> Self
    where
        F: Fn(InstallResult) + Send + Sync + 'static,
    {
        let defaults = InstallSettings::default();
        Self {
            id: Uuid::new_v4().to_string(),
            game,
            installer_path: installer_path.into(),
            language: defaults.language,
            install_dir: None,
            keep_installers: defaults.keep_installers,
            create_desktop_entry: defaults.create_desktop_entry,
            result_callback: Arc::new(result_callback),
        }
    }

    pub fn with_settings(mut self, settings: &InstallSettings) -> Self {
        self.language = settings.language.clone();
        self.keep_installers = settings.keep_installers;
        self.create_desktop_entry = settings.create_desktop_entry;
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_install_dir(mut self, install_dir: impl Into<PathBuf>) -> Self {
        self.install_dir = Some(install_dir.into());
        self
    }

    pub fn keep_installers(mut self, keep: bool) -> Self {
        self.keep_installers = keep;
        self
    }

    pub fn create_desktop_entry(mut self, create: bool) -> Self {
        self.create_desktop_entry = create;
        self
    }

    pub fn request(&self) -> InstallRequest {
        InstallRequest {
            game: self.game.clone(),
            installer_path: self.installer_path.clone(),
            language: self.language.clone(),
            install_dir: self.install_dir.clone(),
            create_desktop_entry: self.create_desktop_entry,
        }
    }

    fn subscriber(&self) -> Subscriber {
        Subscriber {
            task_id: self.id.clone(),
            callback: Arc::clone(&self.result_callback),
        }
    }
}

impl PartialEq for InstallTask {
    fn eq(&self, other: &Self) -> bool {
        self.game.id == other.game.id && self.installer_path == other.installer_path
    }
}

impl Eq for InstallTask {}

impl fmt::Debug for InstallTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallTask")
            .field("id", &self.id)
            .field("game", &self.game.id)
            .field("installer_path", &self.installer_path)
            .field("language", &self.language)
            .field("install_dir", &self.install_dir)
            .field("keep_installers", &self.keep_installers)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallSubmission {
    Queued,
    /// An equal task was pending or running; the caller shares its result.
    Merged,
}

#[derive(Clone)]
struct Subscriber {
    task_id: String,
    callback: InstallCallback,
}

struct QueuedInstall {
    task: InstallTask,
    subscribers: Vec<Subscriber>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedInstall>,
    current: Option<QueuedInstall>,
    worker: Option<thread::JoinHandle<()>>,
}

struct QueueInner {
    executor: Arc<dyn InstallExecutor>,
    installers_root: PathBuf,
    state: Mutex<QueueState>,
    idle: Condvar,
}

/// Runs install tasks one at a time on a worker thread that exists only
/// while there is work. Installer cleanup never leaves `installers_root`.
#[derive(Clone)]
pub struct InstallerQueue {
    inner: Arc<QueueInner>,
}

impl InstallerQueue {
    pub fn new(executor: Arc<dyn InstallExecutor>, installers_root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                executor,
                installers_root: installers_root.into(),
                state: Mutex::new(QueueState::default()),
                idle: Condvar::new(),
            }),
        }
    }

    pub fn executor(&self) -> Arc<dyn InstallExecutor> {
        Arc::clone(&self.inner.executor)
    }

    pub fn put(&self, task: InstallTask) -> Result<InstallSubmission> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        let existing = state
            .current
            .iter_mut()
            .chain(state.pending.iter_mut())
            .find(|queued| queued.task == task);
        if let Some(queued) = existing {
            tracing::info!(
                "install already queued game={} installer={} merged_task={}",
                task.game.id,
                task.installer_path.display(),
                task.id
            );
            queued.subscribers.push(task.subscriber());
            return Ok(InstallSubmission::Merged);
        }

        tracing::info!(
            "install queued game={} installer={} task={}",
            task.game.id,
            task.installer_path.display(),
            task.id
        );
        state.pending.push_back(QueuedInstall {
            subscribers: vec![task.subscriber()],
            task,
        });

        if state.worker.is_none() {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name("installer-queue".to_string())
                .spawn(move || worker_loop(inner))?;
            state.worker = Some(handle);
        }
        Ok(InstallSubmission::Queued)
    }

    pub fn has_worker(&self) -> bool {
        self.inner.lock().worker.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Blocks until no task is pending or running and the worker has exited.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        loop {
            if state.worker.is_none() && state.pending.is_empty() && state.current.is_none() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.inner.idle.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn worker_loop(inner: Arc<QueueInner>) {
    loop {
        let task = {
            let mut state = inner.lock();
            match state.pending.pop_front() {
                Some(queued) => {
                    let task = queued.task.clone();
                    state.current = Some(queued);
                    task
                }
                None => {
                    state.worker = None;
                    inner.idle.notify_all();
                    return;
                }
            }
        };

        let outcome = run_install(inner.executor.as_ref(), &inner.installers_root, &task);

        let subscribers = inner
            .lock()
            .current
            .take()
            .map(|queued| queued.subscribers)
            .unwrap_or_default();
        for subscriber in subscribers {
            let result = InstallResult {
                task_id: subscriber.task_id,
                outcome: outcome.clone(),
            };
            let callback = subscriber.callback;
            if panic::catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                tracing::error!("install result callback panicked game={}", task.game.id);
            }
        }
    }
}

fn run_install(executor: &dyn InstallExecutor, installers_root: &Path, task: &InstallTask) -> InstallOutcome {
    tracing::info!(
        "install started game={} installer={} language={}",
        task.game.id,
        task.installer_path.display(),
        task.language
    );
    let request = task.request();
    let result = panic::catch_unwind(AssertUnwindSafe(|| executor.install(&request)));

    match result {
        Ok(Ok(install_dir)) => {
            tracing::info!(
                "install finished game={} dir={}",
                task.game.id,
                install_dir.display()
            );
            if !task.keep_installers {
                remove_installer_dir(installers_root, &task.installer_path);
            }
            InstallOutcome::Success { install_dir }
        }
        Ok(Err(err)) => {
            tracing::warn!("install failed game={} error={}", task.game.id, err);
            InstallOutcome::Failure {
                message: err.to_string(),
            }
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|value| value.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("installer panicked game={} reason={}", task.game.id, reason);
            InstallOutcome::Failure {
                message: format!("installer crashed: {}", reason),
            }
        }
    }
}

fn remove_installer_dir(installers_root: &Path, installer_path: &Path) {
    let Some(dir) = installer_path.parent() else {
        return;
    };
    let escapes = dir
        .components()
        .any(|component| matches!(component, Component::ParentDir));
    if escapes || dir == installers_root || !dir.starts_with(installers_root) {
        tracing::warn!(
            "installer dir outside installers root kept dir={} root={}",
            dir.display(),
            installers_root.display()
        );
        return;
    }
    match std::fs::remove_dir_all(dir) {
        Ok(()) => tracing::info!("removed installer dir={}", dir.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!("failed to remove installer dir={} error={}", dir.display(), err),
    }
}
