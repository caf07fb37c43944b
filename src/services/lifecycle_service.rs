use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::InstallSettings;
use crate::errors::{LauncherError, Result, TransitionError};
use crate::models::{DiscoveredGame, Game, PackageFile};
use crate::services::discovery_service::{gameinfo_path, write_gameinfo, Discovery, GameInfo};
use crate::services::download::{
    CancelTarget, Download, DownloadCallbacks, DownloadGroup, DownloadKind,
};
use crate::services::download_manager::DownloadManager;
use crate::services::game_lifecycle::{GameLifecycle, LifecycleEvent, LifecycleState};
use crate::services::installer_queue::{InstallOutcome, InstallResult, InstallTask, InstallerQueue};
use crate::utils::file::{sanitize_folder_name, FileManager};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleChange {
    pub game_id: String,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub generation: u64,
    pub error: Option<String>,
}

pub trait LifecycleListener: Send + Sync {
    fn on_change(&self, change: &LifecycleChange);
}

impl LifecycleListener for mpsc::UnboundedSender<LifecycleChange> {
    fn on_change(&self, change: &LifecycleChange) {
        let _ = self.send(change.clone());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LifecycleListenerId(u64);

struct GameEntry {
    game: Game,
    lifecycle: GameLifecycle,
    downloads: Vec<Download>,
}

enum Applied {
    Stale,
    Accepted { game: Game, lifecycle: GameLifecycle },
}

struct ServiceInner {
    downloads: DownloadManager,
    installer_queue: InstallerQueue,
    file_manager: FileManager,
    settings: InstallSettings,
    games: Mutex<HashMap<String, GameEntry>>,
    listeners: Mutex<Vec<(LifecycleListenerId, Arc<dyn LifecycleListener>)>>,
    next_listener: AtomicU64,
}

/// Drives each known game through acquisition, install, update and
/// uninstall by feeding download and install outcomes into its
/// [`GameLifecycle`].
#[derive(Clone)]
pub struct GameLifecycleService {
    inner: Arc<ServiceInner>,
}

impl GameLifecycleService {
    pub fn new(
        downloads: DownloadManager,
        installer_queue: InstallerQueue,
        file_manager: FileManager,
        settings: InstallSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                downloads,
                installer_queue,
                file_manager,
                settings,
                games: Mutex::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub fn register_game(&self, game: Game) -> LifecycleState {
        let mut games = self.lock_games();
        games
            .entry(game.id.clone())
            .or_insert_with(|| GameEntry {
                game,
                lifecycle: GameLifecycle::new(),
                downloads: Vec::new(),
            })
            .lifecycle
            .state
    }

    /// Seeds or refreshes a game from on-disk state. Busy games are left alone.
    pub fn seed(&self, discovered: DiscoveredGame) -> Result<LifecycleState> {
        let game_id = discovered.game.id.clone();
        {
            let mut games = self.lock_games();
            if !games.contains_key(&game_id) {
                let lifecycle = GameLifecycle::discovered(
                    discovered.installed_version,
                    discovered.install_dir,
                    discovered.installer,
                );
                let state = lifecycle.state;
                games.insert(
                    game_id,
                    GameEntry {
                        game: discovered.game,
                        lifecycle,
                        downloads: Vec::new(),
                    },
                );
                return Ok(state);
            }
        }
        match self.apply_event(&game_id, None, &refresh_event(&discovered))? {
            Applied::Accepted { lifecycle, .. } => Ok(lifecycle.state),
            Applied::Stale => self.require_state(&game_id),
        }
    }

    pub fn discover(&self, discovery: &dyn Discovery, games: &[Game]) -> Result<usize> {
        let found = discovery.discover(games)?;
        let count = found.len();
        for discovered in found {
            self.seed(discovered)?;
        }
        tracing::info!("lifecycle seeded from disk games={}", count);
        Ok(count)
    }

    /// Re-reads on-disk state for one game. Returns `None` while the game is
    /// busy or when nothing changed.
    pub fn refresh(&self, game_id: &str, discovery: &dyn Discovery) -> Result<Option<LifecycleState>> {
        let game = {
            let games = self.lock_games();
            let entry = games
                .get(game_id)
                .ok_or_else(|| TransitionError::UnknownGame(game_id.to_string()))?;
            if entry.lifecycle.is_busy() {
                tracing::debug!(
                    "refresh ignored game={} state={}",
                    game_id,
                    entry.lifecycle.state
                );
                return Ok(None);
            }
            entry.game.clone()
        };

        let Some(discovered) = discovery.discover(std::slice::from_ref(&game))?.into_iter().next() else {
            return Ok(None);
        };
        let before = self.require_state(game_id)?;
        match self.apply_event(game_id, None, &refresh_event(&discovered))? {
            Applied::Accepted { lifecycle, .. } if lifecycle.state != before => Ok(Some(lifecycle.state)),
            _ => Ok(None),
        }
    }

    pub fn request_download(&self, game_id: &str, files: Vec<PackageFile>) -> Result<LifecycleState> {
        self.acquire(game_id, files, LifecycleEvent::RequestDownload, DownloadKind::Game)
    }

    pub fn request_update(&self, game_id: &str, files: Vec<PackageFile>) -> Result<LifecycleState> {
        self.acquire(game_id, files, LifecycleEvent::RequestUpdate, DownloadKind::Update)
    }

    /// Installs from an installer already on disk.
    pub fn request_install(&self, game_id: &str) -> Result<LifecycleState> {
        let installer = {
            let games = self.lock_games();
            let entry = games
                .get(game_id)
                .ok_or_else(|| TransitionError::UnknownGame(game_id.to_string()))?;
            entry
                .lifecycle
                .installer
                .clone()
                .filter(|path| path.is_file())
                .or_else(|| self.inner.file_manager.find_installer(&entry.game.slug))
                .ok_or_else(|| LauncherError::NotFound(format!("installer for game {}", game_id)))?
        };

        let event = LifecycleEvent::RequestInstall {
            installer: installer.clone(),
        };
        match self.apply_event(game_id, None, &event)? {
            Applied::Accepted { game, lifecycle } => {
                let state = lifecycle.state;
                self.submit_install(game, lifecycle, installer);
                Ok(state)
            }
            Applied::Stale => self.require_state(game_id),
        }
    }

    pub fn cancel(&self, game_id: &str) -> Result<LifecycleState> {
        let downloads = self
            .lock_games()
            .get(game_id)
            .map(|entry| entry.downloads.clone())
            .unwrap_or_default();
        let state = match self.apply_event(game_id, None, &LifecycleEvent::Cancel)? {
            Applied::Accepted { lifecycle, .. } => lifecycle.state,
            Applied::Stale => self.require_state(game_id)?,
        };
        for download in &downloads {
            self.inner.downloads.cancel(download, CancelTarget::Canceled);
        }
        tracing::info!("acquisition canceled game={} files={}", game_id, downloads.len());
        Ok(state)
    }

    pub async fn uninstall(&self, game_id: &str) -> Result<LifecycleState> {
        let (game, lifecycle) = match self.apply_event(game_id, None, &LifecycleEvent::RequestUninstall)? {
            Applied::Accepted { game, lifecycle } => (game, lifecycle),
            Applied::Stale => return self.require_state(game_id),
        };
        let install_dir = lifecycle
            .install_dir
            .clone()
            .unwrap_or_else(|| self.inner.file_manager.get_game_dir(&game.slug));
        let executor = self.inner.installer_queue.executor();

        tracing::info!("uninstall started game={} dir={}", game.id, install_dir.display());
        let outcome = tokio::task::spawn_blocking(move || executor.uninstall(&game, &install_dir)).await;
        let event = match outcome {
            Ok(Ok(())) => LifecycleEvent::UninstallFinished,
            Ok(Err(err)) => LifecycleEvent::UninstallFailed(err.to_string()),
            Err(err) => LifecycleEvent::UninstallFailed(format!("uninstall aborted: {}", err)),
        };
        if let LifecycleEvent::UninstallFailed(message) = &event {
            tracing::warn!("uninstall failed game={} error={}", game_id, message);
        }

        match self.apply_event(game_id, Some(lifecycle.generation), &event)? {
            Applied::Accepted { lifecycle, .. } => Ok(lifecycle.state),
            Applied::Stale => self.require_state(game_id),
        }
    }

    pub fn update_available(&self, game_id: &str, version: &str) -> Result<LifecycleState> {
        match self.apply_event(game_id, None, &LifecycleEvent::UpdateFound(version.to_string()))? {
            Applied::Accepted { lifecycle, .. } => Ok(lifecycle.state),
            Applied::Stale => self.require_state(game_id),
        }
    }

    /// Fetches the game's thumbnail into the cache unless it is already there.
    /// Runs outside the game queue.
    pub fn fetch_thumbnail(&self, game_id: &str, url: &str) -> Result<PathBuf> {
        if !self.lock_games().contains_key(game_id) {
            return Err(TransitionError::UnknownGame(game_id.to_string()).into());
        }
        let path = self.inner.file_manager.get_thumbnail_path(game_id);
        if path.is_file() {
            return Ok(path);
        }
        let download = Download::new(url, path.clone())
            .with_kind(DownloadKind::Thumbnail)
            .with_game(game_id);
        if !self.inner.downloads.download_now(download) {
            tracing::debug!("thumbnail already downloading game={}", game_id);
        }
        Ok(path)
    }

    pub fn state(&self, game_id: &str) -> Option<LifecycleState> {
        self.lock_games()
            .get(game_id)
            .map(|entry| entry.lifecycle.state)
    }

    pub fn snapshot(&self, game_id: &str) -> Option<GameLifecycle> {
        self.lock_games()
            .get(game_id)
            .map(|entry| entry.lifecycle.clone())
    }

    pub fn games(&self) -> Vec<(Game, GameLifecycle)> {
        let mut items: Vec<(Game, GameLifecycle)> = self
            .lock_games()
            .values()
            .map(|entry| (entry.game.clone(), entry.lifecycle.clone()))
            .collect();
        items.sort_by(|a, b| a.0.title.cmp(&b.0.title));
        items
    }

    pub fn add_listener<L>(&self, listener: L) -> LifecycleListenerId
    where
        L: LifecycleListener + 'static,
    {
        let id = LifecycleListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: LifecycleListenerId) {
        lock(&self.inner.listeners).retain(|(existing, _)| *existing != id);
    }

    fn acquire(
        &self,
        game_id: &str,
        files: Vec<PackageFile>,
        event: LifecycleEvent,
        kind: DownloadKind,
    ) -> Result<LifecycleState> {
        if files.is_empty() {
            return Err(LauncherError::NoDownloadLink(format!("no files for game {}", game_id)));
        }
        let (game, lifecycle) = match self.apply_event(game_id, None, &event)? {
            Applied::Accepted { game, lifecycle } => (game, lifecycle),
            Applied::Stale => return self.require_state(game_id),
        };

        let installer_dir = self.inner.file_manager.get_installer_dir(&game.slug);
        let downloads: Vec<Download> = files
            .into_iter()
            .map(|file| {
                let destination = installer_dir.join(sanitize_folder_name(&file.file_name));
                let mut download = Download::new(&file.url, destination)
                    .with_kind(kind)
                    .with_game(&game.id);
                if let Some(size) = file.size {
                    download = download.with_expected_size(size);
                }
                if let Some(manifest) = file.manifest {
                    download = download.with_manifest(manifest);
                }
                download
            })
            .collect();

        if let Some(entry) = self.lock_games().get_mut(game_id) {
            entry.downloads = downloads.clone();
        }

        let hooks = Arc::new(AcquisitionHooks {
            service: Arc::downgrade(&self.inner),
            game_id: game.id.clone(),
            generation: lifecycle.generation,
        });
        let group = DownloadGroup::new(downloads).with_callbacks(hooks);
        if !self.inner.downloads.enqueue_group(group) {
            let message = format!("download already in progress for game {}", game_id);
            self.apply_event(
                game_id,
                Some(lifecycle.generation),
                &LifecycleEvent::DownloadFailed(message.clone()),
            )?;
            return Err(LauncherError::AlreadyDownloading(message));
        }

        tracing::info!(
            "acquisition queued game={} kind={:?} generation={}",
            game.id,
            kind,
            lifecycle.generation
        );
        Ok(lifecycle.state)
    }

    fn submit_install(&self, game: Game, lifecycle: GameLifecycle, installer: PathBuf) {
        let generation = lifecycle.generation;
        let game_id = game.id.clone();
        let install_dir = lifecycle
            .install_dir
            .clone()
            .unwrap_or_else(|| self.inner.file_manager.get_game_dir(&game.slug));
        let weak = Arc::downgrade(&self.inner);
        let callback_game_id = game_id.clone();
        let task = InstallTask::new(game, installer, move |result| {
            if let Some(inner) = weak.upgrade() {
                GameLifecycleService { inner }.on_install_result(&callback_game_id, generation, result);
            }
        })
        .with_settings(&self.inner.settings)
        .with_install_dir(install_dir);

        if let Err(err) = self.inner.installer_queue.put(task) {
            tracing::error!("failed to queue install game={} error={}", game_id, err);
            let _ = self.apply_event(
                &game_id,
                Some(generation),
                &LifecycleEvent::InstallFailed(err.to_string()),
            );
        }
    }

    fn on_install_result(&self, game_id: &str, generation: u64, result: InstallResult) {
        let event = match result.outcome {
            InstallOutcome::Success { install_dir } => {
                self.record_install(game_id, &install_dir);
                LifecycleEvent::InstallSucceeded { install_dir }
            }
            InstallOutcome::Failure { message } => LifecycleEvent::InstallFailed(message),
        };
        if let Err(err) = self.apply_event(game_id, Some(generation), &event) {
            tracing::warn!("install result rejected game={} error={}", game_id, err);
        }
    }

    /// Writes `gameinfo` so later discovery sees the install.
    fn record_install(&self, game_id: &str, install_dir: &Path) {
        let Some((game, lifecycle)) = self
            .lock_games()
            .get(game_id)
            .map(|entry| (entry.game.clone(), entry.lifecycle.clone()))
        else {
            return;
        };
        let version = lifecycle.available_version.or(lifecycle.installed_version);
        if version.is_none() && gameinfo_path(install_dir).exists() {
            return;
        }
        let info = GameInfo {
            name: game.title,
            version: version.unwrap_or_else(|| "unknown".to_string()),
        };
        if let Err(err) = write_gameinfo(&self.inner.file_manager, install_dir, &info) {
            tracing::warn!("failed to write gameinfo game={} error={}", game_id, err);
        }
    }

    fn on_download_event(&self, game_id: &str, generation: u64, event: LifecycleEvent) {
        match self.apply_event(game_id, Some(generation), &event) {
            Ok(_) => {}
            Err(err) => tracing::debug!(
                "download event ignored game={} event={} error={}",
                game_id,
                event.name(),
                err
            ),
        }
    }

    fn on_download_complete(&self, game_id: &str, generation: u64, installer: &Path) {
        let event = LifecycleEvent::DownloadComplete {
            installer: installer.to_path_buf(),
        };
        match self.apply_event(game_id, Some(generation), &event) {
            Ok(Applied::Accepted { game, lifecycle }) => {
                self.submit_install(game, lifecycle, installer.to_path_buf())
            }
            Ok(Applied::Stale) => {}
            Err(err) => tracing::warn!("download completion ignored game={} error={}", game_id, err),
        }
    }

    fn apply_event(
        &self,
        game_id: &str,
        generation: Option<u64>,
        event: &LifecycleEvent,
    ) -> Result<Applied> {
        let (applied, change) = {
            let mut games = self.lock_games();
            let entry = games
                .get_mut(game_id)
                .ok_or_else(|| TransitionError::UnknownGame(game_id.to_string()))?;
            if let Some(expected) = generation {
                if expected != entry.lifecycle.generation {
                    tracing::debug!(
                        "stale lifecycle event dropped game={} event={} generation={} current={}",
                        game_id,
                        event.name(),
                        expected,
                        entry.lifecycle.generation
                    );
                    return Ok(Applied::Stale);
                }
            }

            let from = entry.lifecycle.state;
            let changed = entry.lifecycle.apply(event)?;
            let change = changed.map(|to| LifecycleChange {
                game_id: game_id.to_string(),
                from,
                to,
                generation: entry.lifecycle.generation,
                error: entry.lifecycle.last_error.clone(),
            });
            if matches!(
                entry.lifecycle.state,
                LifecycleState::Downloadable
                    | LifecycleState::Installable
                    | LifecycleState::Installed
                    | LifecycleState::Updatable
            ) {
                entry.downloads.clear();
            }
            (
                Applied::Accepted {
                    game: entry.game.clone(),
                    lifecycle: entry.lifecycle.clone(),
                },
                change,
            )
        };

        if let Some(change) = change {
            tracing::info!(
                "lifecycle game={} {} -> {} event={}",
                change.game_id,
                change.from,
                change.to,
                event.name()
            );
            self.notify(&change);
        }
        Ok(applied)
    }

    fn notify(&self, change: &LifecycleChange) {
        let listeners: Vec<Arc<dyn LifecycleListener>> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.on_change(change);
        }
    }

    fn require_state(&self, game_id: &str) -> Result<LifecycleState> {
        self.state(game_id)
            .ok_or_else(|| TransitionError::UnknownGame(game_id.to_string()).into())
    }

    fn lock_games(&self) -> MutexGuard<'_, HashMap<String, GameEntry>> {
        lock(&self.inner.games)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn refresh_event(discovered: &DiscoveredGame) -> LifecycleEvent {
    LifecycleEvent::Refresh {
        installed_version: discovered.installed_version.clone(),
        install_dir: discovered.install_dir.clone(),
        installer: discovered.installer.clone(),
    }
}

/// Download callbacks for one acquisition of one game.
struct AcquisitionHooks {
    service: Weak<ServiceInner>,
    game_id: String,
    generation: u64,
}

impl AcquisitionHooks {
    fn service(&self) -> Option<GameLifecycleService> {
        self.service
            .upgrade()
            .map(|inner| GameLifecycleService { inner })
    }
}

impl DownloadCallbacks for AcquisitionHooks {
    fn on_progress(&self, percent: u8) {
        if let Some(service) = self.service() {
            service.on_download_event(
                &self.game_id,
                self.generation,
                LifecycleEvent::DownloadProgress(percent),
            );
        }
    }

    fn on_finish(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(LauncherError::NotFound(path.display().to_string()));
        }
        if let Some(service) = self.service() {
            service.on_download_complete(&self.game_id, self.generation, path);
        }
        Ok(())
    }

    fn on_cancel(&self) {
        if let Some(service) = self.service() {
            service.on_download_event(&self.game_id, self.generation, LifecycleEvent::Cancel);
        }
    }

    fn on_failure(&self, message: &str) {
        if let Some(service) = self.service() {
            service.on_download_event(
                &self.game_id,
                self.generation,
                LifecycleEvent::DownloadFailed(message.to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadConfig;
    use crate::errors::InstallError;
    use crate::models::Platform;
    use crate::services::discovery_service::{read_gameinfo, InstallDirDiscovery};
    use crate::services::download::{DownloadEvent, DownloadState};
    use crate::services::installer_queue::{InstallExecutor, InstallRequest};
    use crate::test_support::TestServer;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingExecutor {
        installs: Mutex<Vec<InstallRequest>>,
        uninstalls: Mutex<Vec<PathBuf>>,
        fail_install: bool,
        fail_uninstall: bool,
    }

    impl InstallExecutor for RecordingExecutor {
        fn install(&self, request: &InstallRequest) -> std::result::Result<PathBuf, InstallError> {
            self.installs.lock().expect("installs").push(request.clone());
            if self.fail_install {
                return Err(InstallError::ExtractionFailed("unpack failed".to_string()));
            }
            let dir = request
                .install_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("/games/default"));
            std::fs::create_dir_all(&dir)?;
            Ok(dir)
        }

        fn uninstall(&self, _game: &Game, install_dir: &Path) -> std::result::Result<(), InstallError> {
            self.uninstalls.lock().expect("uninstalls").push(install_dir.to_path_buf());
            if self.fail_uninstall {
                return Err(InstallError::InstallerFailed("files in use".to_string()));
            }
            match std::fs::remove_dir_all(install_dir) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        }
    }

    struct Fixture {
        service: GameLifecycleService,
        executor: Arc<RecordingExecutor>,
        files: FileManager,
        changes: mpsc::UnboundedReceiver<LifecycleChange>,
    }

    fn fixture(executor: RecordingExecutor) -> Fixture {
        let root = std::env::temp_dir().join(format!("launcher-lifecycle-{}", Uuid::new_v4()));
        let files = FileManager::new(root.join("installers"), root.join("games"), root.join("cache"));
        let downloads = DownloadManager::new(DownloadConfig {
            chunk_size: 64,
            min_resume_size: 0,
            check_disk_space: false,
            disable_system_proxy: true,
            ..DownloadConfig::default()
        })
        .expect("download manager");
        let executor = Arc::new(executor);
        let service = GameLifecycleService::new(
            downloads,
            InstallerQueue::new(executor.clone(), files.installers_dir()),
            files.clone(),
            InstallSettings::default(),
        );
        let (tx, changes) = mpsc::unbounded_channel();
        service.add_listener(tx);
        Fixture {
            service,
            executor,
            files,
            changes,
        }
    }

    fn game(slug: &str) -> Game {
        Game::new(&format!("id-{slug}"), slug, &format!("Title {slug}"), Platform::Linux)
    }

    async fn wait_for(changes: &mut mpsc::UnboundedReceiver<LifecycleChange>, state: LifecycleState) -> Vec<LifecycleState> {
        tokio::time::timeout(Duration::from_secs(15), async {
            let mut visited = Vec::new();
            loop {
                let change = changes.recv().await.expect("change channel open");
                visited.push(change.to);
                if change.to == state {
                    return visited;
                }
            }
        })
        .await
        .expect("timed out waiting for lifecycle state")
    }

    fn package(server: &TestServer) -> Vec<PackageFile> {
        server.add_file("/pkg/setup.sh", vec![b'a'; 200]);
        server.add_file("/pkg/setup-1.bin", vec![b'b'; 300]);
        vec![
            PackageFile::new(&server.url("/pkg/setup.sh"), "setup.sh").with_size(200),
            PackageFile::new(&server.url("/pkg/setup-1.bin"), "setup-1.bin").with_size(300),
        ]
    }

    #[tokio::test]
    async fn download_then_install_reaches_installed() {
        let server = TestServer::start();
        let mut fx = fixture(RecordingExecutor::default());
        let game = game("alpha");
        fx.service.register_game(game.clone());

        let state = fx
            .service
            .request_download(&game.id, package(&server))
            .expect("request download");
        assert_eq!(state, LifecycleState::Queued);

        let visited = wait_for(&mut fx.changes, LifecycleState::Installed).await;
        assert_eq!(visited.first(), Some(&LifecycleState::Queued));
        assert!(visited.contains(&LifecycleState::Downloading));
        assert!(visited.contains(&LifecycleState::Installing));

        let installs = fx.executor.installs.lock().expect("installs").clone();
        assert_eq!(installs.len(), 1);
        let installer_dir = fx.files.get_installer_dir(&game.slug);
        assert_eq!(installs[0].installer_path, installer_dir.join("setup.sh"));
        assert_eq!(installs[0].install_dir, Some(fx.files.get_game_dir(&game.slug)));
        assert_eq!(installs[0].language, "en");
        assert!(!installer_dir.exists());

        let info = read_gameinfo(&fx.files.get_game_dir(&game.slug))
            .expect("read gameinfo")
            .expect("gameinfo written");
        assert_eq!(info.name, game.title);

        let discovery = InstallDirDiscovery::new(fx.files.clone());
        assert_eq!(fx.service.refresh(&game.id, &discovery).expect("refresh"), None);
        assert_eq!(fx.service.state(&game.id), Some(LifecycleState::Installed));
    }

    #[tokio::test]
    async fn install_failure_returns_to_downloadable() {
        let server = TestServer::start();
        let mut fx = fixture(RecordingExecutor {
            fail_install: true,
            ..RecordingExecutor::default()
        });
        let game = game("beta");
        fx.service.register_game(game.clone());

        fx.service
            .request_download(&game.id, package(&server))
            .expect("request download");
        let visited = wait_for(&mut fx.changes, LifecycleState::Downloadable).await;

        assert!(visited.contains(&LifecycleState::Installing));
        let snapshot = fx.service.snapshot(&game.id).expect("snapshot");
        assert!(snapshot
            .last_error
            .as_deref()
            .map(|error| error.contains("unpack failed"))
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn cancel_during_download_discards_late_events() {
        let server = TestServer::start();
        server.throttle(64, Duration::from_millis(20));
        server.add_file("/big/setup.sh", vec![b'z'; 64 * 100]);
        let mut fx = fixture(RecordingExecutor::default());
        let game = game("gamma");
        fx.service.register_game(game.clone());

        fx.service
            .request_download(
                &game.id,
                vec![PackageFile::new(&server.url("/big/setup.sh"), "setup.sh").with_size(64 * 100)],
            )
            .expect("request download");
        wait_for(&mut fx.changes, LifecycleState::Downloading).await;

        let discovery = InstallDirDiscovery::new(fx.files.clone());
        assert_eq!(fx.service.refresh(&game.id, &discovery).expect("refresh while busy"), None);

        let state = fx.service.cancel(&game.id).expect("cancel");
        assert_eq!(state, LifecycleState::Downloadable);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fx.service.state(&game.id), Some(LifecycleState::Downloadable));
        assert!(!fx.files.get_installer_dir(&game.slug).join("setup.sh").exists());
        assert!(fx.executor.installs.lock().expect("installs").is_empty());
    }

    #[tokio::test]
    async fn update_passes_through_updating() {
        let server = TestServer::start();
        let mut fx = fixture(RecordingExecutor::default());
        let game = game("delta");
        let game_dir = fx.files.get_game_dir(&game.slug);
        write_gameinfo(
            &fx.files,
            &game_dir,
            &GameInfo {
                name: game.title.clone(),
                version: "1.0".to_string(),
            },
        )
        .expect("seed gameinfo");

        let discovery = InstallDirDiscovery::new(fx.files.clone());
        fx.service
            .discover(&discovery, std::slice::from_ref(&game))
            .expect("discover");
        assert_eq!(fx.service.state(&game.id), Some(LifecycleState::Installed));

        assert_eq!(
            fx.service.update_available(&game.id, "1.1").expect("update found"),
            LifecycleState::Updatable
        );
        fx.service
            .request_update(&game.id, package(&server))
            .expect("request update");
        let visited = wait_for(&mut fx.changes, LifecycleState::Installed).await;

        assert!(visited.contains(&LifecycleState::Updating));
        assert!(!visited.contains(&LifecycleState::Installing));
        let snapshot = fx.service.snapshot(&game.id).expect("snapshot");
        assert_eq!(snapshot.installed_version.as_deref(), Some("1.1"));
        let info = read_gameinfo(&game_dir).expect("read").expect("present");
        assert_eq!(info.version, "1.1");
    }

    #[tokio::test]
    async fn uninstall_success_and_failure() {
        let fx = fixture(RecordingExecutor::default());
        let game = game("epsilon");
        let game_dir = fx.files.get_game_dir(&game.slug);
        fx.service
            .seed(DiscoveredGame {
                game: game.clone(),
                installed_version: Some("2.0".to_string()),
                install_dir: Some(game_dir.clone()),
                installer: None,
            })
            .expect("seed");

        let state = fx.service.uninstall(&game.id).await.expect("uninstall");
        assert_eq!(state, LifecycleState::Downloadable);
        assert_eq!(*fx.executor.uninstalls.lock().expect("uninstalls"), vec![game_dir.clone()]);

        let failing = fixture(RecordingExecutor {
            fail_uninstall: true,
            ..RecordingExecutor::default()
        });
        failing
            .service
            .seed(DiscoveredGame {
                game: game.clone(),
                installed_version: Some("2.0".to_string()),
                install_dir: Some(game_dir),
                installer: None,
            })
            .expect("seed");
        let state = failing.service.uninstall(&game.id).await.expect("uninstall");
        assert_eq!(state, LifecycleState::Installed);
        let snapshot = failing.service.snapshot(&game.id).expect("snapshot");
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn installer_on_disk_installs_without_download() {
        let mut fx = fixture(RecordingExecutor::default());
        let game = game("zeta");
        let installer_dir = fx.files.get_installer_dir(&game.slug);
        std::fs::create_dir_all(&installer_dir).expect("installer dir");
        std::fs::write(installer_dir.join("setup.sh"), b"#!/bin/sh").expect("installer");

        let discovery = InstallDirDiscovery::new(fx.files.clone());
        fx.service
            .discover(&discovery, std::slice::from_ref(&game))
            .expect("discover");
        assert_eq!(fx.service.state(&game.id), Some(LifecycleState::Installable));

        assert_eq!(
            fx.service.request_install(&game.id).expect("request install"),
            LifecycleState::Installing
        );
        wait_for(&mut fx.changes, LifecycleState::Installed).await;
        assert_eq!(fx.executor.installs.lock().expect("installs").len(), 1);
    }

    #[tokio::test]
    async fn thumbnail_lands_in_cache() {
        let server = TestServer::start();
        server.add_file("/img/alpha.jpg", vec![7u8; 90]);
        let fx = fixture(RecordingExecutor::default());
        let game = game("theta");
        fx.service.register_game(game.clone());

        let (tx, mut events) = mpsc::unbounded_channel::<DownloadEvent>();
        fx.service.inner.downloads.add_listener(tx);
        let path = fx
            .service
            .fetch_thumbnail(&game.id, &server.url("/img/alpha.jpg"))
            .expect("fetch thumbnail");
        assert_eq!(path, fx.files.get_thumbnail_path(&game.id));

        tokio::time::timeout(Duration::from_secs(15), async {
            loop {
                let event = events.recv().await.expect("event channel open");
                if event.download.destination == path && event.state.is_terminal() {
                    assert_eq!(event.state, DownloadState::Completed);
                    break;
                }
            }
        })
        .await
        .expect("thumbnail download finished");
        assert_eq!(std::fs::read(&path).expect("thumbnail").len(), 90);
        assert_eq!(fx.service.state(&game.id), Some(LifecycleState::Downloadable));
        assert!(fx.service.fetch_thumbnail("missing", "http://127.0.0.1:9/x").is_err());
    }

    #[tokio::test]
    async fn acquisition_over_running_download_is_rejected() {
        let server = TestServer::start();
        server.throttle(64, Duration::from_millis(20));
        server.add_file("/big/setup.sh", vec![b'q'; 64 * 100]);
        let mut fx = fixture(RecordingExecutor::default());
        let game = game("iota");
        fx.service.register_game(game.clone());

        let destination = fx.files.get_installer_dir(&game.slug).join("setup.sh");
        assert!(fx
            .service
            .inner
            .downloads
            .enqueue(Download::new(&server.url("/big/setup.sh"), destination)));

        let err = fx
            .service
            .request_download(
                &game.id,
                vec![PackageFile::new(&server.url("/big/setup.sh"), "setup.sh")],
            )
            .expect_err("files already downloading");
        assert!(matches!(err, LauncherError::AlreadyDownloading(_)));

        let visited = wait_for(&mut fx.changes, LifecycleState::Downloadable).await;
        assert_eq!(visited, vec![LifecycleState::Queued, LifecycleState::Downloadable]);
        let snapshot = fx.service.snapshot(&game.id).expect("snapshot");
        assert_eq!(snapshot.state, LifecycleState::Downloadable);
        assert!(snapshot.last_error.is_some());

        fx.service.inner.downloads.stop_all();
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let fx = fixture(RecordingExecutor::default());
        let game = game("eta");
        fx.service
            .seed(DiscoveredGame {
                game: game.clone(),
                installed_version: Some("1.0".to_string()),
                install_dir: None,
                installer: None,
            })
            .expect("seed");

        let err = fx
            .service
            .request_download(&game.id, vec![PackageFile::new("http://127.0.0.1:9/none", "setup.sh")])
            .expect_err("installed game cannot be downloaded");
        assert!(matches!(
            err,
            LauncherError::Lifecycle(TransitionError::InvalidTransition { .. })
        ));

        let err = fx.service.cancel("missing").expect_err("unknown game");
        assert!(matches!(err, LauncherError::Lifecycle(TransitionError::UnknownGame(_))));

        let err = fx
            .service
            .request_download(&game.id, Vec::new())
            .expect_err("empty package");
        assert!(matches!(err, LauncherError::NoDownloadLink(_)));
        assert_eq!(fx.service.state(&game.id), Some(LifecycleState::Installed));
    }
}
