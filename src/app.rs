use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::errors::Result;
use crate::services::{
    DownloadManager, GameLifecycleService, InstallDirDiscovery, InstallExecutor, InstallerQueue,
};
use crate::utils::file::FileManager;

/// Composition root: one instance of each service, wired together.
#[derive(Clone)]
pub struct AppState {
    pub config: PipelineConfig,
    pub files: FileManager,
    pub download_manager: DownloadManager,
    pub installer_queue: InstallerQueue,
    pub discovery: InstallDirDiscovery,
    pub lifecycle: GameLifecycleService,
}

impl AppState {
    /// Must be called inside a tokio runtime; the download workers are spawned here.
    pub fn build(config: PipelineConfig, executor: Arc<dyn InstallExecutor>) -> Result<Self> {
        let files = FileManager::new(
            config.installers_dir.clone(),
            config.games_dir.clone(),
            config.cache_dir.clone(),
        );
        let download_manager = DownloadManager::new(config.download.clone())?;
        let installer_queue = InstallerQueue::new(executor, files.installers_dir());
        let discovery = InstallDirDiscovery::new(files.clone());
        let lifecycle = GameLifecycleService::new(
            download_manager.clone(),
            installer_queue.clone(),
            files.clone(),
            config.install.clone(),
        );

        tracing::info!(
            "pipeline ready root={} asset_workers={}",
            config.root_dir.display(),
            config.download.asset_workers
        );

        Ok(Self {
            config,
            files,
            download_manager,
            installer_queue,
            discovery,
            lifecycle,
        })
    }

    pub fn shutdown(&self) {
        tracing::info!("pipeline shutting down");
        self.download_manager.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DownloadConfig, InstallSettings};
    use crate::errors::InstallError;
    use crate::models::{Game, Platform};
    use crate::services::{Discovery, InstallRequest, LifecycleState};
    use std::path::{Path, PathBuf};
    use uuid::Uuid;

    struct NoopExecutor;

    impl InstallExecutor for NoopExecutor {
        fn install(&self, request: &InstallRequest) -> std::result::Result<PathBuf, InstallError> {
            request
                .install_dir
                .clone()
                .ok_or_else(|| InstallError::InstallerFailed("no install dir".to_string()))
        }

        fn uninstall(&self, _game: &Game, _install_dir: &Path) -> std::result::Result<(), InstallError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn build_wires_services_under_root() {
        let root = std::env::temp_dir().join(format!("launcher-app-{}", Uuid::new_v4()));
        let config = PipelineConfig::with_root(
            root.clone(),
            DownloadConfig {
                disable_system_proxy: true,
                ..DownloadConfig::default()
            },
            InstallSettings::default(),
        );
        let state = AppState::build(config, Arc::new(NoopExecutor)).expect("build state");

        assert_eq!(state.files.installers_dir(), root.join("installers").as_path());
        assert_eq!(state.files.install_dir(), root.join("games").as_path());

        let game = Game::new("1", "sample", "Sample", Platform::Linux);
        let found = state
            .discovery
            .discover(std::slice::from_ref(&game))
            .expect("discover");
        assert_eq!(found.len(), 1);
        state
            .lifecycle
            .discover(&state.discovery, &[game.clone()])
            .expect("seed");
        assert_eq!(state.lifecycle.state(&game.id), Some(LifecycleState::Downloadable));

        state.shutdown();
        assert!(state.download_manager.active_downloads().is_empty());
    }
}
