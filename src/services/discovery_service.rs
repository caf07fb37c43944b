use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::models::{DiscoveredGame, Game};
use crate::utils::file::FileManager;

const GAMEINFO_FILE: &str = "gameinfo";
const UNKNOWN_VERSION: &str = "unknown";

/// Reports what is already on disk for a set of catalog games.
pub trait Discovery: Send + Sync {
    fn discover(&self, games: &[Game]) -> Result<Vec<DiscoveredGame>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameInfo {
    pub name: String,
    pub version: String,
}

#[derive(Clone)]
pub struct InstallDirDiscovery {
    file_manager: FileManager,
}

impl InstallDirDiscovery {
    pub fn new(file_manager: FileManager) -> Self {
        Self { file_manager }
    }

    pub fn probe(&self, game: &Game) -> Result<DiscoveredGame> {
        let game_dir = self.file_manager.get_game_dir(&game.slug);
        let info = read_gameinfo(&game_dir)?;
        let installer = self.file_manager.find_installer(&game.slug);
        Ok(DiscoveredGame {
            game: game.clone(),
            installed_version: info.map(|info| info.version),
            install_dir: game_dir.is_dir().then_some(game_dir),
            installer,
        })
    }
}

impl Discovery for InstallDirDiscovery {
    fn discover(&self, games: &[Game]) -> Result<Vec<DiscoveredGame>> {
        let mut found = Vec::with_capacity(games.len());
        for game in games {
            let discovered = self.probe(game)?;
            tracing::debug!(
                "discovered game={} installed={:?} installer={}",
                game.id,
                discovered.installed_version,
                discovered.installer.is_some()
            );
            found.push(discovered);
        }
        Ok(found)
    }
}

pub fn gameinfo_path(game_dir: &Path) -> PathBuf {
    game_dir.join(GAMEINFO_FILE)
}

/// Line one is the display name, line two the installed version.
pub fn read_gameinfo(game_dir: &Path) -> Result<Option<GameInfo>> {
    let contents = match fs::read_to_string(gameinfo_path(game_dir)) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut lines = contents.lines().map(str::trim);
    let name = lines.next().unwrap_or_default().to_string();
    let version = lines
        .next()
        .filter(|line| !line.is_empty())
        .unwrap_or(UNKNOWN_VERSION)
        .to_string();
    Ok(Some(GameInfo { name, version }))
}

pub fn write_gameinfo(file_manager: &FileManager, game_dir: &Path, info: &GameInfo) -> Result<()> {
    let contents = format!("{}\n{}\n", info.name, info.version);
    file_manager.write_atomic(&gameinfo_path(game_dir), contents.as_bytes())?;
    Ok(())
}
