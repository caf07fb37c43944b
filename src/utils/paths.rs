use std::path::{Path, PathBuf};

use crate::utils::env::read_env_string;

const APP_DIR_NAME: &str = "launcher-pipeline";
const PORTABLE_MARKER: &str = "portable.config.json";

fn ensure_dir(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if std::fs::create_dir_all(path).is_ok() {
        return Some(path.to_path_buf());
    }
    None
}

fn is_portable_root(path: &Path) -> bool {
    path.join(PORTABLE_MARKER).exists()
}

pub fn resolve_root_dir() -> PathBuf {
    if let Some(value) = read_env_string("LAUNCHER_ROOT_DIR") {
        if let Some(dir) = ensure_dir(&PathBuf::from(value)) {
            return dir;
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if is_portable_root(dir) {
                return dir.to_path_buf();
            }
        }
    }

    if let Some(data_local) = dirs::data_local_dir() {
        if let Some(found) = ensure_dir(&data_local.join(APP_DIR_NAME)) {
            return found;
        }
    }

    if let Some(home) = dirs::home_dir() {
        if let Some(found) = ensure_dir(&home.join(format!(".{}", APP_DIR_NAME))) {
            return found;
        }
    }

    PathBuf::from(".")
}

fn resolve_child(root: &Path, name: &str) -> PathBuf {
    let candidate = root.join(name);
    ensure_dir(&candidate).unwrap_or_else(|| root.to_path_buf())
}

pub fn resolve_installers_dir(root: &Path) -> PathBuf {
    resolve_child(root, "installers")
}

pub fn resolve_games_dir(root: &Path) -> PathBuf {
    if let Some(value) = read_env_string("LAUNCHER_GAMES_DIR") {
        if let Some(dir) = ensure_dir(&PathBuf::from(value)) {
            return dir;
        }
    }
    resolve_child(root, "games")
}

pub fn resolve_cache_dir(root: &Path) -> PathBuf {
    resolve_child(root, "cache")
}

pub fn resolve_log_dir(root: &Path) -> PathBuf {
    resolve_child(root, "logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn children_are_created_under_root() {
        let root = std::env::temp_dir().join(format!("pipeline-paths-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).expect("create root");

        let installers = resolve_installers_dir(&root);
        let cache = resolve_cache_dir(&root);

        assert_eq!(installers, root.join("installers"));
        assert_eq!(cache, root.join("cache"));
        assert!(installers.is_dir());
        assert!(cache.is_dir());
    }
}
