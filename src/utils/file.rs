use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct FileManager {
    installers_dir: PathBuf,
    install_dir: PathBuf,
    cache_dir: PathBuf,
}

impl FileManager {
    pub fn new(installers_dir: PathBuf, install_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            installers_dir,
            install_dir,
            cache_dir,
        }
    }

    pub fn installers_dir(&self) -> &Path {
        &self.installers_dir
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn get_game_dir(&self, game_slug: &str) -> PathBuf {
        self.install_dir.join(sanitize_folder_name(game_slug))
    }

    pub fn get_installer_dir(&self, game_slug: &str) -> PathBuf {
        self.installers_dir.join(sanitize_folder_name(game_slug))
    }

    pub fn get_thumbnail_path(&self, game_id: &str) -> PathBuf {
        self.cache_dir
            .join("thumbnails")
            .join(format!("{}.jpg", sanitize_folder_name(game_id)))
    }

    pub fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let temp_path = path.with_extension("tmp");
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&temp_path)?;
        use std::io::Write;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(temp_path, path)?;
        Ok(())
    }

    /// Entry point of a multi-part installer: `.sh`/`.exe` files win over data parts.
    pub fn find_installer(&self, game_slug: &str) -> Option<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(self.get_installer_dir(game_slug))
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort_by_key(|path| (!is_installer_entry(path), path.clone()));
        files.into_iter().next()
    }
}

fn is_installer_entry(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "sh" | "exe"))
        .unwrap_or(false)
}

pub fn sanitize_folder_name(value: &str) -> String {
    let cleaned = value
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => ch,
        })
        .collect::<String>()
        .trim()
        .trim_end_matches('.')
        .to_string();
    if cleaned.is_empty() || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
