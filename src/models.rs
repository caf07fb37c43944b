use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::services::manifest_service::DownloadManifest;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Game {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub platform: Platform,
}

impl Game {
    pub fn new(id: &str, slug: &str, title: &str, platform: Platform) -> Self {
        Self {
            id: id.to_string(),
            slug: slug.to_string(),
            title: title.to_string(),
            platform,
        }
    }
}

/// One remote file of a package, as resolved by the catalog client.
#[derive(Clone, Debug)]
pub struct PackageFile {
    pub url: String,
    pub file_name: String,
    pub size: Option<u64>,
    pub manifest: Option<DownloadManifest>,
}

impl PackageFile {
    pub fn new(url: &str, file_name: &str) -> Self {
        Self {
            url: url.to_string(),
            file_name: file_name.to_string(),
            size: None,
            manifest: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_manifest(mut self, manifest: DownloadManifest) -> Self {
        if self.size.is_none() {
            self.size = Some(manifest.total_size);
        }
        self.manifest = Some(manifest);
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DiscoveredGame {
    pub game: Game,
    pub installed_version: Option<String>,
    pub install_dir: Option<PathBuf>,
    pub installer: Option<PathBuf>,
}
