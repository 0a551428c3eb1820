// src/application/config.rs
//
// Application configuration.
//
// Stored as JSON at {CONFIG_DIR}/anilibrary/config.json. Every key is
// optional; missing keys take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::services::LibraryConfig;

/// One collection to register at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub path: PathBuf,
}

impl CollectionConfig {
    /// Parse the `NAME=PATH` command line form
    pub fn parse(argument: &str) -> AppResult<Self> {
        let (name, path) = argument
            .split_once('=')
            .ok_or_else(|| AppError::Config(format!("expected NAME=PATH, got {:?}", argument)))?;

        let name = name.trim();
        if name.is_empty() || path.is_empty() {
            return Err(AppError::Config(format!("expected NAME=PATH, got {:?}", argument)));
        }
        Ok(Self {
            name: name.to_string(),
            path: PathBuf::from(path),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default log filter when RUST_LOG is not set
    pub log_level: String,
    /// Also watch every anime folder for content changes
    pub watch_anime_folders: bool,
    pub library: LibraryConfig,
    pub collections: Vec<CollectionConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            watch_anime_folders: true,
            library: LibraryConfig::default(),
            collections: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Get the default configuration file path
    ///
    /// Path structure: {CONFIG_DIR}/anilibrary/config.json
    pub fn default_path() -> AppResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config("Could not determine config directory".to_string()))?;

        Ok(config_dir.join("anilibrary").join("config.json"))
    }

    /// Load the configuration at `path`
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.library.validate()?;
        Ok(config)
    }

    /// Load an explicitly given file, or the default file if it exists.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load_or_default(path: Option<&Path>) -> AppResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = match Self::default_path() {
            Ok(path) => path,
            Err(_) => return Ok(Self::default()),
        };
        if default_path.is_file() {
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }
}
