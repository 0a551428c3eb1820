use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A single directory containing exactly one anime.
///
/// Immutable once built: a folder that disappears and comes back under the same
/// name is a new `AnimeFolder` with a new identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnimeFolder {
    /// Internal immutable identifier
    id: Uuid,

    /// Canonical parent directory (the collection root), without the folder name
    path: PathBuf,

    /// Name of the directory itself
    folder_name: String,
}

impl AnimeFolder {
    /// Create a new AnimeFolder below `path`
    pub fn new(path: impl Into<PathBuf>, folder_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            folder_name: folder_name.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    /// Parent path joined with the folder name
    pub fn full_path(&self) -> PathBuf {
        self.path.join(&self.folder_name)
    }
}

impl std::fmt::Display for AnimeFolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ID: {}, FolderName: {:<20}, Path: {}",
            self.id,
            self.folder_name,
            self.path.display()
        )
    }
}
