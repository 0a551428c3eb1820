// src/infrastructure/directory_lister.rs
//
// Directory listing capability used by collection scans.
//
// RULES:
// - Only immediate children are listed
// - A broken entry is reported per entry, never for the whole listing

use std::path::Path;

use crate::error::{AppError, AppResult};

/// One immediate child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirectoryEntry {
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }
}

/// Lists the immediate children of a directory.
///
/// The outer result fails when the directory itself cannot be read; the inner
/// results carry failures of single entries.
#[cfg_attr(test, mockall::automock)]
pub trait DirectoryLister: Send + Sync {
    fn list_children(&self, path: &Path) -> AppResult<Vec<AppResult<DirectoryEntry>>>;
}

/// Default lister backed by `walkdir`, restricted to depth 1
#[derive(Debug, Default, Clone, Copy)]
pub struct WalkdirLister;

impl DirectoryLister for WalkdirLister {
    fn list_children(&self, path: &Path) -> AppResult<Vec<AppResult<DirectoryEntry>>> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(AppError::invalid_path(path, "not a directory"));
        }

        let entries = walkdir::WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .map(|entry| {
                let entry = entry?;
                let name = entry.file_name().to_str().ok_or_else(|| {
                    AppError::invalid_path(entry.path(), "folder name is not valid UTF-8")
                })?;
                Ok(DirectoryEntry {
                    name: name.to_string(),
                    is_dir: entry.file_type().is_dir(),
                })
            })
            .collect();

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lists_only_immediate_children() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("Trigun").join("Extras")).unwrap();
        std::fs::create_dir(tmp.path().join("Akira")).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"todo").unwrap();

        let mut entries: Vec<DirectoryEntry> = WalkdirLister
            .list_children(tmp.path())
            .unwrap()
            .into_iter()
            .map(|e| e.unwrap())
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(
            entries,
            vec![
                DirectoryEntry::directory("Akira"),
                DirectoryEntry::directory("Trigun"),
                DirectoryEntry::file("notes.txt"),
            ]
        );
    }

    #[test]
    fn test_missing_directory_fails_as_a_whole() {
        let tmp = tempdir().unwrap();
        let result = WalkdirLister.list_children(&tmp.path().join("missing"));
        assert!(result.is_err());
    }
}
