// src/infrastructure/paths.rs

use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Resolve `path` to an absolute, symlink-free directory path.
///
/// Fails if the path does not exist or is not a directory.
pub fn canonical_directory(path: &Path) -> AppResult<PathBuf> {
    let canonical = std::fs::canonicalize(path)
        .map_err(|e| AppError::invalid_path(path, e.to_string()))?;

    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| AppError::invalid_path(path, e.to_string()))?;
    if !metadata.is_dir() {
        return Err(AppError::invalid_path(path, "not a directory"));
    }

    Ok(canonical)
}

/// True if `path` currently exists and is a directory (symlinks are followed)
pub fn is_directory(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Last component of `path` as UTF-8
pub fn entry_name(path: &Path) -> AppResult<String> {
    let name = path
        .file_name()
        .ok_or_else(|| AppError::invalid_path(path, "path has no final component"))?;
    name.to_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::invalid_path(path, "folder name is not valid UTF-8"))
}
