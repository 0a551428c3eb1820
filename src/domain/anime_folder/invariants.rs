use super::entity::AnimeFolder;
use crate::domain::{DomainError, DomainResult};

/// Validates all AnimeFolder invariants
pub fn validate_anime_folder(folder: &AnimeFolder) -> DomainResult<()> {
    validate_folder_name(folder.folder_name())?;
    validate_parent_path(folder)?;
    Ok(())
}

/// The name must denote exactly one directory entry
pub fn validate_folder_name(name: &str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::InvariantViolation(
            "Anime folder name cannot be empty".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(DomainError::InvariantViolation(format!(
            "Anime folder name cannot be {:?}",
            name
        )));
    }
    if name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
        return Err(DomainError::InvariantViolation(format!(
            "Anime folder name {:?} contains a path separator",
            name
        )));
    }
    Ok(())
}

fn validate_parent_path(folder: &AnimeFolder) -> DomainResult<()> {
    if !folder.path().is_absolute() {
        return Err(DomainError::InvariantViolation(format!(
            "Anime folder parent path must be absolute: {:?}",
            folder.path()
        )));
    }
    Ok(())
}

/// Invariants that must hold true for AnimeFolder:
///
/// 1. Identity (UUID) is immutable and never derived from the path
/// 2. Parent path is absolute (canonical when created by a collection)
/// 3. Folder name is a single, non-empty path component
