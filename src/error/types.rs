// src/error/types.rs
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::DomainError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Directory listing error: {0}")]
    Listing(#[from] walkdir::Error),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("The filesystem is currently watched")]
    CurrentlyWatched,

    #[error("The filesystem is already watched")]
    AlreadyWatching,

    #[error("The collection is being loaded or cleared")]
    CollectionBusy,

    #[error("Collection {0} not found")]
    CollectionNotFound(Uuid),

    #[error("Cannot add collection {name:?}: {reason}")]
    CollectionRejected { name: String, reason: String },

    #[error("Cannot wait for the library while it still contains {0} collection(s)")]
    CollectionsRemaining(usize),

    #[error("Task planner is already running")]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl AppError {
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        AppError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that only mean "the path vanished before we got to it".
    pub fn is_missing_path(&self) -> bool {
        match self {
            AppError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            AppError::Watch(err) => match &err.kind {
                notify::ErrorKind::PathNotFound | notify::ErrorKind::WatchNotFound => true,
                notify::ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
                _ => false,
            },
            _ => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
