// src/events/types.rs
//
// Folder events distributed by collections and the library.
// Each event represents an immutable fact that has already occurred.
//
// CRITICAL RULES:
// - Events are facts, not commands
// - Events are immutable
// - Events carry only the data needed to react

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::AnimeFolder;

/// Trait that all domain events must implement
pub trait DomainEvent: std::fmt::Debug + Clone {
    /// Unique identifier for this event instance
    fn event_id(&self) -> Uuid;

    /// When this event occurred
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Human-readable event type name
    fn event_type(&self) -> &'static str;
}

/// What happened to an anime folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FolderEventType {
    FolderAdded,
    FolderRemoved,
    FolderContentModified,
}

impl FolderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderEventType::FolderAdded => "FOLDER_ADDED",
            FolderEventType::FolderRemoved => "FOLDER_REMOVED",
            FolderEventType::FolderContentModified => "FOLDER_CONTENT_MODIFIED",
        }
    }
}

impl std::fmt::Display for FolderEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FOLDER EVENTS
// ============================================================================

/// Emitted by a collection whenever one of its anime folders changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event_type: FolderEventType,
    pub collection_id: Uuid,
    pub anime_folder: AnimeFolder,
}

impl FolderEvent {
    pub fn new(event_type: FolderEventType, collection_id: Uuid, anime_folder: AnimeFolder) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event_type,
            collection_id,
            anime_folder,
        }
    }

    pub fn added(collection_id: Uuid, anime_folder: AnimeFolder) -> Self {
        Self::new(FolderEventType::FolderAdded, collection_id, anime_folder)
    }

    pub fn removed(collection_id: Uuid, anime_folder: AnimeFolder) -> Self {
        Self::new(FolderEventType::FolderRemoved, collection_id, anime_folder)
    }

    pub fn content_modified(collection_id: Uuid, anime_folder: AnimeFolder) -> Self {
        Self::new(
            FolderEventType::FolderContentModified,
            collection_id,
            anime_folder,
        )
    }
}

impl DomainEvent for FolderEvent {
    fn event_id(&self) -> Uuid { self.event_id }
    fn occurred_at(&self) -> DateTime<Utc> { self.occurred_at }
    fn event_type(&self) -> &'static str { self.event_type.as_str() }
}

impl std::fmt::Display for FolderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let description = match self.event_type {
            FolderEventType::FolderAdded => "Anime folder added",
            FolderEventType::FolderRemoved => "Anime folder removed",
            FolderEventType::FolderContentModified => "Anime folder content modified",
        };
        write!(f, "{}: {}", description, self.anime_folder)
    }
}
