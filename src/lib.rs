// src/lib.rs
// anilibrary - Live, filesystem-backed index of anime folders
//
// Architecture:
// - Domain: AnimeFolder values and their invariants
// - Services: collections, the library and the task planner
// - Event-driven: every folder change becomes a FolderEvent broadcast to subscribers
// - Explicit: loggers and filesystem backends are passed in, never global

// ============================================================================
// FOUNDATION
// ============================================================================

pub mod domain;
pub mod error;
pub mod events;
pub mod infrastructure;
pub mod services;

// ============================================================================
// APPLICATION LAYER
// ============================================================================

pub mod application;

// ============================================================================
// PUBLIC API - Domain Entities
// ============================================================================

pub use domain::{validate_anime_folder, validate_folder_name, AnimeFolder, DomainError};

// ============================================================================
// PUBLIC API - Error Types
// ============================================================================

pub use error::{AppError, AppResult};

// ============================================================================
// PUBLIC API - Events
// ============================================================================

pub use events::{DomainEvent, EventBus, EventLogEntry, FolderEvent, FolderEventType, SubscriberReceiver};

// ============================================================================
// PUBLIC API - Infrastructure
// ============================================================================

pub use infrastructure::{
    DirectoryEntry, DirectoryLister, FilesystemBackends, FsNotification, FsOperation, Logger,
    NotifyWatcherFactory, PathWatcher, WalkdirLister, WatchSource, WatcherFactory,
};

// ============================================================================
// PUBLIC API - Services
// ============================================================================

pub use services::{
    // Anime Collection
    AnimeCollection,
    // Anime Library
    AnimeLibrary,
    ErrorReceiver,
    EventReceiver,
    LibraryConfig,
    // Task Planner
    Task,
    TaskPlanner,
    TaskType,
};

// ============================================================================
// PUBLIC API - Application Layer
// ============================================================================

pub use application::{AppConfig, AppState, CollectionConfig};
