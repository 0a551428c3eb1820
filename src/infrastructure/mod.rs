// src/infrastructure/mod.rs
//
// Infrastructure Layer
//
// Contains implementation details that support the domain
// but are not part of the domain itself.
//
// RULES:
// - Infrastructure serves the domain
// - Infrastructure never dictates domain behavior
// - Infrastructure is replaceable (listing and watching sit behind traits)

pub mod directory_lister;
pub mod fs_watcher;
pub mod logging;
pub mod paths;

use std::sync::Arc;

pub use directory_lister::{DirectoryEntry, DirectoryLister, WalkdirLister};
pub use fs_watcher::{
    FsNotification, FsOperation, NotifyWatcherFactory, PathWatcher, RawNotification,
    WatchSource, WatcherFactory,
};
pub use logging::Logger;

/// The filesystem capabilities a collection consumes
#[derive(Clone)]
pub struct FilesystemBackends {
    pub lister: Arc<dyn DirectoryLister>,
    pub watchers: Arc<dyn WatcherFactory>,
}

impl FilesystemBackends {
    pub fn new(lister: Arc<dyn DirectoryLister>, watchers: Arc<dyn WatcherFactory>) -> Self {
        Self { lister, watchers }
    }
}

impl Default for FilesystemBackends {
    fn default() -> Self {
        Self {
            lister: Arc::new(WalkdirLister),
            watchers: Arc::new(NotifyWatcherFactory),
        }
    }
}

impl std::fmt::Debug for FilesystemBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemBackends").finish_non_exhaustive()
    }
}
