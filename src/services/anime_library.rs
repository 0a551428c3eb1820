// src/services/anime_library.rs
//
// Anime Library - the aggregate of all collections
//
// CRITICAL RULES:
// - Structural changes (add/remove/clear, watch start) take the exclusive lock
// - Queries and iteration take the shared lock
// - The subscriber registry lives in the event bus with its own lock
// - No lock is held while awaiting a push into a subscriber queue
// - Lock order: structure -> subscribers -> collection folders

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::domain::AnimeFolder;
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, EventLogEntry, FolderEvent, SubscriberReceiver};
use crate::infrastructure::paths::canonical_directory;
use crate::infrastructure::{FilesystemBackends, Logger};
use crate::services::anime_collection::{AnimeCollection, ErrorReceiver, EventReceiver};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Queue capacity of each subscriber (replayed events come on top)
    pub event_buffer_size: usize,
    /// Number of broadcasts kept in the event log
    pub event_log_capacity: usize,
}

impl LibraryConfig {
    /// Largest accepted `event_buffer_size`
    pub const MAX_EVENT_BUFFER_SIZE: usize = 1 << 20;

    pub fn validate(&self) -> AppResult<()> {
        if self.event_buffer_size > Self::MAX_EVENT_BUFFER_SIZE {
            return Err(AppError::Config(format!(
                "event_buffer_size {} exceeds the maximum of {}",
                self.event_buffer_size,
                Self::MAX_EVENT_BUFFER_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 64,
            event_log_capacity: 256,
        }
    }
}

/// All anime collections, plus the event distribution to subscribers.
///
/// Cheap to clone; clones share the same state. Background tasks need a Tokio
/// runtime.
#[derive(Clone)]
pub struct AnimeLibrary {
    inner: Arc<LibraryInner>,
}

struct LibraryInner {
    config: LibraryConfig,
    state: RwLock<LibraryState>,
    bus: EventBus,
    backends: FilesystemBackends,
    /// Relays, subscriber observers, error forwarders and watch supervisors
    tracker: TaskTracker,
    logger: Logger,
}

#[derive(Default)]
struct LibraryState {
    collections: HashMap<Uuid, LibraryCollection>,
    watch: Option<LibraryWatch>,
}

struct LibraryCollection {
    collection: AnimeCollection,
    cancel_watching: Option<CancellationToken>,
    relay_stop: CancellationToken,
}

struct LibraryWatch {
    token: CancellationToken,
    also_watch_folders: bool,
    errors: mpsc::UnboundedSender<AppError>,
    /// Error forwarders of the collection watches started under this watch
    watch_tracker: TaskTracker,
}

impl AnimeLibrary {
    pub fn new(config: LibraryConfig, logger: Logger) -> Self {
        Self::with_backends(config, FilesystemBackends::default(), logger)
    }

    pub fn with_backends(config: LibraryConfig, backends: FilesystemBackends, logger: Logger) -> Self {
        let tracker = TaskTracker::new();
        tracker.close();

        let bus = EventBus::new(config.event_log_capacity, logger.child("events"));

        Self {
            inner: Arc::new(LibraryInner {
                config,
                state: RwLock::new(LibraryState::default()),
                bus,
                backends,
                tracker,
                logger,
            }),
        }
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.inner.config
    }

    // ========================================================================
    // COLLECTIONS
    // ========================================================================

    /// Register the directory at `path` as a collection and return its id.
    ///
    /// A path resolving to the root of an existing collection returns that
    /// collection's id. While the library is watching, the new collection is
    /// watched right away; if that fails, nothing is registered.
    pub fn add_collection(&self, name: &str, path: impl AsRef<Path>) -> AppResult<Uuid> {
        let path = canonical_directory(path.as_ref())?;
        let inner = &self.inner;

        let mut state = inner.state_mut();
        if let Some(existing) = state.find_by_path(&path) {
            debug!(target: inner.logger.target(), "Collection at {} already exists", path.display());
            return Ok(existing);
        }

        let collection = AnimeCollection::with_backends(
            name,
            &path,
            inner.backends.clone(),
            inner.logger.child("collection"),
        )?;
        let id = collection.id();
        // Attached before any watch, so the initial load is broadcast too.
        let events = collection.events();

        let mut cancel_watching = None;
        if let Some(watch) = state.watch.as_ref().filter(|w| !w.token.is_cancelled()) {
            let scope = watch.token.child_token();
            let errors = collection.watch_filesystem(scope.clone(), watch.also_watch_folders)?;
            inner.spawn_error_forwarder(watch, id, errors);
            cancel_watching = Some(scope);
        }

        let relay_stop = CancellationToken::new();
        inner.spawn_relay(id, events, relay_stop.clone());

        state.collections.insert(
            id,
            LibraryCollection {
                collection,
                cancel_watching,
                relay_stop,
            },
        );

        info!(target: inner.logger.target(), "Collection {:?} added at {}", name, path.display());
        Ok(id)
    }

    /// Stop watching a collection, stop its relay and forget it
    pub fn remove_collection(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.inner.state_mut();
        let entry = state
            .collections
            .remove(&id)
            .ok_or(AppError::CollectionNotFound(id))?;
        drop(state);

        let name = entry.collection.name().to_string();
        entry.detach();
        info!(target: self.inner.logger.target(), "Collection {:?} removed", name);
        Ok(())
    }

    /// Remove every collection
    pub fn clear(&self) {
        let mut state = self.inner.state_mut();
        let removed: Vec<LibraryCollection> = state.collections.drain().map(|(_, c)| c).collect();
        let count = removed.len();
        for entry in removed {
            entry.detach();
        }

        if !state.collections.is_empty() {
            error!(
                target: self.inner.logger.target(),
                "Failed to clear library: {} collections remain",
                state.collections.len()
            );
            panic!(
                "anime library still holds {} collections after clear",
                state.collections.len()
            );
        }
        info!(target: self.inner.logger.target(), "Removed {} collections", count);
    }

    /// Id of the collection whose root is the same directory as `path`
    pub fn contains(&self, path: impl AsRef<Path>) -> Option<Uuid> {
        let path = canonical_directory(path.as_ref()).ok()?;
        self.inner.state().find_by_path(&path)
    }

    pub fn collection(&self, id: Uuid) -> Option<AnimeCollection> {
        self.inner
            .state()
            .collections
            .get(&id)
            .map(|entry| entry.collection.clone())
    }

    pub fn collections(&self) -> Vec<AnimeCollection> {
        self.inner
            .state()
            .collections
            .values()
            .map(|entry| entry.collection.clone())
            .collect()
    }

    // ========================================================================
    // FILESYSTEM
    // ========================================================================

    /// Reload every collection. Fails while watching, and on the first
    /// collection that fails to load. Returns the number of folders loaded.
    pub fn load_from_filesystem(&self) -> AppResult<usize> {
        let state = self.inner.state_mut();
        if state.watch.is_some() {
            return Err(AppError::CurrentlyWatched);
        }

        let mut loaded = 0;
        for entry in state.collections.values() {
            loaded += entry.collection.load_from_filesystem()?;
        }
        info!(target: self.inner.logger.target(), "{} anime folders loaded", loaded);
        Ok(loaded)
    }

    /// Watch every collection until `scope` is cancelled.
    ///
    /// Collections added while watching are watched as well. The returned queue
    /// carries the watch errors of all collections; it closes once every
    /// collection watch has stopped and the library is no longer watching.
    ///
    /// If any collection cannot be watched, the handles already installed for
    /// the others are closed before returning and no collection is left
    /// watching. Their initial loads stay in effect.
    pub fn watch_filesystem(
        &self,
        scope: &CancellationToken,
        also_watch_folders: bool,
    ) -> AppResult<ErrorReceiver> {
        let inner = &self.inner;
        let mut state = inner.state_mut();
        if state.watch.is_some() {
            return Err(AppError::AlreadyWatching);
        }

        // Every collection is prepared before any watch task runs, so a failure
        // rolls back synchronously by dropping the prepared watches.
        let mut prepared = Vec::with_capacity(state.collections.len());
        for (id, entry) in &state.collections {
            match entry.collection.prepare_watch(also_watch_folders) {
                Ok(pending) => prepared.push((*id, pending)),
                Err(err) => {
                    warn!(
                        target: inner.logger.target(),
                        "Failed to watch collection {:?}: {}",
                        entry.collection.name(),
                        err
                    );
                    drop(prepared);
                    return Err(err);
                }
            }
        }

        let token = scope.child_token();
        let started: Vec<_> = prepared
            .into_iter()
            .map(|(id, pending)| {
                let collection_scope = token.child_token();
                let errors = pending.start(collection_scope.clone());
                (id, collection_scope, errors)
            })
            .collect();

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let watch = LibraryWatch {
            token: token.clone(),
            also_watch_folders,
            errors: errors_tx,
            watch_tracker: TaskTracker::new(),
        };

        for (id, collection_scope, errors) in started {
            inner.spawn_error_forwarder(&watch, id, errors);
            if let Some(entry) = state.collections.get_mut(&id) {
                entry.cancel_watching = Some(collection_scope);
            }
        }

        let watch_tracker = watch.watch_tracker.clone();
        state.watch = Some(watch);
        drop(state);

        info!(
            target: inner.logger.target(),
            "Watching {} collections (per-folder watches: {})",
            self.collection_count(),
            also_watch_folders
        );

        let supervisor = Arc::clone(inner);
        inner.tracker.spawn(async move {
            token.cancelled().await;
            watch_tracker.close();
            watch_tracker.wait().await;

            // Dropping the watch drops the last error sender.
            supervisor.state_mut().watch = None;
            info!(target: supervisor.logger.target(), "Stopped watching");
        });

        Ok(errors_rx)
    }

    pub fn is_watching(&self) -> bool {
        self.inner.state().watch.is_some()
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn collection_count(&self) -> usize {
        self.inner.state().collections.len()
    }

    pub fn anime_folder_count(&self) -> usize {
        self.inner
            .state()
            .collections
            .values()
            .map(|entry| entry.collection.anime_folder_count())
            .sum()
    }

    /// Visit every folder of every collection until the visitor breaks.
    /// Returns false if the iteration was stopped early.
    pub fn iterate_anime_folders<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&AnimeFolder) -> ControlFlow<()>,
    {
        let state = self.inner.state();
        for entry in state.collections.values() {
            if !entry.collection.iterate(&mut visitor) {
                return false;
            }
        }
        true
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    /// Receive every folder event of every collection until `scope` is cancelled.
    ///
    /// With `replay_existing`, the queue starts with one `FOLDER_ADDED` per
    /// folder tracked at subscription time. A subscriber that stops draining
    /// its queue eventually stalls event delivery to everyone.
    pub fn subscribe(&self, scope: CancellationToken, replay_existing: bool) -> SubscriberReceiver {
        let inner = &self.inner;
        let state = inner.state();

        let (subscriber_id, events) = inner.bus.register(
            inner.config.event_buffer_size,
            scope.clone(),
            || {
                let mut replay = Vec::new();
                if replay_existing {
                    for entry in state.collections.values() {
                        let collection_id = entry.collection.id();
                        entry.collection.iterate(|folder| {
                            replay.push(FolderEvent::added(collection_id, folder.clone()));
                            ControlFlow::Continue(())
                        });
                    }
                }
                replay
            },
        );
        drop(state);

        let bus = inner.bus.clone();
        inner.tracker.spawn(async move {
            scope.cancelled().await;
            bus.unregister(subscriber_id);
        });

        events
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.bus.subscriber_count()
    }

    /// Recently broadcast events, oldest first
    pub fn event_log(&self) -> Vec<EventLogEntry> {
        self.inner.bus.event_log()
    }

    /// Wait for every background task of the library to finish.
    ///
    /// Relays only stop when their collection is removed, and subscriber
    /// observers when their scope ends, so collections must be removed first.
    pub async fn wait(&self) -> AppResult<()> {
        let remaining = self.collection_count();
        if remaining > 0 {
            return Err(AppError::CollectionsRemaining(remaining));
        }
        self.inner.tracker.wait().await;
        Ok(())
    }
}

impl std::fmt::Debug for AnimeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimeLibrary")
            .field("collections", &self.collection_count())
            .field("watching", &self.is_watching())
            .field("bus", &self.inner.bus)
            .finish()
    }
}

impl LibraryInner {
    fn state(&self) -> RwLockReadGuard<'_, LibraryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, LibraryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Relay one collection's events into the broadcast routine
    fn spawn_relay(&self, collection_id: Uuid, mut events: EventReceiver, stop: CancellationToken) {
        let bus = self.bus.clone();
        let logger = self.logger.clone();
        self.tracker.spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = bus.broadcast(event) => {}
                }
            }
            debug!(target: logger.target(), "Relay of collection {} stopped", collection_id);
        });
    }

    /// Forward one collection's watch errors into the library's error queue
    fn spawn_error_forwarder(
        self: &Arc<Self>,
        watch: &LibraryWatch,
        collection_id: Uuid,
        mut errors: ErrorReceiver,
    ) {
        let sink = watch.errors.clone();
        let library = Arc::clone(self);
        let forwarder = watch.watch_tracker.track_future(async move {
            while let Some(err) = errors.recv().await {
                let _ = sink.send(err);
            }

            // The collection's watch has fully stopped.
            let mut state = library.state_mut();
            if let Some(entry) = state.collections.get_mut(&collection_id) {
                if entry
                    .cancel_watching
                    .as_ref()
                    .is_some_and(CancellationToken::is_cancelled)
                {
                    entry.cancel_watching = None;
                }
            }
        });
        self.tracker.spawn(forwarder);
    }
}

impl LibraryState {
    fn find_by_path(&self, path: &Path) -> Option<Uuid> {
        self.collections
            .iter()
            .find(|(_, entry)| entry.collection.path() == path)
            .map(|(id, _)| *id)
    }
}

impl LibraryCollection {
    fn detach(self) {
        if let Some(token) = self.cancel_watching {
            token.cancel();
        }
        self.relay_stop.cancel();
    }
}
