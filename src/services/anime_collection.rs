// src/services/anime_collection.rs
//
// Anime Collection - one root directory and the anime folders directly below it
//
// CRITICAL RULES:
// - Every tracked folder's parent path is the canonical root path
// - Folder names are unique within a collection
// - At most one watch per collection
// - Native watch handles belong to the watch task; nothing else touches them
// - Events are emitted while the folder lock is held, so they keep detection order

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::domain::{validate_anime_folder, validate_folder_name, AnimeFolder};
use crate::error::{AppError, AppResult};
use crate::events::FolderEvent;
use crate::infrastructure::fs_watcher::NotificationReceiver;
use crate::infrastructure::paths::{canonical_directory, entry_name, is_directory};
use crate::infrastructure::{
    FilesystemBackends, FsNotification, FsOperation, Logger, PathWatcher, RawNotification,
    WatchSource,
};

/// Receiving end of a collection's event output
pub type EventReceiver = mpsc::UnboundedReceiver<FolderEvent>;

/// Errors reported by a running watch
pub type ErrorReceiver = mpsc::UnboundedReceiver<AppError>;

/// A root directory whose immediate subdirectories are anime folders.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct AnimeCollection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    id: Uuid,
    name: String,
    path: PathBuf,
    folders: RwLock<FolderIndex>,
    watch_state: Mutex<WatchState>,
    events: Mutex<Option<mpsc::UnboundedSender<FolderEvent>>>,
    backends: FilesystemBackends,
    /// Closed from the start, so `wait` resolves whenever no watch task runs.
    tracker: TaskTracker,
    logger: Logger,
}

#[derive(Default)]
struct FolderIndex {
    folders: HashMap<Uuid, AnimeFolder>,
    by_name: HashMap<String, Uuid>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum WatchPhase {
    #[default]
    Idle,
    /// A load or clear is rewriting the folder index
    Loading,
    /// A watch claimed the collection and is scanning or waiting to be started
    Starting,
    Watching,
}

#[derive(Debug, Default, Clone, Copy)]
struct WatchState {
    phase: WatchPhase,
    watching_folders: bool,
}

impl WatchState {
    fn is_watching(&self) -> bool {
        matches!(self.phase, WatchPhase::Starting | WatchPhase::Watching)
    }
}

impl AnimeCollection {
    /// Create an empty collection for `path`, using the default walkdir/notify backends
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>, logger: Logger) -> AppResult<Self> {
        Self::with_backends(name, path, FilesystemBackends::default(), logger)
    }

    /// Create an empty collection for `path`.
    ///
    /// Fails if the path does not exist or is not a directory. Nothing is
    /// scanned yet; call `load_from_filesystem` or `watch_filesystem`.
    pub fn with_backends(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        backends: FilesystemBackends,
        logger: Logger,
    ) -> AppResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::CollectionRejected {
                name,
                reason: "collection name cannot be empty".to_string(),
            });
        }
        let path = canonical_directory(path.as_ref())?;

        let tracker = TaskTracker::new();
        tracker.close();

        debug!(target: logger.target(), "Created collection {:?} at {}", name, path.display());

        Ok(Self {
            inner: Arc::new(CollectionInner {
                id: Uuid::new_v4(),
                name,
                path,
                folders: RwLock::new(FolderIndex::default()),
                watch_state: Mutex::new(WatchState::default()),
                events: Mutex::new(None),
                backends,
                tracker,
                logger,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Canonical root path
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// True from the moment a watch start claims the collection until its
    /// watch task has released the watch handles.
    pub fn is_watching(&self) -> bool {
        self.inner.watch_state().is_watching()
    }

    /// True while a watch with per-folder monitoring is active
    pub fn is_watching_folders(&self) -> bool {
        self.inner.watch_state().watching_folders
    }

    pub fn anime_folder_count(&self) -> usize {
        self.inner.index().folders.len()
    }

    /// Attach the event output and return its receiving end.
    ///
    /// Attaching again replaces the previous output. Without an attached output,
    /// events are discarded. The output is unbounded: events pile up in memory
    /// for as long as the receiver is not drained.
    pub fn events(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Rescan the root directory, replacing every tracked folder.
    ///
    /// Fails while the collection is watched, and with `CollectionBusy` while
    /// another load or clear runs. Plain files are skipped; an entry that cannot
    /// be read or added is logged and skipped. Returns the number of folders
    /// added.
    pub fn load_from_filesystem(&self) -> AppResult<usize> {
        let _claim = self.inner.claim(WatchPhase::Loading)?;
        self.inner.reload()
    }

    /// Start watching the root directory (and, if requested, every anime folder).
    ///
    /// Performs the initial load, then processes notifications in a background
    /// task until `scope` is cancelled. Returns the queue on which watch errors
    /// are reported; it closes once the watch has fully stopped. A concurrent
    /// watch fails with `AlreadyWatching` without waiting for the scan.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch_filesystem(
        &self,
        scope: CancellationToken,
        also_watch_subfolders: bool,
    ) -> AppResult<ErrorReceiver> {
        Ok(self.prepare_watch(also_watch_subfolders)?.start(scope))
    }

    /// Install the watch handles and run the initial load without starting the
    /// watch task. The collection reports `is_watching()` until the returned
    /// watch is started or dropped.
    pub(crate) fn prepare_watch(&self, also_watch_subfolders: bool) -> AppResult<PendingWatch> {
        let claim = self.inner.claim(WatchPhase::Starting)?;

        let inner = &self.inner;
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        // The root watch goes in before the scan: anything created meanwhile is
        // either listed or reported, and duplicate adds are no-ops.
        let mut root_watcher = inner.backends.watchers.create(WatchSource::Root, raw_tx.clone())?;
        if let Err(err) = root_watcher.watch(&inner.path) {
            close_quietly(root_watcher, &inner.logger);
            return Err(err);
        }

        let folder_watcher = if also_watch_subfolders {
            match inner.backends.watchers.create(WatchSource::Folder, raw_tx) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    close_quietly(root_watcher, &inner.logger);
                    return Err(err);
                }
            }
        } else {
            None
        };

        if let Err(err) = inner.reload() {
            close_quietly(root_watcher, &inner.logger);
            if let Some(watcher) = folder_watcher {
                close_quietly(watcher, &inner.logger);
            }
            return Err(err);
        }

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let mut task = WatchTask {
            inner: Arc::clone(inner),
            root_watcher,
            folder_watcher,
            watched_folders: HashMap::new(),
            raw_rx,
            errors: errors_tx,
        };
        task.watch_tracked_folders();

        // From here on the pending watch resets the phase.
        claim.disarm();
        inner.watch_state().watching_folders = also_watch_subfolders;

        Ok(PendingWatch {
            task: Some(task),
            errors: errors_rx,
        })
    }

    /// Remove every tracked folder. Fails while the collection is watched.
    pub fn clear(&self) -> AppResult<()> {
        let _claim = self.inner.claim(WatchPhase::Loading)?;

        let removed = self.inner.remove_all();
        debug!(target: self.inner.logger.target(), "Removed {} anime folders from {:?}", removed, self.inner.name);

        let index = self.inner.index();
        if !index.folders.is_empty() || !index.by_name.is_empty() {
            error!(
                target: self.inner.logger.target(),
                "Failed to clear collection {:?}: {} folders remain",
                self.inner.name,
                index.folders.len()
            );
            panic!(
                "anime collection {:?} still tracks {} folders after clear",
                self.inner.name,
                index.folders.len()
            );
        }
        Ok(())
    }

    /// Look up a tracked folder by its folder name
    pub fn anime_folder(&self, name: &str) -> Option<AnimeFolder> {
        let index = self.inner.index();
        index
            .by_name
            .get(name)
            .and_then(|id| index.folders.get(id))
            .cloned()
    }

    /// Visit every tracked folder in arbitrary order until the visitor breaks.
    ///
    /// Returns false if the iteration was stopped early. The visitor runs under
    /// the collection's shared lock and must not mutate the collection.
    pub fn iterate<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&AnimeFolder) -> ControlFlow<()>,
    {
        let index = self.inner.index();
        for folder in index.folders.values() {
            if visitor(folder).is_break() {
                return false;
            }
        }
        true
    }

    /// Wait until the background watch task (if any) has stopped and released
    /// its watch handles.
    pub async fn wait(&self) {
        self.inner.tracker.wait().await;
    }
}

impl std::fmt::Debug for AnimeCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimeCollection")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("path", &self.inner.path)
            .field("folders", &self.anime_folder_count())
            .field("watching", &self.is_watching())
            .finish()
    }
}

impl CollectionInner {
    fn index(&self) -> RwLockReadGuard<'_, FolderIndex> {
        self.folders.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_mut(&self) -> RwLockWriteGuard<'_, FolderIndex> {
        self.folders.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn watch_state(&self) -> MutexGuard<'_, WatchState> {
        self.watch_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move an idle collection into `phase`. The state lock is only held for
    /// the check, so concurrent callers fail at once instead of queueing.
    fn claim(&self, phase: WatchPhase) -> AppResult<PhaseClaim<'_>> {
        let mut state = self.watch_state();
        match (state.phase, phase) {
            (WatchPhase::Idle, _) => {
                state.phase = phase;
                Ok(PhaseClaim {
                    inner: self,
                    armed: true,
                })
            }
            (WatchPhase::Loading, _) => Err(AppError::CollectionBusy),
            (_, WatchPhase::Starting) => Err(AppError::AlreadyWatching),
            _ => Err(AppError::CurrentlyWatched),
        }
    }

    fn reset_watch_state(&self) {
        let mut state = self.watch_state();
        state.phase = WatchPhase::Idle;
        state.watching_folders = false;
    }

    fn emit(&self, event: FolderEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = events.as_ref() {
            if tx.send(event).is_err() {
                debug!(target: self.logger.target(), "Event output of {:?} was dropped", self.name);
                *events = None;
            }
        }
    }

    /// Register `name` as a folder below the root.
    ///
    /// Returns the folder id and whether it was newly added; an already tracked
    /// name keeps its existing id.
    fn insert_folder(&self, name: &str) -> AppResult<(Uuid, bool)> {
        validate_folder_name(name)?;

        let mut index = self.index_mut();
        if let Some(id) = index.by_name.get(name) {
            return Ok((*id, false));
        }

        let folder = AnimeFolder::new(self.path.clone(), name);
        validate_anime_folder(&folder)?;

        let id = folder.id();
        index.by_name.insert(name.to_string(), id);
        index.folders.insert(id, folder.clone());
        self.emit(FolderEvent::added(self.id, folder));
        Ok((id, true))
    }

    fn remove_folder_by_name(&self, name: &str) -> Option<AnimeFolder> {
        let mut index = self.index_mut();
        let id = index.by_name.remove(name)?;
        let folder = index.folders.remove(&id)?;
        self.emit(FolderEvent::removed(self.id, folder.clone()));
        Some(folder)
    }

    fn remove_all(&self) -> usize {
        let mut index = self.index_mut();
        index.by_name.clear();
        let removed: Vec<AnimeFolder> = index.folders.drain().map(|(_, f)| f).collect();
        for folder in &removed {
            self.emit(FolderEvent::removed(self.id, folder.clone()));
        }
        removed.len()
    }

    fn emit_content_modified(&self, folder_id: Uuid) -> bool {
        let index = self.index();
        match index.folders.get(&folder_id) {
            Some(folder) => {
                self.emit(FolderEvent::content_modified(self.id, folder.clone()));
                true
            }
            None => false,
        }
    }

    fn reload(&self) -> AppResult<usize> {
        debug!(target: self.logger.target(), "Loading anime folders within {}", self.path.display());

        let entries = self.backends.lister.list_children(&self.path)?;
        self.remove_all();

        let mut added = 0;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(target: self.logger.target(), "Skipping unreadable entry in {}: {}", self.path.display(), err);
                    continue;
                }
            };
            if !entry.is_dir {
                debug!(target: self.logger.target(), "Ignoring file {:?}", entry.name);
                continue;
            }

            match self.insert_folder(&entry.name) {
                Ok((_, true)) => added += 1,
                Ok((_, false)) => {}
                Err(err) => {
                    warn!(target: self.logger.target(), "Failed to add anime folder {:?}: {}", entry.name, err)
                }
            }
        }

        info!(target: self.logger.target(), "{} anime folders loaded for collection {:?}", added, self.name);
        Ok(added)
    }
}

/// Returns the collection to idle when dropped, unless disarmed
struct PhaseClaim<'a> {
    inner: &'a CollectionInner,
    armed: bool,
}

impl PhaseClaim<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PhaseClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.reset_watch_state();
        }
    }
}

/// A watch whose handles are installed and whose initial load is done, but
/// whose task has not been spawned yet. Dropping it closes the handles and
/// returns the collection to idle.
pub(crate) struct PendingWatch {
    task: Option<WatchTask>,
    errors: ErrorReceiver,
}

impl PendingWatch {
    /// Spawn the watch task; it runs until `scope` is cancelled
    pub(crate) fn start(mut self, scope: CancellationToken) -> ErrorReceiver {
        let errors = std::mem::replace(&mut self.errors, mpsc::unbounded_channel().1);
        if let Some(task) = self.task.take() {
            let inner = Arc::clone(&task.inner);
            let watching_folders = {
                let mut state = inner.watch_state();
                state.phase = WatchPhase::Watching;
                state.watching_folders
            };
            info!(
                target: inner.logger.target(),
                "Watching collection {:?} at {} (per-folder watches: {})",
                inner.name,
                inner.path.display(),
                watching_folders
            );
            inner.tracker.spawn(task.run(scope));
        }
        errors
    }
}

impl Drop for PendingWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!(target: task.inner.logger.target(), "Abandoning watch start of {:?}", task.inner.name);
            task.shutdown();
        }
    }
}

fn close_quietly(watcher: Box<dyn PathWatcher>, logger: &Logger) {
    if let Err(err) = watcher.close() {
        warn!(target: logger.target(), "Failed to close watch handle: {}", err);
    }
}

// ============================================================================
// WATCH TASK
// ============================================================================

/// Owns the native watch handles of one collection for the duration of a watch
struct WatchTask {
    inner: Arc<CollectionInner>,
    root_watcher: Box<dyn PathWatcher>,
    folder_watcher: Option<Box<dyn PathWatcher>>,
    /// Full path -> folder id, for every folder with a live per-folder watch
    watched_folders: HashMap<PathBuf, Uuid>,
    raw_rx: NotificationReceiver,
    errors: mpsc::UnboundedSender<AppError>,
}

impl WatchTask {
    async fn run(mut self, scope: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                raw = self.raw_rx.recv() => match raw {
                    Some(raw) => self.handle(raw),
                    None => {
                        // Every handle dropped its sender; keep the watch alive until cancelled.
                        scope.cancelled().await;
                        break;
                    }
                },
            }
        }
        self.shutdown();
    }

    fn handle(&mut self, raw: RawNotification) {
        match (raw.source, raw.outcome) {
            (WatchSource::Root, Ok(notification)) => self.handle_root(notification),
            (WatchSource::Folder, Ok(notification)) => self.handle_folder(notification),
            (WatchSource::Root, Err(err)) => self.report(err),
            (WatchSource::Folder, Err(err)) => {
                warn!(target: self.inner.logger.target(), "Per-folder watch error in {:?}: {}", self.inner.name, err)
            }
        }
    }

    fn handle_root(&mut self, notification: FsNotification) {
        if notification.path.parent() != Some(self.inner.path.as_path()) {
            debug!(target: self.inner.logger.target(), "Ignoring notification outside the root: {:?}", notification);
            return;
        }
        let name = match entry_name(&notification.path) {
            Ok(name) => name,
            Err(err) => {
                debug!(target: self.inner.logger.target(), "Ignoring notification: {}", err);
                return;
            }
        };

        match notification.operation {
            FsOperation::Remove | FsOperation::Rename => self.remove_folder(&name),
            FsOperation::Create => self.add_folder(&notification.path, &name),
            FsOperation::Write => {}
        }
    }

    fn handle_folder(&mut self, notification: FsNotification) {
        if notification.operation == FsOperation::Write {
            return;
        }

        // Skipping the path itself leaves the folder's own removal to the root watch.
        let owner = notification
            .path
            .ancestors()
            .skip(1)
            .find_map(|ancestor| self.watched_folders.get(ancestor).copied());

        match owner {
            Some(folder_id) => {
                if !self.inner.emit_content_modified(folder_id) {
                    debug!(target: self.inner.logger.target(), "Content change for untracked folder {}", folder_id);
                }
            }
            None => {
                debug!(target: self.inner.logger.target(), "No tracked folder owns {}", notification.path.display())
            }
        }
    }

    fn add_folder(&mut self, path: &Path, name: &str) {
        // The entry may already be gone again, or be a plain file.
        if !is_directory(path) {
            debug!(target: self.inner.logger.target(), "Ignoring created entry {}: not a directory", path.display());
            return;
        }

        match self.inner.insert_folder(name) {
            Ok((id, true)) => {
                info!(target: self.inner.logger.target(), "Anime folder {:?} added to {:?}", name, self.inner.name);
                self.watch_folder(self.inner.path.join(name), id);
            }
            Ok((_, false)) => {
                debug!(target: self.inner.logger.target(), "Anime folder {:?} is already tracked", name)
            }
            Err(err) => {
                warn!(target: self.inner.logger.target(), "Failed to add anime folder {:?}: {}", name, err)
            }
        }
    }

    fn remove_folder(&mut self, name: &str) {
        match self.inner.remove_folder_by_name(name) {
            Some(folder) => {
                info!(target: self.inner.logger.target(), "Anime folder {:?} removed from {:?}", name, self.inner.name);
                self.unwatch_folder(&folder.full_path());
            }
            // Already handled by an earlier notification.
            None => debug!(target: self.inner.logger.target(), "Anime folder {:?} is not tracked", name),
        }
    }

    fn watch_tracked_folders(&mut self) {
        if self.folder_watcher.is_none() {
            return;
        }
        let tracked: Vec<(PathBuf, Uuid)> = self
            .inner
            .index()
            .folders
            .values()
            .map(|folder| (folder.full_path(), folder.id()))
            .collect();

        for (path, id) in tracked {
            self.watch_folder(path, id);
        }
    }

    fn watch_folder(&mut self, path: PathBuf, folder_id: Uuid) {
        let Some(watcher) = self.folder_watcher.as_mut() else {
            return;
        };
        match watcher.watch(&path) {
            Ok(()) => {
                self.watched_folders.insert(path, folder_id);
            }
            Err(err) => {
                warn!(target: self.inner.logger.target(), "Could not watch anime folder {}: {}", path.display(), err)
            }
        }
    }

    fn unwatch_folder(&mut self, path: &Path) {
        if self.watched_folders.remove(path).is_none() {
            return;
        }
        let Some(watcher) = self.folder_watcher.as_mut() else {
            return;
        };
        if let Err(err) = watcher.unwatch(path) {
            if err.is_missing_path() {
                debug!(target: self.inner.logger.target(), "Watch on {} was already gone", path.display());
            } else {
                warn!(target: self.inner.logger.target(), "Could not unwatch anime folder {}: {}", path.display(), err);
            }
        }
    }

    fn report(&self, err: AppError) {
        warn!(target: self.inner.logger.target(), "Watch error in collection {:?}: {}", self.inner.name, err);
        // Nobody listening is fine; the watch keeps running either way.
        let _ = self.errors.send(err);
    }

    fn shutdown(self) {
        let WatchTask {
            inner,
            root_watcher,
            folder_watcher,
            errors,
            ..
        } = self;

        if let Some(watcher) = folder_watcher {
            if let Err(err) = watcher.close() {
                warn!(target: inner.logger.target(), "Failed to close per-folder watches of {:?}: {}", inner.name, err);
                let _ = errors.send(err);
            }
        }
        if let Err(err) = root_watcher.close() {
            warn!(target: inner.logger.target(), "Failed to close root watch of {:?}: {}", inner.name, err);
            let _ = errors.send(err);
        }

        inner.reset_watch_state();
        info!(target: inner.logger.target(), "Stopped watching collection {:?}", inner.name);
    }
}
