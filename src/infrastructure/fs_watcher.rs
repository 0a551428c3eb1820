// src/infrastructure/fs_watcher.rs
//
// Raw filesystem notification capability.
//
// A thin wrapper around `notify`: native events are translated into
// (path, operation) pairs and handed to the owning watch task through an
// unbounded channel.
//
// CRITICAL RULES:
// - The notify callback never blocks. The watch task adds and removes watched
//   paths on the same backend that feeds it, so a blocking hand-off could
//   deadlock the two against each other.
// - Watch handles are mutated only by the task that owns them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};

/// Filesystem operation reported for a single path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOperation {
    Create,
    Remove,
    /// The path was renamed away; it no longer exists under this name
    Rename,
    Write,
}

/// A translated filesystem notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsNotification {
    pub path: PathBuf,
    pub operation: FsOperation,
}

impl FsNotification {
    pub fn new(path: impl Into<PathBuf>, operation: FsOperation) -> Self {
        Self {
            path: path.into(),
            operation,
        }
    }
}

/// Which watch handle produced a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchSource {
    /// The collection root
    Root,
    /// The per-folder watches of the tracked anime folders
    Folder,
}

/// Message delivered from a watch handle to its watch task
#[derive(Debug)]
pub struct RawNotification {
    pub source: WatchSource,
    pub outcome: AppResult<FsNotification>,
}

impl RawNotification {
    pub fn event(source: WatchSource, notification: FsNotification) -> Self {
        Self {
            source,
            outcome: Ok(notification),
        }
    }

    pub fn error(source: WatchSource, error: AppError) -> Self {
        Self {
            source,
            outcome: Err(error),
        }
    }
}

pub type NotificationSender = mpsc::UnboundedSender<RawNotification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<RawNotification>;

/// A native watch handle. Paths are watched non-recursively.
pub trait PathWatcher: Send {
    fn watch(&mut self, path: &Path) -> AppResult<()>;

    fn unwatch(&mut self, path: &Path) -> AppResult<()>;

    /// Release every watched path and the handle itself
    fn close(self: Box<Self>) -> AppResult<()>;
}

/// Creates watch handles that report into `sink`
pub trait WatcherFactory: Send + Sync {
    fn create(&self, source: WatchSource, sink: NotificationSender)
        -> AppResult<Box<dyn PathWatcher>>;
}

// ============================================================================
// NOTIFY BACKEND
// ============================================================================

/// Default factory producing `notify::RecommendedWatcher` handles
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyWatcherFactory;

impl WatcherFactory for NotifyWatcherFactory {
    fn create(
        &self,
        source: WatchSource,
        sink: NotificationSender,
    ) -> AppResult<Box<dyn PathWatcher>> {
        let watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for notification in translate_event(&event) {
                        // The receiving task is gone; nothing left to notify.
                        if sink.send(RawNotification::event(source, notification)).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    let _ = sink.send(RawNotification::error(source, AppError::Watch(err)));
                }
            },
        )?;

        Ok(Box::new(NotifyPathWatcher {
            watcher,
            paths: HashSet::new(),
        }))
    }
}

struct NotifyPathWatcher {
    watcher: notify::RecommendedWatcher,
    paths: HashSet<PathBuf>,
}

impl PathWatcher for NotifyPathWatcher {
    fn watch(&mut self, path: &Path) -> AppResult<()> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        self.paths.insert(path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> AppResult<()> {
        self.paths.remove(path);
        self.watcher.unwatch(path)?;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> AppResult<()> {
        let mut first_error = None;
        for path in std::mem::take(&mut self.paths) {
            if let Err(err) = self.watcher.unwatch(&path) {
                let err = AppError::Watch(err);
                // Deleted directories lose their native watch on their own.
                if !err.is_missing_path() && first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        // Dropping the watcher stops the notify stream.
        drop(self);
        first_error.map_or(Ok(()), Err)
    }
}

/// Translate a native notify event into per-path operations.
///
/// Renames are split: the old name is reported as `Rename` and the new name as
/// `Create`. Backends that cannot tell the two apart (`RenameMode::Any`) are
/// resolved by checking whether the path still exists.
pub fn translate_event(event: &notify::Event) -> Vec<FsNotification> {
    let paths = &event.paths;
    match &event.kind {
        EventKind::Create(_) => with_operation(paths, FsOperation::Create),
        EventKind::Remove(_) => with_operation(paths, FsOperation::Remove),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => with_operation(&paths[..paths.len().min(1)], FsOperation::Rename),
            RenameMode::To => with_operation(&paths[..paths.len().min(1)], FsOperation::Create),
            RenameMode::Both => {
                let mut out = Vec::with_capacity(2);
                if let Some(from) = paths.first() {
                    out.push(FsNotification::new(from.clone(), FsOperation::Rename));
                }
                if let Some(to) = paths.get(1) {
                    out.push(FsNotification::new(to.clone(), FsOperation::Create));
                }
                out
            }
            _ => paths
                .iter()
                .map(|p| {
                    let operation = if p.exists() {
                        FsOperation::Create
                    } else {
                        FsOperation::Rename
                    };
                    FsNotification::new(p.clone(), operation)
                })
                .collect(),
        },
        EventKind::Modify(_) => with_operation(paths, FsOperation::Write),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn with_operation(paths: &[PathBuf], operation: FsOperation) -> Vec<FsNotification> {
    paths
        .iter()
        .map(|p| FsNotification::new(p.clone(), operation))
        .collect()
}

// ============================================================================
// TEST BACKEND
// ============================================================================
