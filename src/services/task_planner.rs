// src/services/task_planner.rs
//
// Task Planner - turns library events into work items
//
// CRITICAL RULES:
// - Subscribes to the library with replay, so every existing folder gets a task
// - At most one pending task per anime folder
// - Every task carries its own cancellation token, derived from the planner scope
// - Does NOT execute tasks; consumers take them with `take_next`

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::domain::AnimeFolder;
use crate::error::{AppError, AppResult};
use crate::events::{FolderEvent, FolderEventType, SubscriberReceiver};
use crate::infrastructure::Logger;
use crate::services::anime_library::AnimeLibrary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    ProcessAnimeFolder,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::ProcessAnimeFolder => f.write_str("Process anime folder"),
        }
    }
}

/// A unit of work scheduled for one anime folder
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub collection_id: Uuid,
    pub anime_folder: AnimeFolder,
    pub created_at: DateTime<Utc>,
    token: CancellationToken,
}

impl Task {
    fn new(task_type: TaskType, collection_id: Uuid, anime_folder: AnimeFolder, token: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            collection_id,
            anime_folder,
            created_at: Utc::now(),
            token,
        }
    }

    /// Cancelled when the folder changes or disappears, or the planner stops
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.task_type, self.anime_folder)
    }
}

/// Schedules a `ProcessAnimeFolder` task for every folder the library reports
#[derive(Clone)]
pub struct TaskPlanner {
    inner: Arc<PlannerInner>,
}

struct PlannerInner {
    library: AnimeLibrary,
    running: Mutex<bool>,
    queue: Mutex<TaskQueue>,
    tracker: TaskTracker,
    logger: Logger,
}

impl TaskPlanner {
    pub fn new(library: AnimeLibrary, logger: Logger) -> Self {
        let tracker = TaskTracker::new();
        tracker.close();

        Self {
            inner: Arc::new(PlannerInner {
                library,
                running: Mutex::new(false),
                queue: Mutex::new(TaskQueue::default()),
                tracker,
                logger,
            }),
        }
    }

    /// Subscribe to the library and plan tasks until `scope` is cancelled
    pub fn start(&self, scope: CancellationToken) -> AppResult<()> {
        let inner = &self.inner;
        let mut running = inner.running();
        if *running {
            return Err(AppError::AlreadyRunning);
        }
        *running = true;

        let events = inner.library.subscribe(scope.clone(), true);
        inner.tracker.spawn(Arc::clone(inner).process_events(events, scope));

        info!(target: inner.logger.target(), "Task planner started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue().pending.len()
    }

    /// Pending tasks, oldest first
    pub fn pending_tasks(&self) -> Vec<Task> {
        self.inner.queue().pending.iter().cloned().collect()
    }

    /// Remove and return the oldest pending task
    pub fn take_next(&self) -> Option<Task> {
        self.inner.queue().pending.pop_front()
    }

    /// Wait until the planner has stopped processing events
    pub async fn wait(&self) {
        self.inner.tracker.wait().await;
    }
}

impl std::fmt::Debug for TaskPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPlanner")
            .field("running", &self.is_running())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl PlannerInner {
    fn running(&self) -> MutexGuard<'_, bool> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self) -> MutexGuard<'_, TaskQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn process_events(self: Arc<Self>, mut events: SubscriberReceiver, scope: CancellationToken) {
        // The subscription closes once the scope is cancelled.
        while let Some(event) = events.recv().await {
            self.process_event(event, &scope);
        }

        let dropped: Vec<Task> = {
            let mut queue = self.queue();
            queue.known.clear();
            queue.pending.drain(..).collect()
        };
        for task in &dropped {
            task.token.cancel();
        }
        *self.running() = false;
        info!(target: self.logger.target(), "Task planner stopped ({} pending tasks dropped)", dropped.len());
    }

    fn process_event(&self, event: FolderEvent, scope: &CancellationToken) {
        debug!(target: self.logger.target(), "Processing event {:?}: {}", event.event_type, event);
        let folder_id = event.anime_folder.id();

        let mut queue = self.queue();
        match event.event_type {
            FolderEventType::FolderAdded => {
                // Replayed and live events may report the same folder twice.
                if !queue.known.insert(folder_id) {
                    return;
                }
                let task = Task::new(
                    TaskType::ProcessAnimeFolder,
                    event.collection_id,
                    event.anime_folder,
                    scope.child_token(),
                );
                info!(target: self.logger.target(), "Scheduled {}", task);
                queue.pending.push_back(task);
            }
            FolderEventType::FolderContentModified => {
                queue.known.insert(folder_id);
                queue.cancel_for_folder(folder_id);
                let task = Task::new(
                    TaskType::ProcessAnimeFolder,
                    event.collection_id,
                    event.anime_folder,
                    scope.child_token(),
                );
                info!(target: self.logger.target(), "Rescheduled {}", task);
                queue.pending.push_back(task);
            }
            FolderEventType::FolderRemoved => {
                queue.known.remove(&folder_id);
                if queue.cancel_for_folder(folder_id) > 0 {
                    info!(target: self.logger.target(), "Dropped tasks of removed folder {}", event.anime_folder.folder_name());
                }
            }
        }
    }
}

#[derive(Default)]
struct TaskQueue {
    /// Oldest first
    pending: VecDeque<Task>,
    /// Folders that already had a task scheduled
    known: HashSet<Uuid>,
}

impl TaskQueue {
    fn cancel_for_folder(&mut self, folder_id: Uuid) -> usize {
        let before = self.pending.len();
        self.pending.retain(|task| {
            if task.anime_folder.id() == folder_id {
                task.token.cancel();
                false
            } else {
                true
            }
        });
        before - self.pending.len()
    }
}
