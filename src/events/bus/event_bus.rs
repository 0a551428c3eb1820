// events/bus/event_bus.rs
//
// Broadcast bus for folder events.
//
// DESIGN PRINCIPLES:
// 1. Every subscriber gets every event, in the order the bus receives them
// 2. A slow subscriber slows the publisher down (bounded queues, no dropping)
// 3. A cancelled subscriber never blocks the publisher
// 4. Observable - every broadcast is logged
// 5. No lock is held while pushing into a subscriber queue

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::types::{DomainEvent, FolderEvent};
use crate::infrastructure::Logger;

/// Receiving end of a subscription
pub type SubscriberReceiver = mpsc::Receiver<FolderEvent>;

#[derive(Clone)]
struct Subscriber {
    id: Uuid,
    events: mpsc::Sender<FolderEvent>,
    scope: CancellationToken,
}

/// The Event Bus
///
/// Holds the live subscribers and fans every broadcast event out to them.
/// Cheap to clone; clones share subscribers and the event log.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,

    /// Recent broadcasts (for debugging), oldest first
    event_log: Arc<Mutex<VecDeque<EventLogEntry>>>,
    log_capacity: usize,

    logger: Logger,
}

/// A logged broadcast for debugging and tracing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogEntry {
    pub event_type: String,
    pub event_id: String,
    pub occurred_at: String,
    pub subscriber_count: usize,
}

impl EventBus {
    /// Create a bus keeping at most `log_capacity` log entries
    pub fn new(log_capacity: usize, logger: Logger) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            event_log: Arc::new(Mutex::new(VecDeque::with_capacity(log_capacity.min(1024)))),
            log_capacity,
            logger,
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self) -> MutexGuard<'_, VecDeque<EventLogEntry>> {
        self.event_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber whose queue holds `buffer` events beyond the replay.
    ///
    /// `replay` runs while the subscriber registry is locked, so no broadcast can
    /// slip between the replay snapshot and the registration. Replayed events are
    /// queued first.
    pub fn register<F>(
        &self,
        buffer: usize,
        scope: CancellationToken,
        replay: F,
    ) -> (Uuid, SubscriberReceiver)
    where
        F: FnOnce() -> Vec<FolderEvent>,
    {
        let id = Uuid::new_v4();
        let mut subscribers = self.subscribers();

        let replay = replay();
        let replayed = replay.len();
        let capacity = buffer
            .max(1)
            .saturating_add(replayed)
            .min(Semaphore::MAX_PERMITS);
        let (tx, rx) = mpsc::channel(capacity);
        for event in replay {
            // Sized for the replay, so this never fails for lack of room.
            if tx.try_send(event).is_err() {
                break;
            }
        }

        subscribers.push(Subscriber {
            id,
            events: tx,
            scope,
        });
        drop(subscribers);

        debug!(target: self.logger.target(), "Subscriber {} registered ({} replayed events)", id, replayed);
        (id, rx)
    }

    /// Remove a subscriber and close its queue. Returns false if it was not registered.
    pub fn unregister(&self, id: Uuid) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        drop(subscribers);

        if removed {
            debug!(target: self.logger.target(), "Subscriber {} unregistered", id);
        }
        removed
    }

    /// Deliver `event` to every live subscriber.
    ///
    /// Waits while a subscriber's queue is full; gives up on that subscriber
    /// only once its scope is cancelled or its receiver is gone.
    pub async fn broadcast(&self, event: FolderEvent) {
        let subscribers: Vec<Subscriber> = self.subscribers().clone();
        self.record(&event, subscribers.len());

        trace!(
            target: self.logger.target(),
            "[EVENT] {} (id: {}) | {} subscribers",
            event.event_type(),
            event.event_id(),
            subscribers.len()
        );

        for subscriber in subscribers {
            if subscriber.scope.is_cancelled() {
                continue;
            }
            tokio::select! {
                biased;
                _ = subscriber.scope.cancelled() => {
                    debug!(target: self.logger.target(), "Subscriber {} cancelled during delivery", subscriber.id);
                }
                sent = subscriber.events.send(event.clone()) => {
                    if sent.is_err() {
                        debug!(target: self.logger.target(), "Subscriber {} dropped its receiver", subscriber.id);
                    }
                }
            }
        }
    }

    fn record(&self, event: &FolderEvent, subscriber_count: usize) {
        if self.log_capacity == 0 {
            return;
        }
        let mut log = self.log();
        while log.len() >= self.log_capacity {
            log.pop_front();
        }
        log.push_back(EventLogEntry {
            event_type: event.event_type().to_string(),
            event_id: event.event_id().to_string(),
            occurred_at: event.occurred_at().to_rfc3339(),
            subscriber_count,
        });
    }

    /// Get the event log (for debugging)
    pub fn event_log(&self) -> Vec<EventLogEntry> {
        self.log().iter().cloned().collect()
    }

    /// Clear the event log
    pub fn clear_event_log(&self) {
        self.log().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("log_capacity", &self.log_capacity)
            .finish()
    }
}
