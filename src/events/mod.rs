// src/events/mod.rs
//
// Folder Event System - Public API
//
// Collections emit folder events; the library relays them through the bus
// to every subscriber.

pub mod bus;
pub mod types;

// ============================================================================
// PUBLIC EXPORTS - Event Types and Bus Only
// ============================================================================

pub use types::{DomainEvent, FolderEvent, FolderEventType};

pub use bus::{EventBus, EventLogEntry, SubscriberReceiver};
