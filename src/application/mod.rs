// src/application/mod.rs
//
// Application Layer
//
// ARCHITECTURE:
// - Sits between the binary and the services
// - Loads configuration and wires the services together
// - Holds no filesystem logic of its own

pub mod config;
pub mod state;

pub use config::{AppConfig, CollectionConfig};
pub use state::AppState;
