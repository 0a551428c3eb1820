// src/services/mod.rs
//
// Services Module - Orchestration Layer

pub mod anime_collection;
pub mod anime_library;
pub mod task_planner;

#[cfg(test)]
mod anime_collection_tests;
#[cfg(test)]
mod task_planner_tests;

// Re-export all services and their types
pub use anime_collection::{AnimeCollection, ErrorReceiver, EventReceiver};

pub use anime_library::{AnimeLibrary, LibraryConfig};

pub use task_planner::{Task, TaskPlanner, TaskType};
