// src/application/state.rs

use log::{info, warn};

use crate::application::config::AppConfig;
use crate::error::AppResult;
use crate::infrastructure::Logger;
use crate::services::{AnimeLibrary, TaskPlanner};

/// Application state shared by the binary.
/// Services are initialized here from the loaded configuration.
#[derive(Debug)]
pub struct AppState {
    pub library: AnimeLibrary,
    pub task_planner: TaskPlanner,
}

impl AppState {
    /// Build the library and register every configured collection.
    ///
    /// A collection that cannot be added is logged and skipped.
    pub fn initialize(config: &AppConfig, logger: &Logger) -> Self {
        let library = AnimeLibrary::new(config.library.clone(), logger.child("library"));

        for collection in &config.collections {
            match library.add_collection(&collection.name, &collection.path) {
                Ok(id) => info!(
                    target: logger.target(),
                    "Collection {:?} registered ({})",
                    collection.name,
                    id
                ),
                Err(err) => warn!(
                    target: logger.target(),
                    "Skipping collection {:?} at {}: {}",
                    collection.name,
                    collection.path.display(),
                    err
                ),
            }
        }

        let task_planner = TaskPlanner::new(library.clone(), logger.child("taskplanner"));
        Self {
            library,
            task_planner,
        }
    }

    /// Remove every collection and wait for all background tasks.
    ///
    /// The watch and subscription scopes must already be cancelled.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.library.clear();
        self.task_planner.wait().await;
        self.library.wait().await
    }
}
