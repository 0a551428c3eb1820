// src/infrastructure/logging.rs
//
// Component loggers.
//
// Every component receives its Logger through its constructor. The logger only
// carries the log target; records still go through the `log` facade, so the
// binary decides where they end up.

use std::sync::Arc;

/// Root target used when no other module name is given
pub const ROOT_TARGET: &str = "anilibrary";

/// Named logging handle passed explicitly into components
#[derive(Debug, Clone)]
pub struct Logger {
    target: Arc<str>,
}

impl Logger {
    pub fn new(module: &str) -> Self {
        Self {
            target: Arc::from(module),
        }
    }

    /// Logger for a sub-component, e.g. `anilibrary::library::collection`
    pub fn child(&self, module: &str) -> Self {
        Self {
            target: Arc::from(format!("{}::{}", self.target, module)),
        }
    }

    /// Target to hand to the `log` macros
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(ROOT_TARGET)
    }
}
