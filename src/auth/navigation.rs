use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Black-box "navigate to path" capability supplied by the host application
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Navigator that only logs targets, for hosts without a router
#[derive(Debug, Default)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn navigate(&self, path: &str) {
        info!(path = %path, "Navigation requested");
    }
}

/// Navigator that remembers every target, in order
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<String> {
        self.visits().pop()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        self.visits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_string());
    }
}
