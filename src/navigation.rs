//! Navigation capability injected into the synchronizer
//!
//! The synchronizer never talks to a router directly. Hosts pass anything
//! implementing `Navigator`, including a plain closure.

use std::sync::Mutex;

/// Opens a route in the host application
///
/// Implementations should treat navigating to the current route as a no-op.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn navigate(&self, path: &str) {
        self(path)
    }
}

/// Navigator that records every requested route
///
/// Useful in tests and for hosts that drain navigation requests on their own
/// schedule.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes requested so far, oldest first
    pub fn visits(&self) -> Vec<String> {
        self.visits
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Number of navigation requests
    pub fn count(&self) -> usize {
        self.visits.lock().map(|v| v.len()).unwrap_or(0)
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, path: &str) {
        match self.visits.lock() {
            Ok(mut visits) => visits.push(path.to_string()),
            Err(e) => tracing::warn!(path, error = %e, "Navigation log poisoned"),
        }
    }
}
