//! Forks core configuration.

use std::time::Duration;

/// Configuration for the forks reactor.
#[derive(Debug, Clone)]
pub struct ForksConfig {
    /// Number of views above the finalized view considered "active".
    ///
    /// Bounds how much out-of-order traffic the pending buffer absorbs.
    pub active_view_window: u64,

    /// Pending buffer capacity as a multiple of the active view window.
    pub pending_window_multiple: usize,

    /// Pending proposals older than this are dropped on cleanup.
    pub pending_max_age: Duration,
}

impl Default for ForksConfig {
    fn default() -> Self {
        Self {
            active_view_window: 100,
            pending_window_multiple: 4,
            pending_max_age: Duration::from_secs(60),
        }
    }
}

impl ForksConfig {
    /// Maximum number of proposals held in the pending buffer.
    pub fn pending_capacity(&self) -> usize {
        (self.active_view_window as usize).saturating_mul(self.pending_window_multiple)
    }

    /// Set the active view window.
    pub fn with_active_view_window(mut self, window: u64) -> Self {
        self.active_view_window = window;
        self
    }

    /// Set the pending capacity multiple.
    pub fn with_pending_window_multiple(mut self, multiple: usize) -> Self {
        self.pending_window_multiple = multiple;
        self
    }

    /// Set the pending age bound.
    pub fn with_pending_max_age(mut self, max_age: Duration) -> Self {
        self.pending_max_age = max_age;
        self
    }
}
