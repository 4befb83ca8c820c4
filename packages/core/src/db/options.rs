use std::time::Duration;

/// Tuning shared by every store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Upper bound for a single store operation
    pub timeout: Duration,
    /// Capacity of the change-event broadcast channel
    pub event_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            event_capacity: 256,
        }
    }
}
