//! Message counter and the status route seam.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Path the external HTTP layer serves the status report on.
pub const STATUS_ROUTE: &str = "/messagestotal";

/// Count of messages observed since startup, plus the last time anything
/// happened on the connection. Best-effort telemetry, never persisted.
#[derive(Debug)]
pub struct MessageCounter {
    total: AtomicU64,
    last_active: Mutex<DateTime<Utc>>,
}

impl Default for MessageCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCounter {
    /// Counter at zero, last activity now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            last_active: Mutex::new(Utc::now()),
        }
    }

    /// Record `count` observed messages.
    pub fn record(&self, count: u64) {
        self.total.fetch_add(count, Ordering::Relaxed);
        self.touch();
    }

    /// Mark activity without counting a message.
    pub fn touch(&self) {
        *self.last_active.lock() = Utc::now();
    }

    /// Messages observed so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Time of the last recorded activity.
    #[must_use]
    pub fn last_active(&self) -> DateTime<Utc> {
        *self.last_active.lock()
    }

    /// Snapshot for the status route.
    #[must_use]
    pub fn report(&self) -> StatusReport {
        StatusReport {
            message_total: self.total(),
        }
    }
}

/// Body served by the status route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Messages observed since startup.
    #[serde(rename = "messageTotal")]
    pub message_total: u64,
}

/// External HTTP layer that serves the status route.
pub trait StatusRegistrar: Send + Sync {
    /// Serve `route`, reading the counter on every request.
    fn register_status(&self, route: &str, counter: Arc<MessageCounter>);
}
