//! The seam to the messaging transport.
//!
//! The transport library owns the wire protocol and encryption. The
//! supervisor only asks it for the latest protocol version, hands it a
//! fully assembled [`SocketOptions`], and then drives the returned
//! [`Socket`] through its event bus.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::credentials::{AuthCredentials, KeyWrite};
use crate::error::TransportResult;
use crate::event::EventStream;
use crate::message::MessageKey;

/// Protocol version descriptor published by the transport library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// Version components, most significant first.
    pub parts: [u32; 3],
    /// Whether the descriptor came from the live endpoint rather than a
    /// bundled fallback.
    pub is_latest: bool,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.parts;
        write!(f, "{major}.{minor}.{patch}")
    }
}

/// Presence advertised once the connection opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Shown as online.
    Available,
    /// Hidden.
    Unavailable,
}

impl Presence {
    /// Presence for the configured always-online flag.
    #[must_use]
    pub const fn from_always_online(always_online: bool) -> Self {
        if always_online {
            Self::Available
        } else {
            Self::Unavailable
        }
    }
}

/// Per-device signal key storage handed to the transport.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Read the keys `ids` of `category`; missing keys are omitted.
    async fn get(&self, category: &str, ids: &[String]) -> TransportResult<HashMap<String, Value>>;

    /// Apply writes and deletions.
    async fn set(&self, writes: Vec<KeyWrite>) -> TransportResult<()>;
}

/// Lookup the transport uses to re-fetch messages it must resend or
/// decrypt again. Never fails: unknown messages yield a placeholder.
pub trait MessageLookup: Send + Sync {
    /// Body for `key`, or an empty placeholder.
    fn get_message(&self, key: &MessageKey) -> Value;
}

/// Empty message body returned for unknown lookups.
#[must_use]
pub fn empty_message() -> Value {
    serde_json::json!({ "conversation": "" })
}

/// Bounded per-message retry counter for outbound resends.
///
/// Oldest entries are evicted first once `capacity` is reached.
#[derive(Debug)]
pub struct RetryCounterCache {
    capacity: usize,
    inner: Mutex<RetryCounters>,
}

#[derive(Debug, Default)]
struct RetryCounters {
    counts: HashMap<String, u32>,
    order: VecDeque<String>,
}

impl RetryCounterCache {
    /// Create a cache holding at most `capacity` message ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RetryCounters::default()),
        }
    }

    /// Increment and return the retry count for `message_id`.
    pub fn increment(&self, message_id: &str) -> u32 {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.counts.get_mut(message_id) {
            *count = count.saturating_add(1);
            return *count;
        }
        while inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.counts.remove(&oldest);
            }
        }
        inner.order.push_back(message_id.to_string());
        inner.counts.insert(message_id.to_string(), 1);
        1
    }

    /// Current retry count for `message_id`.
    #[must_use]
    pub fn get(&self, message_id: &str) -> Option<u32> {
        self.inner.lock().counts.get(message_id).copied()
    }

    /// Forget `message_id` once delivered.
    pub fn remove(&self, message_id: &str) {
        let mut inner = self.inner.lock();
        if inner.counts.remove(message_id).is_some() {
            inner.order.retain(|id| id != message_id);
        }
    }

    /// Number of tracked ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().counts.len()
    }

    /// Check if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything the transport needs to build a socket.
#[derive(Clone)]
pub struct SocketOptions {
    /// Protocol version to speak.
    pub version: ProtocolVersion,
    /// Current `creds.json` contents.
    pub credentials: AuthCredentials,
    /// Signal key storage (cached).
    pub keys: Arc<dyn KeyStore>,
    /// Outbound retry counters, shared across reconnects.
    pub retry_cache: Arc<RetryCounterCache>,
    /// Generate rich link previews for outbound links.
    pub link_previews: bool,
    /// Message re-fetch callback backed by the message store.
    pub message_lookup: Arc<dyn MessageLookup>,
    /// Per-query timeout; `None` leaves queries unbounded.
    pub query_timeout: Option<Duration>,
}

impl fmt::Debug for SocketOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketOptions")
            .field("version", &self.version)
            .field("registered", &self.credentials.registered)
            .field("link_previews", &self.link_previews)
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

/// Factory for sockets; one per process.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the latest protocol version descriptor.
    async fn latest_version(&self) -> TransportResult<ProtocolVersion>;

    /// Construct a socket and start its handshake.
    async fn connect(&self, options: SocketOptions) -> TransportResult<Arc<dyn Socket>>;
}

/// A live connection. Lent to the store binding and the dispatch layer
/// for the lifetime of one connection cycle.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Subscribe to this socket's events.
    fn events(&self) -> EventStream;

    /// Whether the session completed pairing.
    fn is_registered(&self) -> bool;

    /// Advertise presence.
    async fn send_presence(&self, presence: Presence) -> TransportResult<()>;

    /// Request a pairing code for `phone_number` (digits only).
    async fn request_pairing_code(&self, phone_number: &str) -> TransportResult<String>;

    /// Log out of the remote session.
    async fn logout(&self) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_cache_counts_and_evicts_oldest() {
        let cache = RetryCounterCache::new(2);
        assert_eq!(cache.increment("a"), 1);
        assert_eq!(cache.increment("a"), 2);
        assert_eq!(cache.increment("b"), 1);
        assert_eq!(cache.increment("c"), 1);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(1));
        assert_eq!(cache.get("c"), Some(1));
    }

    #[test]
    fn retry_cache_remove() {
        let cache = RetryCounterCache::new(4);
        cache.increment("a");
        cache.remove("a");
        assert!(cache.is_empty());
        assert_eq!(cache.increment("a"), 1);
    }

    #[test]
    fn version_display() {
        let version = ProtocolVersion {
            parts: [2, 3000, 1_015_901_307],
            is_latest: true,
        };
        assert_eq!(version.to_string(), "2.3000.1015901307");
    }

    #[test]
    fn presence_follows_flag() {
        assert_eq!(Presence::from_always_online(true), Presence::Available);
        assert_eq!(Presence::from_always_online(false), Presence::Unavailable);
    }
}
