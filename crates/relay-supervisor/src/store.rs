//! Message/session store: an in-memory snapshot of chats and messages fed
//! by socket events and periodically flushed to a JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use relay_core::transport::empty_message;
use relay_core::{
    ChatMetadata, EventStream, MessageKey, MessageLookup, SocketEvent, Subscription, WireMessage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::persist::{read_optional, write_atomic};

/// Literal file content that stands for an empty store.
pub const EMPTY_SENTINEL: &str = "{}";

/// Serialized store contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Chats by identifier.
    #[serde(default)]
    pub chats: BTreeMap<String, ChatMetadata>,
    /// Messages by chat, in arrival order.
    #[serde(default)]
    pub messages: BTreeMap<String, Vec<WireMessage>>,
}

impl StoreSnapshot {
    /// Total number of stored messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }

    /// Stored record for a message.
    #[must_use]
    pub fn message(&self, chat: &str, id: &str) -> Option<&WireMessage> {
        self.messages
            .get(chat)?
            .iter()
            .find(|message| message.key.id == id)
    }

    fn message_mut(&mut self, chat: &str, id: &str) -> Option<&mut WireMessage> {
        self.messages
            .get_mut(chat)?
            .iter_mut()
            .find(|message| message.key.id == id)
    }

    /// Replace a known message in place, append an unknown one.
    fn upsert(&mut self, message: &WireMessage) {
        let chat = self
            .messages
            .entry(message.key.remote_jid.clone())
            .or_default();
        match chat.iter().position(|stored| stored.key.id == message.key.id) {
            Some(index) => chat[index] = message.clone(),
            None => chat.push(message.clone()),
        }
    }

    fn apply(&mut self, event: &SocketEvent) {
        match event {
            SocketEvent::MessagesUpsert { messages, .. } => {
                for message in messages {
                    self.upsert(message);
                }
            }
            SocketEvent::MessagesUpdate(updates) => {
                for update in updates {
                    if let Some(stored) =
                        self.message_mut(&update.key.remote_jid, &update.key.id)
                    {
                        stored.apply(update);
                    }
                }
            }
            SocketEvent::MessagesDelete(keys) => {
                for key in keys {
                    if let Some(chat) = self.messages.get_mut(&key.remote_jid) {
                        chat.retain(|message| message.key.id != key.id);
                        if chat.is_empty() {
                            self.messages.remove(&key.remote_jid);
                        }
                    }
                }
            }
            SocketEvent::ChatsUpsert(chats) => {
                for chat in chats {
                    self.chats.insert(chat.id.clone(), chat.clone());
                }
            }
            SocketEvent::ChatsUpdate(patches) => {
                for patch in patches {
                    self.chats
                        .entry(patch.id.clone())
                        .and_modify(|chat| chat.merge(patch))
                        .or_insert_with(|| patch.clone());
                }
            }
            SocketEvent::ChatsDelete(ids) => {
                for id in ids {
                    self.chats.remove(id);
                }
            }
            SocketEvent::Connection(_) | SocketEvent::Credentials(_) => {}
        }
    }
}

/// Snapshot of chats and messages, persisted to `path`.
#[derive(Debug)]
pub struct MessageStore {
    path: PathBuf,
    state: RwLock<StoreSnapshot>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl MessageStore {
    /// Empty store that will flush to `path`.
    #[must_use]
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self::with_snapshot(path, StoreSnapshot::default())
    }

    fn with_snapshot(path: impl Into<PathBuf>, snapshot: StoreSnapshot) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(snapshot),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the snapshot at `path`. A missing file, an empty file, or the
    /// `{}` sentinel give an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Load`] if the file is unreadable or malformed.
    pub async fn try_load(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let content = read_optional(&path).await.map_err(|e| StoreError::Load {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let snapshot = match content.as_deref().map(str::trim) {
            None | Some("" | EMPTY_SENTINEL) => StoreSnapshot::default(),
            Some(text) => serde_json::from_str(text).map_err(|e| StoreError::Load {
                path: path.clone(),
                message: e.to_string(),
            })?,
        };

        Ok(Self::with_snapshot(path, snapshot))
    }

    /// Load the snapshot at `path`, recovering to an empty store on error.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::try_load(&path).await {
            Ok(store) => {
                info!(
                    path = %path.display(),
                    chats = store.chat_count(),
                    messages = store.message_count(),
                    "Message store loaded"
                );
                store
            }
            Err(e) => {
                error!(error = %e, "Starting with an empty message store");
                Self::empty(path)
            }
        }
    }

    /// Snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored chats.
    #[must_use]
    pub fn chat_count(&self) -> usize {
        self.state.read().chats.len()
    }

    /// Number of stored messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.state.read().message_count()
    }

    /// Copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.read().clone()
    }

    /// Stored metadata for a chat.
    #[must_use]
    pub fn chat(&self, id: &str) -> Option<ChatMetadata> {
        self.state.read().chats.get(id).cloned()
    }

    /// Stored record for a message.
    #[must_use]
    pub fn load_message(&self, chat: &str, id: &str) -> Option<WireMessage> {
        self.state.read().message(chat, id).cloned()
    }

    /// Apply one socket event to the snapshot.
    pub fn apply(&self, event: &SocketEvent) {
        self.state.write().apply(event);
    }

    /// Consume `events` until the stream ends or the returned handle is
    /// dropped. [`Subscription::drain`] applies everything already queued
    /// before the binding exits.
    pub fn bind(self: &Arc<Self>, mut events: EventStream) -> Subscription {
        let store = Arc::clone(self);
        Subscription::spawn_stoppable("message_store", move |mut stop| async move {
            loop {
                tokio::select! {
                    biased;
                    () = stop.requested() => {
                        let mut drained = 0_usize;
                        while let Some(event) = events.try_next() {
                            store.apply(&event);
                            drained += 1;
                        }
                        debug!(drained, "Message store binding drained");
                        break;
                    }
                    event = events.next() => match event {
                        Some(event) => store.apply(&event),
                        None => break,
                    },
                }
            }
            debug!("Message store binding ended");
        })
    }

    /// Write the whole snapshot to the store's own path.
    ///
    /// # Errors
    ///
    /// See [`MessageStore::flush_to`].
    pub async fn flush(&self) -> StoreResult<()> {
        self.flush_to(&self.path).await
    }

    /// Write the whole snapshot to `path`, replacing it atomically. Flushes
    /// are serialized.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn flush_to(&self, path: &Path) -> StoreResult<()> {
        let _guard = self.flush_lock.lock().await;
        self.write_snapshot(path).await
    }

    /// Flush unless another flush is in flight. Returns `None` when skipped.
    pub async fn try_flush(&self) -> Option<StoreResult<()>> {
        let _guard = self.flush_lock.try_lock().ok()?;
        Some(self.write_snapshot(&self.path).await)
    }

    async fn write_snapshot(&self, path: &Path) -> StoreResult<()> {
        let bytes = {
            let state = self.state.read();
            serde_json::to_vec(&*state)?
        };
        write_atomic(path, &bytes)
            .await
            .map_err(|source| StoreError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Message store flushed");
        Ok(())
    }
}

impl MessageLookup for MessageStore {
    fn get_message(&self, key: &MessageKey) -> Value {
        self.load_message(&key.remote_jid, &key.id)
            .and_then(|stored| stored.message)
            .unwrap_or_else(empty_message)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Flush timer
// ─────────────────────────────────────────────────────────────────────────────

/// Periodic flush task. Dropping or cancelling it stops the timer; the
/// final flush belongs to whoever cancels it.
#[derive(Debug)]
pub struct FlushTimer {
    handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// Spawn a task flushing `store` every `period`. The first flush happens
    /// one full period after start.
    pub fn start(store: Arc<MessageStore>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match store.try_flush().await {
                    Some(Ok(())) => {}
                    Some(Err(e)) => warn!(error = %e, "Scheduled store flush failed"),
                    None => debug!("Flush already in flight, skipping tick"),
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Check if the timer is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the timer.
    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.abort();
    }
}
