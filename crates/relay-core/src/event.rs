//! Socket events, the broadcast bus they travel on, and subscription
//! handles.
//!
//! Every consumer (the store binding, the supervisor's own handlers, the
//! dispatch layer) takes its own [`EventStream`] from the socket's
//! [`EventBus`]. Long-lived consumers run inside a [`Subscription`], which
//! aborts its task when dropped so nothing keeps listening to a socket
//! that has been replaced by a reconnect.

use std::future::Future;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::ConnectionUpdate;
use crate::credentials::CredentialsUpdate;
use crate::message::{ChatMetadata, MessageKey, MessageUpdate, UpsertKind, WireMessage};

/// Default capacity of a socket event bus.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// An event emitted by the transport.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// Lifecycle change.
    Connection(ConnectionUpdate),
    /// Credential material changed and must be persisted.
    Credentials(CredentialsUpdate),
    /// New or backfilled messages.
    MessagesUpsert {
        /// Messages in delivery order.
        messages: Vec<WireMessage>,
        /// Live traffic or backfill.
        kind: UpsertKind,
    },
    /// Edits, status changes and revocations.
    MessagesUpdate(Vec<MessageUpdate>),
    /// Messages removed locally.
    MessagesDelete(Vec<MessageKey>),
    /// Chats created or synced.
    ChatsUpsert(Vec<ChatMetadata>),
    /// Chat metadata changes.
    ChatsUpdate(Vec<ChatMetadata>),
    /// Chats removed.
    ChatsDelete(Vec<String>),
}

impl SocketEvent {
    /// Event name used in log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection.update",
            Self::Credentials(_) => "creds.update",
            Self::MessagesUpsert { .. } => "messages.upsert",
            Self::MessagesUpdate(_) => "messages.update",
            Self::MessagesDelete(_) => "messages.delete",
            Self::ChatsUpsert(_) => "chats.upsert",
            Self::ChatsUpdate(_) => "chats.update",
            Self::ChatsDelete(_) => "chats.delete",
        }
    }
}

/// Broadcast bus owned by one socket.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SocketEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event; returns how many subscribers will see it.
    pub fn emit(&self, event: SocketEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(event = name, "Event emitted with no subscribers");
                0
            }
        }
    }

    /// Take a new stream of events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            lagged: 0,
        }
    }

    /// Number of live streams.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One consumer's view of an [`EventBus`].
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<SocketEvent>,
    lagged: u64,
}

impl EventStream {
    /// Next event, or `None` once the socket dropped its bus.
    ///
    /// A consumer that falls behind skips the overwritten events and logs
    /// how many were lost.
    pub async fn next(&mut self) -> Option<SocketEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.lagged = self.lagged.saturating_add(skipped);
                    warn!(skipped, total = self.lagged, "Event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event already queued for this stream, without waiting.
    pub fn try_next(&mut self) -> Option<SocketEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.lagged = self.lagged.saturating_add(skipped);
                    warn!(skipped, total = self.lagged, "Event stream lagged");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Total events skipped because this stream lagged.
    #[must_use]
    pub const fn lagged(&self) -> u64 {
        self.lagged
    }
}

/// Stop request seen by a consumer spawned with
/// [`Subscription::spawn_stoppable`].
#[derive(Debug)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Resolves once the owning [`Subscription`] asks the consumer to finish.
    pub async fn requested(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Handle gone: the task is being aborted anyway.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Handle for a spawned event consumer. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
    stop: Option<watch::Sender<bool>>,
}

impl Subscription {
    /// Spawn `task` on the current runtime and tie its lifetime to the
    /// returned handle.
    pub fn spawn<F>(name: &'static str, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: Some(tokio::spawn(task)),
            stop: None,
        }
    }

    /// Spawn a consumer that can be asked to finish the events it already
    /// has queued. The task must return soon after [`StopSignal::requested`]
    /// resolves.
    pub fn spawn_stoppable<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, rx) = watch::channel(false);
        Self {
            name,
            handle: Some(tokio::spawn(task(StopSignal { rx }))),
            stop: Some(stop),
        }
    }

    /// Consumer name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Check if the consumer task is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the consumer now, dropping whatever it has not processed.
    pub fn unsubscribe(mut self) {
        self.abort();
    }

    /// Let a stoppable consumer finish its queued events, then wait for it
    /// to exit. Other consumers are stopped as by [`Subscription::unsubscribe`].
    pub async fn drain(mut self) {
        let Some(stop) = self.stop.take() else {
            self.abort();
            return;
        };
        let Some(handle) = self.handle.take() else {
            return;
        };
        if stop.send(true).is_err() {
            debug!(subscription = self.name, "Consumer already exited");
        }
        if let Err(e) = handle.await {
            warn!(subscription = self.name, error = %e, "Consumer failed while draining");
        }
        debug!(subscription = self.name, "Drained");
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(subscription = self.name, "Unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort();
    }
}
