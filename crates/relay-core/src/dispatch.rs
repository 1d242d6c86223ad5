//! The seam to the command/plugin framework.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchResult;
use crate::message::{MessageUpdate, WireMessage};
use crate::transport::Socket;

/// Interprets inbound traffic. Implemented outside this workspace.
///
/// The supervisor calls these hooks in a fixed order per connection:
/// `attach` once the socket exists, `on_connection_open` on every open,
/// then `handle_message` / `handle_deletion` per event. Errors are logged
/// by the supervisor and never tear the connection down.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Load the command registry. Called once at startup; returns the
    /// number of commands loaded.
    async fn load_commands(&self) -> DispatchResult<usize> {
        Ok(0)
    }

    /// Bind routers and deletion tracking to a new socket.
    async fn attach(&self, socket: Arc<dyn Socket>) -> DispatchResult<()>;

    /// Initialise modules that need an open connection.
    async fn on_connection_open(&self, socket: &Arc<dyn Socket>) -> DispatchResult<()>;

    /// Run the message pipeline for one inbound message.
    async fn handle_message(
        &self,
        socket: &Arc<dyn Socket>,
        message: &WireMessage,
    ) -> DispatchResult<()>;

    /// React to a deleted message. `original` is the stored copy, if any.
    async fn handle_deletion(
        &self,
        socket: &Arc<dyn Socket>,
        update: &MessageUpdate,
        original: Option<&WireMessage>,
    ) -> DispatchResult<()>;
}

/// Dispatcher that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDispatcher;

#[async_trait]
impl EventDispatcher for NoopDispatcher {
    async fn attach(&self, _socket: Arc<dyn Socket>) -> DispatchResult<()> {
        Ok(())
    }

    async fn on_connection_open(&self, _socket: &Arc<dyn Socket>) -> DispatchResult<()> {
        Ok(())
    }

    async fn handle_message(
        &self,
        _socket: &Arc<dyn Socket>,
        _message: &WireMessage,
    ) -> DispatchResult<()> {
        Ok(())
    }

    async fn handle_deletion(
        &self,
        _socket: &Arc<dyn Socket>,
        _update: &MessageUpdate,
        _original: Option<&WireMessage>,
    ) -> DispatchResult<()> {
        Ok(())
    }
}
