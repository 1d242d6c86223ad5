//! Dispatcher and status registrar that record what the supervisor does.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    DispatchError, DispatchResult, EventDispatcher, MessageCounter, MessageKey, MessageUpdate,
    Socket, StatusRegistrar, StatusReport, WireMessage,
};

/// A hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchCall {
    /// `load_commands`.
    LoadCommands,
    /// `attach`.
    Attach,
    /// `on_connection_open`.
    ConnectionOpen,
    /// `handle_message` for this key.
    Message(MessageKey),
    /// `handle_deletion` with the stored original, if one was found.
    Deletion {
        /// Deleted message.
        key: MessageKey,
        /// Stored copy handed to the handler.
        original: Option<WireMessage>,
    },
}

/// Records every hook call. Handlers can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<DispatchCall>>,
    fail_handlers: AtomicBool,
    fail_load: AtomicBool,
}

impl RecordingDispatcher {
    /// New dispatcher.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make message and deletion handlers return errors.
    pub fn fail_handlers(&self) {
        self.fail_handlers.store(true, Ordering::SeqCst);
    }

    /// Make `load_commands` return an error.
    pub fn fail_load(&self) {
        self.fail_load.store(true, Ordering::SeqCst);
    }

    /// Calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<DispatchCall> {
        self.calls.lock().clone()
    }

    /// Number of `handle_message` calls.
    #[must_use]
    pub fn messages_handled(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, DispatchCall::Message(_)))
            .count()
    }

    /// Deletion calls only.
    #[must_use]
    pub fn deletions(&self) -> Vec<DispatchCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, DispatchCall::Deletion { .. }))
            .cloned()
            .collect()
    }

    fn record(&self, call: DispatchCall) {
        self.calls.lock().push(call);
    }

    fn handler_result(&self, handler: &str) -> DispatchResult<()> {
        if self.fail_handlers.load(Ordering::SeqCst) {
            Err(DispatchError::Handler {
                handler: handler.to_string(),
                message: "scripted failure".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventDispatcher for RecordingDispatcher {
    async fn load_commands(&self) -> DispatchResult<usize> {
        self.record(DispatchCall::LoadCommands);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(DispatchError::Registry("commands directory missing".into()));
        }
        Ok(3)
    }

    async fn attach(&self, _socket: Arc<dyn Socket>) -> DispatchResult<()> {
        self.record(DispatchCall::Attach);
        Ok(())
    }

    async fn on_connection_open(&self, _socket: &Arc<dyn Socket>) -> DispatchResult<()> {
        self.record(DispatchCall::ConnectionOpen);
        Ok(())
    }

    async fn handle_message(
        &self,
        _socket: &Arc<dyn Socket>,
        message: &WireMessage,
    ) -> DispatchResult<()> {
        self.record(DispatchCall::Message(message.key.clone()));
        self.handler_result("message")
    }

    async fn handle_deletion(
        &self,
        _socket: &Arc<dyn Socket>,
        update: &MessageUpdate,
        original: Option<&WireMessage>,
    ) -> DispatchResult<()> {
        self.record(DispatchCall::Deletion {
            key: update.key.clone(),
            original: original.cloned(),
        });
        self.handler_result("antidelete")
    }
}

/// Keeps the counters handed to it so tests can read the status report.
#[derive(Debug, Default)]
pub struct RecordingRegistrar {
    routes: Mutex<HashMap<String, Arc<MessageCounter>>>,
}

impl RecordingRegistrar {
    /// New registrar.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registered routes.
    #[must_use]
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.routes.lock().keys().cloned().collect();
        routes.sort();
        routes
    }

    /// What a GET on `route` would return right now.
    #[must_use]
    pub fn report(&self, route: &str) -> Option<StatusReport> {
        self.routes.lock().get(route).map(|counter| counter.report())
    }
}

impl StatusRegistrar for RecordingRegistrar {
    fn register_status(&self, route: &str, counter: Arc<MessageCounter>) {
        self.routes.lock().insert(route.to_string(), counter);
    }
}
