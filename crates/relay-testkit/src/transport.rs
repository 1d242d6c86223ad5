//! Scripted transport and a fake socket driven by the test.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    ConnectionUpdate, DisconnectReason, EventBus, EventStream, Presence, ProtocolVersion, Socket,
    SocketEvent, SocketOptions, Transport, TransportError, TransportResult,
};
use tokio::sync::mpsc;

/// Version every scripted connect reports.
pub const TEST_VERSION: ProtocolVersion = ProtocolVersion {
    parts: [2, 3000, 1_015_901_307],
    is_latest: true,
};

/// A call the supervisor made on a [`FakeSocket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCall {
    /// `send_presence`.
    Presence(Presence),
    /// `request_pairing_code` for this number.
    PairingCode(String),
    /// `logout`.
    Logout,
}

/// In-memory socket. The test emits events; the socket records calls.
#[derive(Debug)]
pub struct FakeSocket {
    bus: EventBus,
    registered: AtomicBool,
    fail_logout: AtomicBool,
    pairing_code: String,
    calls: Mutex<Vec<SocketCall>>,
}

impl FakeSocket {
    /// Socket whose session is (or is not) registered.
    #[must_use]
    pub fn new(registered: bool) -> Arc<Self> {
        Arc::new(Self {
            bus: EventBus::default(),
            registered: AtomicBool::new(registered),
            fail_logout: AtomicBool::new(false),
            pairing_code: "ABCD-EFGH".to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Emit `event` to every subscriber.
    pub fn emit(&self, event: SocketEvent) -> usize {
        self.bus.emit(event)
    }

    /// Emit `connection: open`.
    pub fn open(&self) {
        self.emit(SocketEvent::Connection(ConnectionUpdate::open()));
    }

    /// Emit `connection: close` with `reason`.
    pub fn close(&self, reason: DisconnectReason) {
        self.emit(SocketEvent::Connection(ConnectionUpdate::closed(reason)));
    }

    /// Make `logout` fail.
    pub fn fail_logout(&self) {
        self.fail_logout.store(true, Ordering::SeqCst);
    }

    /// Change the registration flag.
    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    /// Calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<SocketCall> {
        self.calls.lock().clone()
    }

    /// Current number of event subscribers.
    #[must_use]
    pub fn subscribers(&self) -> usize {
        self.bus.subscriber_count()
    }

    /// Wait until at least `count` consumers subscribed.
    pub async fn wait_for_subscribers(&self, count: usize) {
        while self.subscribers() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn record(&self, call: SocketCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Socket for FakeSocket {
    fn events(&self) -> EventStream {
        self.bus.subscribe()
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    async fn send_presence(&self, presence: Presence) -> TransportResult<()> {
        self.record(SocketCall::Presence(presence));
        Ok(())
    }

    async fn request_pairing_code(&self, phone_number: &str) -> TransportResult<String> {
        self.record(SocketCall::PairingCode(phone_number.to_string()));
        Ok(self.pairing_code.clone())
    }

    async fn logout(&self) -> TransportResult<()> {
        self.record(SocketCall::Logout);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(TransportError::Request("logout rejected".into()));
        }
        Ok(())
    }
}

/// One scripted answer to `connect`.
#[derive(Debug)]
pub enum ConnectStep {
    /// Hand out this socket.
    Socket(Arc<FakeSocket>),
    /// Fail socket construction.
    Fail(String),
    /// Fail the version fetch.
    VersionFail(String),
}

/// Transport that answers `connect` from a script. An exhausted script
/// fails every further attempt.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ConnectStep>>,
    options: Mutex<Vec<SocketOptions>>,
    handed_out: mpsc::UnboundedSender<Arc<FakeSocket>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<FakeSocket>>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ScriptedTransport {
    /// Transport following `steps` in order.
    #[must_use]
    pub fn new(steps: Vec<ConnectStep>) -> Self {
        let (handed_out, receiver) = mpsc::unbounded_channel();
        Self {
            script: Mutex::new(steps.into()),
            options: Mutex::new(Vec::new()),
            handed_out,
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    /// Transport handing out `sockets` in order.
    #[must_use]
    pub fn with_sockets(sockets: &[Arc<FakeSocket>]) -> Self {
        Self::new(
            sockets
                .iter()
                .map(|s| ConnectStep::Socket(Arc::clone(s)))
                .collect(),
        )
    }

    /// Append a step.
    pub fn push(&self, step: ConnectStep) {
        self.script.lock().push_back(step);
    }

    /// Options passed to every `connect` call so far.
    #[must_use]
    pub fn options(&self) -> Vec<SocketOptions> {
        self.options.lock().clone()
    }

    /// Number of `connect` calls so far.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.options.lock().len()
    }

    /// Wait for the next socket handed to the supervisor.
    ///
    /// # Panics
    ///
    /// Panics if the transport was dropped.
    pub async fn next_socket(&self) -> Arc<FakeSocket> {
        self.receiver
            .lock()
            .await
            .recv()
            .await
            .expect("transport dropped")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn latest_version(&self) -> TransportResult<ProtocolVersion> {
        let mut script = self.script.lock();
        if let Some(ConnectStep::VersionFail(message)) = script.front() {
            let message = message.clone();
            script.pop_front();
            return Err(TransportError::VersionFetch(message));
        }
        Ok(TEST_VERSION)
    }

    async fn connect(&self, options: SocketOptions) -> TransportResult<Arc<dyn Socket>> {
        self.options.lock().push(options);
        let step = self.script.lock().pop_front();
        match step {
            Some(ConnectStep::Socket(socket)) => {
                let _ = self.handed_out.send(Arc::clone(&socket));
                Ok(socket)
            }
            Some(ConnectStep::Fail(message)) => Err(TransportError::ConnectionFailed(message)),
            Some(ConnectStep::VersionFail(message)) => Err(TransportError::VersionFetch(message)),
            None => Err(TransportError::ConnectionFailed("script exhausted".into())),
        }
    }
}
