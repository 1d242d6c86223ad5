//! Connection supervisor: owns the process-lifetime components and runs
//! connection cycles until logout, shutdown, or the failure bound.
//!
//! ```text
//!   startup (once) ──► Connecting ──► Open ──► Closed ─┬─► Connecting (after delay)
//!                          │                           └─► Terminal (logged out)
//!                          └── connect error ──► retry after delay
//! ```
//!
//! Reconnection is decided here, in the outer loop, never from inside an
//! event handler.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{
    ConnectionState, DisconnectReason, EventDispatcher, HeartbeatSink, KeyStore, MessageCounter,
    MessageLookup, Presence, ReconnectPolicy, RetryCounterCache, STATUS_ROUTE, Settings, Socket,
    SocketEvent, SocketOptions, StatusRegistrar, Transport, TransportResult,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SupervisorConfig;
use crate::credentials::CredentialStore;
use crate::error::SupervisorResult;
use crate::heartbeat::{HeartbeatReporter, HeartbeatSettings, HttpHeartbeatSink};
use crate::shutdown::{ShutdownContext, ShutdownReport, graceful_shutdown};
use crate::store::{FlushTimer, MessageStore};

/// How a supervisor run ended.
#[derive(Debug)]
pub enum SupervisorOutcome {
    /// Shutdown was requested; the graceful sequence ran.
    Shutdown(ShutdownReport),
    /// The remote side logged the session out. Re-pairing is required.
    LoggedOut,
    /// Too many consecutive connection cycles failed before opening.
    MaxFailuresReached {
        /// Consecutive failures at the time of giving up.
        failures: u32,
    },
}

/// Counters across all connection cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    /// Connection cycles started.
    pub connection_attempts: u64,
    /// Cycles that reached `Open`.
    pub successful_connections: u64,
    /// Cycles that failed to connect or closed before opening.
    pub failed_connections: u64,
    /// Reconnects scheduled after a transient close.
    pub reconnects: u64,
    /// Socket events consumed by the supervisor.
    pub events_processed: u64,
}

enum ConnectionExit {
    Shutdown(FlushTimer),
    Closed {
        reason: DisconnectReason,
        opened: bool,
    },
}

fn shutdown_requested(
    changed: Result<(), watch::error::RecvError>,
    shutdown: &watch::Receiver<bool>,
) -> bool {
    // A dropped sender can never signal again; treat it as a request.
    changed.is_err() || *shutdown.borrow()
}

/// Supervises the connection lifecycle for one session.
pub struct Supervisor<T, D> {
    config: SupervisorConfig,
    settings: Settings,
    transport: Arc<T>,
    dispatcher: Arc<D>,
    registrar: Option<Arc<dyn StatusRegistrar>>,
    credentials: CredentialStore,
    store: Arc<MessageStore>,
    counter: Arc<MessageCounter>,
    heartbeat: HeartbeatReporter,
    retry_cache: Arc<RetryCounterCache>,
    state: ConnectionState,
    stats: SupervisorStats,
    pairing_code: Option<String>,
    started: bool,
}

impl<T, D> std::fmt::Debug for Supervisor<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}

impl<T, D> Supervisor<T, D>
where
    T: Transport,
    D: EventDispatcher,
{
    /// Build a supervisor reporting heartbeats to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or settings are invalid, or if
    /// the credential store's HTTP client cannot be built.
    pub fn new(
        config: SupervisorConfig,
        settings: Settings,
        transport: Arc<T>,
        dispatcher: Arc<D>,
        sink: Arc<dyn HeartbeatSink>,
    ) -> SupervisorResult<Self> {
        config.validate()?;
        settings.validate()?;

        let credentials = CredentialStore::new(&config)?;
        let counter = Arc::new(MessageCounter::new());
        let heartbeat = HeartbeatReporter::new(
            sink,
            Arc::clone(&counter),
            HeartbeatSettings::from_config(&config, settings.owner_name.clone(), Instant::now()),
        );

        Ok(Self {
            store: Arc::new(MessageStore::empty(config.store_path.clone())),
            retry_cache: Arc::new(RetryCounterCache::new(config.retry_cache_capacity)),
            config,
            settings,
            transport,
            dispatcher,
            registrar: None,
            credentials,
            counter,
            heartbeat,
            state: ConnectionState::Closed,
            stats: SupervisorStats::default(),
            pairing_code: None,
            started: false,
        })
    }

    /// Build a supervisor reporting heartbeats to the configured dashboard.
    ///
    /// # Errors
    ///
    /// See [`Supervisor::new`]; also fails if the heartbeat client cannot be built.
    pub fn with_http_heartbeat(
        config: SupervisorConfig,
        settings: Settings,
        transport: Arc<T>,
        dispatcher: Arc<D>,
    ) -> SupervisorResult<Self> {
        let sink = Arc::new(HttpHeartbeatSink::from_config(&config)?);
        Self::new(config, settings, transport, dispatcher, sink)
    }

    /// Report heartbeat uptime from `started_at` instead of from
    /// construction. Pass the instant the process started.
    #[must_use]
    pub fn with_started_at(mut self, started_at: Instant) -> Self {
        self.heartbeat = self.heartbeat.with_started_at(started_at);
        self
    }

    /// Register the status route with `registrar` at startup.
    #[must_use]
    pub fn with_status_registrar(mut self, registrar: Arc<dyn StatusRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    /// Supervisor configuration.
    pub const fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Current connection state.
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Counters across all cycles.
    pub const fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    /// Shared message counter.
    pub fn counter(&self) -> Arc<MessageCounter> {
        Arc::clone(&self.counter)
    }

    /// Message store.
    pub fn store(&self) -> Arc<MessageStore> {
        Arc::clone(&self.store)
    }

    /// Credential store.
    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Heartbeat reporter.
    pub const fn heartbeat(&self) -> &HeartbeatReporter {
        &self.heartbeat
    }

    /// Last pairing code issued for an unregistered session.
    pub fn pairing_code(&self) -> Option<&str> {
        self.pairing_code.as_deref()
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        if !self.state.is_valid_transition(next) {
            warn!(from = %self.state, to = %next, "Unexpected connection state transition");
        }
        debug!(from = %self.state, to = %next, "Connection state");
        self.state = next;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Startup
    // ─────────────────────────────────────────────────────────────────────

    async fn startup(&mut self) -> SupervisorResult<()> {
        if self.started {
            return Ok(());
        }

        match self.dispatcher.load_commands().await {
            Ok(count) => info!(commands = count, "Commands loaded"),
            Err(e) => error!(error = %e, "Failed to load commands"),
        }

        if let Some(registrar) = &self.registrar {
            registrar.register_status(STATUS_ROUTE, Arc::clone(&self.counter));
            debug!(route = STATUS_ROUTE, "Status route registered");
        }

        self.store = Arc::new(MessageStore::load(self.config.store_path.clone()).await);

        if self.config.prune_stale_keys {
            let removed = self.credentials.prune_stale_key_files().await;
            info!(removed, "Pruned stale key files");
        }

        self.credentials.resolve(&self.settings).await?;
        self.started = true;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Outer loop
    // ─────────────────────────────────────────────────────────────────────

    /// Run until shutdown is signalled, the session is logged out, or the
    /// failure bound is reached.
    ///
    /// # Errors
    ///
    /// Only credential resolution at startup is fatal.
    #[instrument(skip_all, fields(owner = %self.settings.owner_name))]
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> SupervisorResult<SupervisorOutcome> {
        self.startup().await?;
        let mut consecutive_failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return Ok(SupervisorOutcome::Shutdown(self.shutdown(None, None).await));
            }

            self.stats.connection_attempts += 1;
            self.transition(ConnectionState::Connecting);

            let socket = match self.connect().await {
                Ok(socket) => socket,
                Err(e) => {
                    self.stats.failed_connections += 1;
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    self.transition(ConnectionState::Closed);
                    warn!(
                        error = %e,
                        retryable = e.is_retryable(),
                        consecutive_failures,
                        "Connection attempt failed"
                    );
                    if let Some(outcome) = self.check_failure_bound(consecutive_failures) {
                        return Ok(outcome);
                    }
                    if !self.wait_or_shutdown(self.config.reconnect_delay(), &mut shutdown).await {
                        return Ok(SupervisorOutcome::Shutdown(self.shutdown(None, None).await));
                    }
                    continue;
                }
            };

            match self.run_connection(&socket, &mut shutdown).await {
                ConnectionExit::Shutdown(flush_timer) => {
                    self.transition(ConnectionState::Closed);
                    let report = self.shutdown(Some(flush_timer), Some(&socket)).await;
                    return Ok(SupervisorOutcome::Shutdown(report));
                }
                ConnectionExit::Closed { reason, opened } => {
                    match ReconnectPolicy::for_close(reason, self.config.reconnect_delay()) {
                        ReconnectPolicy::Terminal => {
                            error!(%reason, "Session logged out, not reconnecting");
                            return Ok(SupervisorOutcome::LoggedOut);
                        }
                        ReconnectPolicy::Reconnect { delay } => {
                            if opened {
                                consecutive_failures = 0;
                            } else {
                                self.stats.failed_connections += 1;
                                consecutive_failures = consecutive_failures.saturating_add(1);
                                if let Some(outcome) = self.check_failure_bound(consecutive_failures)
                                {
                                    return Ok(outcome);
                                }
                            }
                            self.stats.reconnects += 1;
                            info!(
                                %reason,
                                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                "Reconnecting"
                            );
                            if !self.wait_or_shutdown(delay, &mut shutdown).await {
                                return Ok(SupervisorOutcome::Shutdown(
                                    self.shutdown(None, None).await,
                                ));
                            }
                        }
                    }
                }
            }
        }
    }

    fn check_failure_bound(&self, failures: u32) -> Option<SupervisorOutcome> {
        let max = self.config.max_consecutive_failures?;
        if failures >= max {
            error!(failures, "Maximum consecutive connection failures reached");
            Some(SupervisorOutcome::MaxFailuresReached { failures })
        } else {
            None
        }
    }

    /// Sleep for `delay`. Returns `false` if shutdown was requested first.
    async fn wait_or_shutdown(&self, delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                changed = shutdown.changed() => {
                    if shutdown_requested(changed, shutdown) {
                        return false;
                    }
                }
            }
        }
    }

    async fn shutdown(
        &self,
        flush_timer: Option<FlushTimer>,
        socket: Option<&Arc<dyn Socket>>,
    ) -> ShutdownReport {
        graceful_shutdown(ShutdownContext {
            flush_timer,
            heartbeat: &self.heartbeat,
            store: &self.store,
            socket,
            step_timeout: self.config.shutdown_step_timeout(),
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connection cycle
    // ─────────────────────────────────────────────────────────────────────

    async fn connect(&self) -> TransportResult<Arc<dyn Socket>> {
        let credentials = match self.credentials.load_local().await {
            Ok(Some(credentials)) => credentials,
            Ok(None) => self.credentials.current().await,
            Err(e) => {
                warn!(error = %e, "Reloading credentials failed, using the in-memory copy");
                self.credentials.current().await
            }
        };

        let version = self.transport.latest_version().await?;
        info!(%version, is_latest = version.is_latest, "Using protocol version");

        let keys: Arc<dyn KeyStore> = self.credentials.key_store();
        let message_lookup: Arc<dyn MessageLookup> = self.store.clone();
        let options = SocketOptions {
            version,
            credentials,
            keys,
            retry_cache: Arc::clone(&self.retry_cache),
            link_previews: true,
            message_lookup,
            query_timeout: None,
        };
        self.transport.connect(options).await
    }

    async fn run_connection(
        &mut self,
        socket: &Arc<dyn Socket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionExit {
        let mut events = socket.events();
        let binding = self.store.bind(socket.events());

        if let Err(e) = self.dispatcher.attach(Arc::clone(socket)).await {
            warn!(error = %e, "Dispatcher failed to attach to socket");
        }

        let flush_timer = FlushTimer::start(Arc::clone(&self.store), self.config.flush_interval());
        let mut opened = false;

        let reason = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if shutdown_requested(changed, shutdown) {
                        info!("Shutdown requested");
                        binding.drain().await;
                        return ConnectionExit::Shutdown(flush_timer);
                    }
                }
                event = events.next() => {
                    let Some(event) = event else {
                        warn!("Socket event stream ended without a close event");
                        break DisconnectReason::ConnectionLost;
                    };
                    self.stats.events_processed += 1;
                    if let Some(reason) = self.handle_event(socket, event, &mut opened).await {
                        break reason;
                    }
                }
            }
        };

        self.transition(ConnectionState::Closed);
        self.heartbeat.stop().await;
        flush_timer.cancel();
        binding.drain().await;
        if let Err(e) = self.store.flush().await {
            error!(error = %e, "Store flush after close failed");
        }

        ConnectionExit::Closed { reason, opened }
    }

    async fn handle_event(
        &mut self,
        socket: &Arc<dyn Socket>,
        event: SocketEvent,
        opened: &mut bool,
    ) -> Option<DisconnectReason> {
        match event {
            SocketEvent::Connection(update) => match update.state {
                ConnectionState::Connecting => {
                    self.transition(ConnectionState::Connecting);
                    None
                }
                ConnectionState::Open => {
                    *opened = true;
                    self.stats.successful_connections += 1;
                    self.on_open(socket).await;
                    None
                }
                ConnectionState::Closed => {
                    let reason = update.close_reason();
                    warn!(
                        %reason,
                        detail = update.detail.as_deref().unwrap_or(""),
                        reconnect = !reason.is_terminal(),
                        "Connection closed"
                    );
                    Some(reason)
                }
            },
            SocketEvent::Credentials(update) => {
                if let Err(e) = self.credentials.update(&update).await {
                    error!(error = %e, "Failed to persist credential update");
                }
                None
            }
            SocketEvent::MessagesUpsert { messages, kind } => {
                self.counter
                    .record(u64::try_from(messages.len()).unwrap_or(u64::MAX));
                debug!(count = messages.len(), ?kind, total = self.counter.total(), "Messages received");
                for message in &messages {
                    if let Err(e) = self.dispatcher.handle_message(socket, message).await {
                        error!(error = %e, id = %message.key.id, "Message handler failed");
                    }
                }
                None
            }
            SocketEvent::MessagesUpdate(updates) => {
                for update in updates.iter().filter(|u| u.is_deletion()) {
                    let original = self
                        .store
                        .load_message(&update.key.remote_jid, &update.key.id);
                    debug!(id = %update.key.id, stored = original.is_some(), "Message deleted");
                    if let Err(e) = self
                        .dispatcher
                        .handle_deletion(socket, update, original.as_ref())
                        .await
                    {
                        error!(error = %e, id = %update.key.id, "Deletion handler failed");
                    }
                }
                None
            }
            SocketEvent::MessagesDelete(_)
            | SocketEvent::ChatsUpsert(_)
            | SocketEvent::ChatsUpdate(_)
            | SocketEvent::ChatsDelete(_) => None,
        }
    }

    async fn on_open(&mut self, socket: &Arc<dyn Socket>) {
        self.transition(ConnectionState::Open);
        info!("Connected");

        let presence = Presence::from_always_online(self.settings.always_online);
        if let Err(e) = socket.send_presence(presence).await {
            warn!(error = %e, ?presence, "Failed to send presence");
        }

        if let Err(e) = self.dispatcher.on_connection_open(socket).await {
            warn!(error = %e, "Connection-open hooks failed");
        }

        self.heartbeat.start().await;

        if !socket.is_registered() {
            self.request_pairing_code(socket).await;
        }
    }

    async fn request_pairing_code(&mut self, socket: &Arc<dyn Socket>) {
        let Some(number) = self.settings.primary_owner_number().map(str::to_owned) else {
            warn!("Session is not registered and no owner number is configured");
            return;
        };
        match socket.request_pairing_code(&number).await {
            Ok(code) => {
                info!(phone = %number, code = %code, "Pairing code issued");
                self.pairing_code = Some(code);
            }
            Err(e) => error!(error = %e, phone = %number, "Pairing code request failed"),
        }
    }
}
