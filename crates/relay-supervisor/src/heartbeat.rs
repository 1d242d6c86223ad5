//! Heartbeat reporter: periodic liveness reports to the monitoring
//! dashboard, stopping itself after too many consecutive failures.
//!
//! Lifecycle: `Idle → Starting → Running → Stopped`. `start` always stops a
//! previous run first, so at most one periodic task exists per reporter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    HeartbeatAck, HeartbeatError, HeartbeatPayload, HeartbeatResult, HeartbeatSink,
    MessageCounter, ReportKind,
};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;

/// Path of the heartbeat endpoint on the dashboard.
pub const HEARTBEAT_PATH: &str = "/api/status/heartbeat";

/// Header carrying the dashboard API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reporter lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPhase {
    /// Never started.
    Idle,
    /// First report in flight.
    Starting,
    /// Periodic timer active.
    Running,
    /// Stopped by request or by the failure threshold.
    Stopped,
}

impl HeartbeatPhase {
    /// Phase name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// Reporter timings and identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Identity reported as `botId`.
    pub bot_id: String,
    /// Version tag.
    pub version: String,
    /// Periodic report interval.
    pub interval: Duration,
    /// Consecutive periodic failures that stop the reporter.
    pub max_failures: u32,
    /// Total attempts for the first report.
    pub initial_attempts: u32,
    /// Delay between first-report attempts.
    pub initial_retry: Duration,
    /// Process start; reported uptime counts from here.
    pub started_at: Instant,
}

impl HeartbeatSettings {
    /// Settings from supervisor configuration.
    #[must_use]
    pub fn from_config(
        config: &SupervisorConfig,
        bot_id: impl Into<String>,
        started_at: Instant,
    ) -> Self {
        Self {
            bot_id: bot_id.into(),
            version: config.version_tag.clone(),
            interval: config.heartbeat_interval(),
            max_failures: config.heartbeat_max_failures,
            initial_attempts: config.initial_heartbeat_attempts,
            initial_retry: config.initial_heartbeat_retry(),
            started_at,
        }
    }
}

#[derive(Debug)]
struct ReporterState {
    phase: HeartbeatPhase,
    consecutive_failures: u32,
    generation: u64,
    periodic: Option<JoinHandle<()>>,
    initial_retry: Option<JoinHandle<()>>,
}

impl ReporterState {
    fn cancel_tasks(&mut self) {
        if let Some(handle) = self.periodic.take() {
            handle.abort();
        }
        if let Some(handle) = self.initial_retry.take() {
            handle.abort();
        }
    }
}

struct Inner {
    sink: Arc<dyn HeartbeatSink>,
    counter: Arc<MessageCounter>,
    settings: HeartbeatSettings,
    state: Mutex<ReporterState>,
}

/// Sends liveness reports for one process. Cheap to clone.
#[derive(Clone)]
pub struct HeartbeatReporter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HeartbeatReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("HeartbeatReporter")
            .field("bot_id", &self.inner.settings.bot_id)
            .field("phase", &state.phase)
            .field("consecutive_failures", &state.consecutive_failures)
            .finish_non_exhaustive()
    }
}

impl HeartbeatReporter {
    /// Create an idle reporter.
    #[must_use]
    pub fn new(
        sink: Arc<dyn HeartbeatSink>,
        counter: Arc<MessageCounter>,
        settings: HeartbeatSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                counter,
                settings,
                state: Mutex::new(ReporterState {
                    phase: HeartbeatPhase::Idle,
                    consecutive_failures: 0,
                    generation: 0,
                    periodic: None,
                    initial_retry: None,
                }),
            }),
        }
    }

    /// The same reporter with uptime counted from `started_at`. Only
    /// meaningful before [`HeartbeatReporter::start`].
    #[must_use]
    pub fn with_started_at(self, started_at: Instant) -> Self {
        let settings = HeartbeatSettings {
            started_at,
            ..self.inner.settings.clone()
        };
        Self::new(
            Arc::clone(&self.inner.sink),
            Arc::clone(&self.inner.counter),
            settings,
        )
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> HeartbeatPhase {
        self.inner.state.lock().phase
    }

    /// Check if the periodic timer is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase() == HeartbeatPhase::Running
    }

    /// Consecutive periodic failures so far.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.state.lock().consecutive_failures
    }

    /// Start reporting. Stops any previous run, sends one report right
    /// away, and schedules the periodic timer whether or not that report
    /// succeeded. A failed first report is retried in the background.
    pub async fn start(&self) {
        self.stop().await;

        let generation = {
            let mut state = self.inner.state.lock();
            state.phase = HeartbeatPhase::Starting;
            state.consecutive_failures = 0;
            state.generation += 1;
            state.generation
        };
        info!(bot_id = %self.inner.settings.bot_id, "Starting heartbeat");

        match self.inner.report(ReportKind::Alive).await {
            Ok(ack) => debug!(last_heartbeat = ?ack.last_heartbeat, "Initial heartbeat sent"),
            Err(e) => {
                log_failure("initial", &e);
                let retry = tokio::spawn(Arc::clone(&self.inner).retry_initial(generation));
                self.inner.state.lock().initial_retry = Some(retry);
            }
        }

        let periodic = tokio::spawn(Arc::clone(&self.inner).run_periodic(generation));
        let mut state = self.inner.state.lock();
        if state.generation == generation && state.phase == HeartbeatPhase::Starting {
            state.phase = HeartbeatPhase::Running;
            state.periodic = Some(periodic);
        } else {
            periodic.abort();
        }
    }

    /// Stop reporting. Cancels the timers and, only if the reporter was
    /// running, sends a best-effort offline report. Returns whether an
    /// offline report was attempted.
    pub async fn stop(&self) -> bool {
        let was_running = {
            let mut state = self.inner.state.lock();
            let was_running = state.phase == HeartbeatPhase::Running;
            state.cancel_tasks();
            if state.phase != HeartbeatPhase::Idle {
                state.phase = HeartbeatPhase::Stopped;
            }
            was_running
        };

        if was_running {
            info!("Stopping heartbeat");
            self.inner.send_offline().await;
        }
        was_running
    }
}

impl Inner {
    fn payload(&self, kind: ReportKind) -> HeartbeatPayload {
        HeartbeatPayload::new(
            self.settings.bot_id.clone(),
            self.settings.version.clone(),
            self.counter.total(),
            self.settings.started_at.elapsed().as_secs(),
            self.counter.last_active(),
            kind,
        )
    }

    async fn report(&self, kind: ReportKind) -> HeartbeatResult<HeartbeatAck> {
        let payload = self.payload(kind);
        self.sink.send(&payload).await
    }

    async fn send_offline(&self) {
        match self.report(ReportKind::Offline).await {
            Ok(_) => info!("Offline status sent"),
            Err(e) => log_failure("offline", &e),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.generation == generation
            && matches!(state.phase, HeartbeatPhase::Starting | HeartbeatPhase::Running)
    }

    async fn retry_initial(self: Arc<Self>, generation: u64) {
        for attempt in 2..=self.settings.initial_attempts {
            tokio::time::sleep(self.settings.initial_retry).await;
            if !self.is_current(generation) {
                return;
            }
            match self.report(ReportKind::Alive).await {
                Ok(_) => {
                    info!(attempt, "Initial heartbeat sent after retry");
                    return;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.settings.initial_attempts,
                        "Initial heartbeat retry failed"
                    );
                    log_failure("initial", &e);
                }
            }
        }
        error!(
            attempts = self.settings.initial_attempts,
            "Initial heartbeat failed after all retries"
        );
    }

    async fn run_periodic(self: Arc<Self>, generation: u64) {
        let period = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.is_current(generation) {
                return;
            }

            let result = self.report(ReportKind::Alive).await;
            let tripped = {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return;
                }
                match &result {
                    Ok(_) => {
                        state.consecutive_failures = 0;
                        false
                    }
                    Err(_) => {
                        state.consecutive_failures += 1;
                        if state.consecutive_failures >= self.settings.max_failures {
                            // Detach our own handle instead of aborting it so the
                            // offline report below still runs.
                            drop(state.periodic.take());
                            if let Some(handle) = state.initial_retry.take() {
                                handle.abort();
                            }
                            state.phase = HeartbeatPhase::Stopped;
                            true
                        } else {
                            false
                        }
                    }
                }
            };

            match result {
                Ok(ack) => debug!(last_heartbeat = ?ack.last_heartbeat, "Heartbeat sent"),
                Err(e) => log_failure("periodic", &e),
            }

            if tripped {
                error!(
                    failures = self.settings.max_failures,
                    "Too many consecutive heartbeat failures, stopping heartbeat"
                );
                self.send_offline().await;
                return;
            }
        }
    }
}

fn log_failure(context: &'static str, err: &HeartbeatError) {
    match err {
        HeartbeatError::Status { status, message } => {
            let hint = match status {
                400 => "bad request, check the payload format",
                401 => "unauthorized, check the API key",
                500..=599 => "monitor server error",
                _ => "unexpected status",
            };
            error!(context, kind = err.kind(), status, %message, hint, "Heartbeat rejected");
        }
        HeartbeatError::Unreachable(detail) => {
            error!(context, kind = err.kind(), %detail, "No response from heartbeat server");
        }
        HeartbeatError::Request(detail) => {
            error!(context, kind = err.kind(), %detail, "Error building heartbeat request");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP sink
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AckEnvelope {
    #[serde(default)]
    data: Option<HeartbeatAck>,
}

#[derive(Debug, Deserialize)]
struct RejectBody {
    #[serde(default)]
    message: Option<String>,
}

/// Posts reports to `{dashboard}/api/status/heartbeat`.
#[derive(Debug, Clone)]
pub struct HttpHeartbeatSink {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpHeartbeatSink {
    /// Sink for `dashboard_url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`HeartbeatError::Request`] if the HTTP client cannot be built.
    pub fn new(
        dashboard_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> HeartbeatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HeartbeatError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}{HEARTBEAT_PATH}", dashboard_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// Sink from supervisor configuration.
    ///
    /// # Errors
    ///
    /// See [`HttpHeartbeatSink::new`].
    pub fn from_config(config: &SupervisorConfig) -> HeartbeatResult<Self> {
        Self::new(&config.dashboard_url, config.api_key.clone(), config.http_timeout())
    }

    /// Endpoint the sink posts to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HeartbeatSink for HttpHeartbeatSink {
    async fn send(&self, payload: &HeartbeatPayload) -> HeartbeatResult<HeartbeatAck> {
        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    HeartbeatError::Request(e.to_string())
                } else {
                    HeartbeatError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let message = serde_json::from_str::<RejectBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(body);
            return Err(HeartbeatError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str::<AckEnvelope>(&body)
            .ok()
            .and_then(|envelope| envelope.data)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_labels() {
        assert_eq!(HeartbeatPhase::Idle.as_str(), "idle");
        assert_eq!(HeartbeatPhase::Stopped.as_str(), "stopped");
    }

    #[test]
    fn settings_follow_config() {
        let config = SupervisorConfig::default();
        let started_at = Instant::now();
        let settings = HeartbeatSettings::from_config(&config, "owner", started_at);
        assert_eq!(settings.bot_id, "owner");
        assert_eq!(settings.interval, Duration::from_secs(300));
        assert_eq!(settings.max_failures, 3);
        assert_eq!(settings.initial_attempts, 3);
        assert_eq!(settings.initial_retry, Duration::from_secs(5));
        assert_eq!(settings.started_at, started_at);
    }

    #[test]
    fn http_sink_url_joins_path() {
        let sink = HttpHeartbeatSink::new("https://dash.example/", "k", Duration::from_secs(5))
            .unwrap();
        assert_eq!(sink.url(), "https://dash.example/api/status/heartbeat");
    }
}
