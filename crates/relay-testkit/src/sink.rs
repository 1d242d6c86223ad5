//! Heartbeat sink with scripted outcomes.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{HeartbeatAck, HeartbeatError, HeartbeatPayload, HeartbeatResult, HeartbeatSink};
use tokio::time::Instant;

/// Outcome of one scripted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    /// Accept the report.
    Accept,
    /// Reject with this HTTP status.
    Reject(u16),
    /// Simulate an unreachable monitor.
    Unreachable,
}

/// A report the sink received, with the (virtual) time it arrived.
#[derive(Debug, Clone)]
pub struct SentReport {
    /// Payload as sent.
    pub payload: HeartbeatPayload,
    /// Arrival time.
    pub at: Instant,
}

/// Records reports; answers from a queue, then from a default outcome.
#[derive(Debug)]
pub struct ScriptedSink {
    queue: Mutex<VecDeque<SinkOutcome>>,
    fallback: Mutex<SinkOutcome>,
    sent: Mutex<Vec<SentReport>>,
    latency: Duration,
}

impl Default for ScriptedSink {
    fn default() -> Self {
        Self::accepting()
    }
}

impl ScriptedSink {
    /// Sink that accepts everything.
    #[must_use]
    pub fn accepting() -> Self {
        Self::with_fallback(SinkOutcome::Accept)
    }

    /// Sink that fails everything as unreachable.
    #[must_use]
    pub fn failing() -> Self {
        Self::with_fallback(SinkOutcome::Unreachable)
    }

    /// Sink answering `fallback` once the queue is empty.
    #[must_use]
    pub fn with_fallback(fallback: SinkOutcome) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            sent: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Delay every send by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue outcomes used before the fallback.
    pub fn script(&self, outcomes: impl IntoIterator<Item = SinkOutcome>) {
        self.queue.lock().extend(outcomes);
    }

    /// Change the fallback outcome.
    pub fn set_fallback(&self, outcome: SinkOutcome) {
        *self.fallback.lock() = outcome;
    }

    /// Every report received.
    #[must_use]
    pub fn sent(&self) -> Vec<SentReport> {
        self.sent.lock().clone()
    }

    /// Number of liveness reports received.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.sent.lock().iter().filter(|r| !r.payload.is_offline()).count()
    }

    /// Number of offline reports received.
    #[must_use]
    pub fn offline_count(&self) -> usize {
        self.sent.lock().iter().filter(|r| r.payload.is_offline()).count()
    }
}

#[async_trait]
impl HeartbeatSink for ScriptedSink {
    async fn send(&self, payload: &HeartbeatPayload) -> HeartbeatResult<HeartbeatAck> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.sent.lock().push(SentReport {
            payload: payload.clone(),
            at: Instant::now(),
        });

        let outcome = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.fallback.lock());
        match outcome {
            SinkOutcome::Accept => Ok(HeartbeatAck {
                last_heartbeat: Some(payload.metadata.last_active.clone()),
            }),
            SinkOutcome::Reject(status) => Err(HeartbeatError::Status {
                status,
                message: "scripted rejection".into(),
            }),
            SinkOutcome::Unreachable => {
                Err(HeartbeatError::Unreachable("connection refused".into()))
            }
        }
    }
}
