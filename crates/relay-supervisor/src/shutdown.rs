//! Graceful shutdown: cancel the flush timer, stop the heartbeat, flush the
//! store, log out. Each step is time-bounded and a failing step never
//! prevents the next one from running.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relay_core::Socket;
use tracing::{debug, error, info};

use crate::error::ShutdownStepError;
use crate::heartbeat::HeartbeatReporter;
use crate::store::{FlushTimer, MessageStore};

/// One step of the shutdown sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownStep {
    /// Stop the periodic store flush.
    CancelFlush,
    /// Stop the heartbeat reporter (sends the offline report).
    StopHeartbeat,
    /// Write the store one last time.
    FinalFlush,
    /// Log the socket out.
    Logout,
}

impl ShutdownStep {
    /// Every step, in order.
    pub const ALL: [Self; 4] = [
        Self::CancelFlush,
        Self::StopHeartbeat,
        Self::FinalFlush,
        Self::Logout,
    ];

    /// Step name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CancelFlush => "cancel_flush",
            Self::StopHeartbeat => "stop_heartbeat",
            Self::FinalFlush => "final_flush",
            Self::Logout => "logout",
        }
    }
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a step ended.
#[derive(Debug)]
pub enum StepStatus {
    /// Completed.
    Done,
    /// Nothing to do (no timer or no socket).
    Skipped,
    /// Failed or timed out.
    Failed(ShutdownStepError),
}

/// Record of one executed step.
#[derive(Debug)]
pub struct StepRecord {
    /// Which step.
    pub step: ShutdownStep,
    /// How it ended.
    pub status: StepStatus,
}

/// Outcome of the shutdown sequence.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Steps in the order they ran.
    pub steps: Vec<StepRecord>,
}

impl ShutdownReport {
    /// Steps in execution order.
    #[must_use]
    pub fn order(&self) -> Vec<ShutdownStep> {
        self.steps.iter().map(|r| r.step).collect()
    }

    /// Steps that failed.
    #[must_use]
    pub fn failures(&self) -> Vec<ShutdownStep> {
        self.steps
            .iter()
            .filter(|r| matches!(r.status, StepStatus::Failed(_)))
            .map(|r| r.step)
            .collect()
    }

    /// Check if every step completed or was skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }

    fn record(&mut self, step: ShutdownStep, status: StepStatus) {
        match &status {
            StepStatus::Done => debug!(step = step.as_str(), "Shutdown step complete"),
            StepStatus::Skipped => debug!(step = step.as_str(), "Shutdown step skipped"),
            StepStatus::Failed(e) => error!(step = step.as_str(), error = %e, "Shutdown step failed"),
        }
        self.steps.push(StepRecord { step, status });
    }
}

/// Everything the shutdown sequence touches.
pub struct ShutdownContext<'a> {
    /// Running flush timer, if any.
    pub flush_timer: Option<FlushTimer>,
    /// Heartbeat reporter.
    pub heartbeat: &'a HeartbeatReporter,
    /// Store to flush.
    pub store: &'a MessageStore,
    /// Socket to log out, if a connection exists.
    pub socket: Option<&'a Arc<dyn Socket>>,
    /// Upper bound for each step.
    pub step_timeout: Duration,
}

async fn bounded<F>(limit: Duration, step: F) -> StepStatus
where
    F: Future<Output = Result<(), ShutdownStepError>>,
{
    match tokio::time::timeout(limit, step).await {
        Ok(Ok(())) => StepStatus::Done,
        Ok(Err(e)) => StepStatus::Failed(e),
        Err(_) => StepStatus::Failed(ShutdownStepError::TimedOut(limit)),
    }
}

/// Run the shutdown sequence to completion.
pub async fn graceful_shutdown(ctx: ShutdownContext<'_>) -> ShutdownReport {
    info!("Shutting down: saving store and logging out");
    let mut report = ShutdownReport::default();

    let status = match ctx.flush_timer {
        Some(timer) => {
            timer.cancel();
            StepStatus::Done
        }
        None => StepStatus::Skipped,
    };
    report.record(ShutdownStep::CancelFlush, status);

    let status = bounded(ctx.step_timeout, async {
        ctx.heartbeat.stop().await;
        Ok(())
    })
    .await;
    report.record(ShutdownStep::StopHeartbeat, status);

    let status = bounded(ctx.step_timeout, async {
        ctx.store.flush().await.map_err(ShutdownStepError::from)
    })
    .await;
    report.record(ShutdownStep::FinalFlush, status);

    let status = match ctx.socket {
        Some(socket) => {
            bounded(ctx.step_timeout, async {
                socket.logout().await.map_err(ShutdownStepError::from)
            })
            .await
        }
        None => StepStatus::Skipped,
    };
    report.record(ShutdownStep::Logout, status);

    info!(failures = report.failures().len(), "Shutdown complete");
    report
}
