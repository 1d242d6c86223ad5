//! Process entry glue: run a supervisor until SIGINT and map the outcome to
//! an exit code.

use std::future::Future;
use std::io;
use std::process::ExitCode;

use relay_core::{EventDispatcher, Transport};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::SupervisorResult;
use crate::supervisor::{Supervisor, SupervisorOutcome};

/// Wait for SIGINT (and SIGTERM on unix).
///
/// # Errors
///
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Exit code for a finished run. Graceful shutdown and logout exit 0.
#[must_use]
pub fn exit_code(result: &SupervisorResult<SupervisorOutcome>) -> ExitCode {
    match result {
        Ok(SupervisorOutcome::Shutdown(report)) => {
            if !report.is_clean() {
                warn!(failed = ?report.failures(), "Shutdown finished with failed steps");
            }
            ExitCode::SUCCESS
        }
        Ok(SupervisorOutcome::LoggedOut) => {
            warn!("Session logged out; clear the session and pair again");
            ExitCode::SUCCESS
        }
        Ok(SupervisorOutcome::MaxFailuresReached { failures }) => {
            error!(failures, "Giving up after repeated connection failures");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Supervisor failed");
            ExitCode::FAILURE
        }
    }
}

/// Run `supervisor` until `signal` resolves, then shut down gracefully.
pub async fn run_until<T, D, S>(supervisor: &mut Supervisor<T, D>, signal: S) -> ExitCode
where
    T: Transport,
    D: EventDispatcher,
    S: Future<Output = io::Result<()>> + Send + 'static,
{
    let (tx, rx) = watch::channel(false);
    let watcher = tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                info!("Received shutdown signal");
                let _ = tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "Signal handler failed; shutdown only via logout");
                // Keep the sender alive so the supervisor does not read the
                // closed channel as a shutdown request.
                std::future::pending::<()>().await;
                drop(tx);
            }
        }
    });

    let result = supervisor.run(rx).await;
    watcher.abort();
    exit_code(&result)
}

/// Run `supervisor` until SIGINT. Returns [`ExitCode::SUCCESS`] after a
/// graceful shutdown.
pub async fn run_until_interrupt<T, D>(supervisor: &mut Supervisor<T, D>) -> ExitCode
where
    T: Transport,
    D: EventDispatcher,
{
    run_until(supervisor, wait_for_shutdown_signal()).await
}
