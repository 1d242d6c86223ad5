//! Relaykeep supervisor.
//!
//! Keeps one messaging session alive across network failures:
//! - [`credentials`]: resolve, persist and reload session credentials
//! - [`store`]: message/chat snapshot with periodic flushes
//! - [`heartbeat`]: liveness reports to the monitoring dashboard
//! - [`supervisor`]: the connection lifecycle and reconnect loop
//! - [`shutdown`]: the ordered, time-bounded shutdown sequence
//! - [`signal`]: SIGINT wiring and exit codes
//!
//! The transport, the command dispatcher and the HTTP status server are
//! supplied by the caller through the traits in `relay_core`.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod heartbeat;
pub mod keys;
pub mod logging;
mod persist;
pub mod shutdown;
pub mod signal;
pub mod store;
pub mod supervisor;

pub use config::{AppConfig, SupervisorConfig};
pub use credentials::{CredentialSource, CredentialStore, ResolvedCredentials};
pub use error::{
    CredentialError, CredentialResult, ShutdownStepError, StoreError, StoreResult,
    SupervisorError, SupervisorResult,
};
pub use heartbeat::{HeartbeatPhase, HeartbeatReporter, HeartbeatSettings, HttpHeartbeatSink};
pub use keys::{CachedKeyStore, FileKeyStore};
pub use logging::{LogFormat, init_tracing};
pub use shutdown::{ShutdownReport, ShutdownStep, StepStatus};
pub use signal::{run_until, run_until_interrupt};
pub use store::{FlushTimer, MessageStore, StoreSnapshot};
pub use supervisor::{Supervisor, SupervisorOutcome, SupervisorStats};
