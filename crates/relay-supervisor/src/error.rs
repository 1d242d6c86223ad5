//! Supervisor error taxonomy.
//!
//! Only [`CredentialError`] aborts startup. Every other category is caught
//! at its own boundary and converted into a log line plus a fallback.

use std::path::PathBuf;
use std::time::Duration;

use relay_core::{ConfigError, HeartbeatError, TransportError};
use thiserror::Error;

/// Credential resolution or persistence failed.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Remote fetch could not reach the dashboard or timed out.
    #[error("Failed to fetch credentials from API: {0}")]
    Fetch(String),

    /// Dashboard answered with a non-success HTTP status.
    #[error("Credential API returned status {status}: {body}")]
    FetchStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Dashboard answered 2xx but without usable data.
    #[error("Invalid or missing data in API response")]
    InvalidResponse,

    /// Inline blob was not valid base64 / UTF-8 / JSON.
    #[error("Invalid inline session blob: {0}")]
    InvalidBlob(String),

    /// Persisted credentials could not be parsed.
    #[error("Corrupt credentials at {path}: {message}")]
    Corrupt {
        /// File that failed to parse.
        path: PathBuf,
        /// Parse error.
        message: String,
    },

    /// Filesystem error.
    #[error("Credential I/O error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Signal key files could not be written.
    #[error("Failed to persist signal keys: {0}")]
    Keys(#[from] TransportError),

    /// Merging an update produced an invalid document.
    #[error("Invalid credential update: {0}")]
    InvalidUpdate(#[from] serde_json::Error),
}

impl CredentialError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for credential operations.
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Message store load or flush failed.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Snapshot file exists but could not be parsed. Recovered to an empty store.
    #[error("Failed to load store from {path}: {message}")]
    Load {
        /// Snapshot file.
        path: PathBuf,
        /// Parse or read error.
        message: String,
    },

    /// Snapshot could not be written.
    #[error("Failed to write store to {path}: {source}")]
    Write {
        /// Snapshot file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be serialized.
    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A graceful-shutdown step failed. Logged; later steps still run.
#[derive(Error, Debug)]
pub enum ShutdownStepError {
    /// The step exceeded its time bound.
    #[error("Step timed out after {0:?}")]
    TimedOut(Duration),

    /// Final flush failed.
    #[error(transparent)]
    Flush(#[from] StoreError),

    /// Logout failed.
    #[error(transparent)]
    Logout(#[from] TransportError),
}

/// Fatal supervisor errors.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Credentials could not be resolved at startup.
    #[error("Credential resolution failed: {0}")]
    Credentials(#[from] CredentialError),

    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The heartbeat client could not be built.
    #[error("Heartbeat setup failed: {0}")]
    Heartbeat(#[from] HeartbeatError),
}

/// Result type for supervisor runs.
pub type SupervisorResult<T> = Result<T, SupervisorError>;
