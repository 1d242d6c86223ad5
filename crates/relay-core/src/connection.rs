//! Connection state and close classification.
//!
//! The transport reports every lifecycle change as a [`ConnectionUpdate`].
//! When the new state is [`ConnectionState::Closed`] the attached
//! [`DisconnectReason`] decides, through [`ReconnectPolicy::for_close`],
//! whether the supervisor reconnects or stops for good.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the single supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Socket constructed, handshake in progress.
    Connecting,
    /// Authenticated and exchanging messages.
    Open,
    /// Connection gone; see the accompanying close reason.
    Closed,
}

impl ConnectionState {
    /// Check if moving from `self` to `next` follows the lifecycle.
    ///
    /// Valid transitions:
    /// - `Connecting` → `Open` | `Closed`
    /// - `Open` → `Closed`
    /// - `Closed` → `Connecting`
    #[must_use]
    pub const fn is_valid_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open | Self::Closed)
                | (Self::Open, Self::Closed)
                | (Self::Closed, Self::Connecting)
        )
    }

    /// Lowercase name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the transport closed the connection.
///
/// Status codes mirror the ones the transport attaches to its close
/// errors. `408` is shared by lost and timed-out connections and maps to
/// [`DisconnectReason::ConnectionLost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The server closed the stream (428).
    ConnectionClosed,
    /// Network loss or keep-alive timeout (408).
    ConnectionLost,
    /// Another client took over this session (440).
    ConnectionReplaced,
    /// The remote service revoked the session (401). Authoritative.
    LoggedOut,
    /// Session state is corrupt (500).
    BadSession,
    /// The server asked for a restart, typically right after pairing (515).
    RestartRequired,
    /// Multi-device protocol mismatch (411).
    MultideviceMismatch,
    /// Access denied (403).
    Forbidden,
    /// Service temporarily unavailable (503).
    Unavailable,
    /// Any other status code.
    Unknown(u16),
}

impl DisconnectReason {
    /// Map a transport status code to a reason.
    #[must_use]
    pub const fn from_status_code(code: u16) -> Self {
        match code {
            428 => Self::ConnectionClosed,
            408 => Self::ConnectionLost,
            440 => Self::ConnectionReplaced,
            401 => Self::LoggedOut,
            500 => Self::BadSession,
            515 => Self::RestartRequired,
            411 => Self::MultideviceMismatch,
            403 => Self::Forbidden,
            503 => Self::Unavailable,
            other => Self::Unknown(other),
        }
    }

    /// Status code for this reason.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::ConnectionClosed => 428,
            Self::ConnectionLost => 408,
            Self::ConnectionReplaced => 440,
            Self::LoggedOut => 401,
            Self::BadSession => 500,
            Self::RestartRequired => 515,
            Self::MultideviceMismatch => 411,
            Self::Forbidden => 403,
            Self::Unavailable => 503,
            Self::Unknown(code) => code,
        }
    }

    /// Only an explicit logout from the remote service is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionLost => "connection lost",
            Self::ConnectionReplaced => "connection replaced",
            Self::LoggedOut => "logged out",
            Self::BadSession => "bad session",
            Self::RestartRequired => "restart required",
            Self::MultideviceMismatch => "multi-device mismatch",
            Self::Forbidden => "forbidden",
            Self::Unavailable => "service unavailable",
            Self::Unknown(_) => "unknown",
        };
        write!(f, "{name} ({})", self.status_code())
    }
}

/// A lifecycle change reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUpdate {
    /// New state.
    pub state: ConnectionState,
    /// Close reason, present when `state` is `Closed`.
    pub reason: Option<DisconnectReason>,
    /// Free-form detail from the transport's close error.
    pub detail: Option<String>,
}

impl ConnectionUpdate {
    /// Update announcing the handshake has started.
    #[must_use]
    pub const fn connecting() -> Self {
        Self {
            state: ConnectionState::Connecting,
            reason: None,
            detail: None,
        }
    }

    /// Update announcing the connection is open.
    #[must_use]
    pub const fn open() -> Self {
        Self {
            state: ConnectionState::Open,
            reason: None,
            detail: None,
        }
    }

    /// Update announcing the connection closed.
    #[must_use]
    pub const fn closed(reason: DisconnectReason) -> Self {
        Self {
            state: ConnectionState::Closed,
            reason: Some(reason),
            detail: None,
        }
    }

    /// Builder: attach a detail string.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Close reason, treating a missing reason as a lost connection.
    #[must_use]
    pub fn close_reason(&self) -> DisconnectReason {
        self.reason.unwrap_or(DisconnectReason::ConnectionLost)
    }
}

/// What to do after a close. Computed per close, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Tear down and run a fresh connection cycle after `delay`.
    Reconnect {
        /// Delay before the next cycle starts.
        delay: Duration,
    },
    /// Stop reconnecting and halt the periodic flush.
    Terminal,
}

impl ReconnectPolicy {
    /// Decide the policy for a close with the given reason.
    #[must_use]
    pub const fn for_close(reason: DisconnectReason, delay: Duration) -> Self {
        if reason.is_terminal() {
            Self::Terminal
        } else {
            Self::Reconnect { delay }
        }
    }

    /// Check if this policy schedules another connection cycle.
    #[must_use]
    pub const fn should_reconnect(self) -> bool {
        matches!(self, Self::Reconnect { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip_for_known_reasons() {
        for code in [428, 408, 440, 401, 500, 515, 411, 403, 503] {
            assert_eq!(DisconnectReason::from_status_code(code).status_code(), code);
        }
        assert_eq!(
            DisconnectReason::from_status_code(418),
            DisconnectReason::Unknown(418)
        );
    }

    #[test]
    fn only_logged_out_is_terminal() {
        let delay = Duration::from_secs(5);
        assert_eq!(
            ReconnectPolicy::for_close(DisconnectReason::LoggedOut, delay),
            ReconnectPolicy::Terminal
        );
        for reason in [
            DisconnectReason::ConnectionClosed,
            DisconnectReason::ConnectionLost,
            DisconnectReason::ConnectionReplaced,
            DisconnectReason::BadSession,
            DisconnectReason::RestartRequired,
            DisconnectReason::Unknown(999),
        ] {
            assert_eq!(
                ReconnectPolicy::for_close(reason, delay),
                ReconnectPolicy::Reconnect { delay },
                "{reason} should reconnect"
            );
        }
    }

    #[test]
    fn lifecycle_transitions() {
        use ConnectionState::{Closed, Connecting, Open};
        assert!(Connecting.is_valid_transition(Open));
        assert!(Connecting.is_valid_transition(Closed));
        assert!(Open.is_valid_transition(Closed));
        assert!(Closed.is_valid_transition(Connecting));
        assert!(!Open.is_valid_transition(Connecting));
        assert!(!Closed.is_valid_transition(Open));
    }

    #[test]
    fn missing_close_reason_is_transient() {
        let update = ConnectionUpdate {
            state: ConnectionState::Closed,
            reason: None,
            detail: None,
        };
        assert_eq!(update.close_reason(), DisconnectReason::ConnectionLost);
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(DisconnectReason::LoggedOut.to_string(), "logged out (401)");
    }
}
