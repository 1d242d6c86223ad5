//! Heartbeat wire format and the sink that delivers it.
//!
//! Reports go to `POST /api/status/heartbeat` on the monitoring dashboard:
//!
//! ```json
//! { "botId": "owner", "metadata": { "version": "1.0.0", "messagesSent": 12,
//!   "uptime": 360, "lastActive": "2024-05-01T10:00:00.000Z" } }
//! ```
//!
//! The final report sent when the reporter stops carries
//! `"status": "offline"` in `metadata` and the same `botId` field.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HeartbeatResult;

/// Whether a report is a regular liveness report or the final one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Periodic or initial liveness report.
    Alive,
    /// Best-effort report sent when the reporter stops.
    Offline,
}

/// Report body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    /// Bot instance identity (the configured owner name).
    pub bot_id: String,
    /// Liveness details.
    pub metadata: HeartbeatMetadata,
}

/// Liveness details of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMetadata {
    /// Fixed version tag.
    pub version: String,
    /// Messages observed since startup.
    pub messages_sent: u64,
    /// Process uptime in whole seconds.
    pub uptime: u64,
    /// ISO-8601 timestamp of the last activity.
    pub last_active: String,
    /// `"offline"` on the final report, absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl HeartbeatPayload {
    /// Build a report.
    #[must_use]
    pub fn new(
        bot_id: impl Into<String>,
        version: impl Into<String>,
        messages_sent: u64,
        uptime_secs: u64,
        last_active: DateTime<Utc>,
        kind: ReportKind,
    ) -> Self {
        Self {
            bot_id: bot_id.into(),
            metadata: HeartbeatMetadata {
                version: version.into(),
                messages_sent,
                uptime: uptime_secs,
                last_active: last_active.to_rfc3339_opts(SecondsFormat::Millis, true),
                status: match kind {
                    ReportKind::Alive => None,
                    ReportKind::Offline => Some("offline".to_string()),
                },
            },
        }
    }

    /// Check if this is the final offline report.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.metadata.status.as_deref() == Some("offline")
    }
}

/// Success body returned by the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    /// Timestamp the monitor recorded, if it returned one.
    pub last_heartbeat: Option<String>,
}

/// Delivers heartbeat reports to the monitor.
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    /// Send one report. Implementations bound the call with a timeout.
    async fn send(&self, payload: &HeartbeatPayload) -> HeartbeatResult<HeartbeatAck>;
}
