//! Test doubles for the relay supervisor.
//!
//! - [`transport`]: a transport answering `connect` from a script, and a
//!   socket whose events the test emits
//! - [`dispatch`]: a dispatcher and status registrar that record calls
//! - [`sink`]: a heartbeat sink with scripted outcomes
//! - [`logs`]: JSON log capture

#![forbid(unsafe_code)]
#![allow(clippy::missing_panics_doc)]

pub mod dispatch;
pub mod logs;
pub mod sink;
pub mod transport;

pub use dispatch::{DispatchCall, RecordingDispatcher, RecordingRegistrar};
pub use logs::LogCapture;
pub use sink::{ScriptedSink, SentReport, SinkOutcome};
pub use transport::{ConnectStep, FakeSocket, ScriptedTransport, SocketCall, TEST_VERSION};

use relay_core::{MessageKey, SocketEvent, UpsertKind, WireMessage};

/// A live batch of `count` text messages in `chat`, ids `m0..`.
#[must_use]
pub fn text_batch(chat: &str, count: usize) -> SocketEvent {
    SocketEvent::MessagesUpsert {
        messages: (0..count)
            .map(|i| WireMessage::text(MessageKey::new(chat, format!("m{i}")), format!("text {i}")))
            .collect(),
        kind: UpsertKind::Notify,
    }
}
