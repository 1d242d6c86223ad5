//! Relaykeep core types.
//!
//! This crate holds everything the supervisor and its external collaborators
//! agree on:
//! - [`connection`]: connection state, close reasons and the reconnect decision
//! - [`event`]: socket events, the broadcast bus and explicit subscription handles
//! - [`message`]: message keys, message records and chat metadata
//! - [`credentials`]: authentication material and credential updates
//! - [`transport`]: the transport/socket seam plus the caches handed to it
//! - [`dispatch`]: the command/event dispatch seam
//! - [`status`]: the message counter and the status route seam
//! - [`monitor`]: the heartbeat wire format and the heartbeat sink seam
//! - [`settings`]: operator settings

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod connection;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod message;
pub mod monitor;
pub mod settings;
pub mod status;
pub mod transport;

pub use connection::{ConnectionState, ConnectionUpdate, DisconnectReason, ReconnectPolicy};
pub use credentials::{AuthCredentials, CredentialsUpdate, KeyWrite};
pub use dispatch::{EventDispatcher, NoopDispatcher};
pub use error::{
    ConfigError, DispatchError, DispatchResult, HeartbeatError, HeartbeatResult, TransportError,
    TransportResult,
};
pub use event::{EventBus, EventStream, SocketEvent, StopSignal, Subscription};
pub use message::{BodyChange, ChatMetadata, MessageKey, MessageUpdate, UpsertKind, WireMessage};
pub use monitor::{HeartbeatAck, HeartbeatMetadata, HeartbeatPayload, HeartbeatSink, ReportKind};
pub use settings::Settings;
pub use status::{MessageCounter, STATUS_ROUTE, StatusRegistrar, StatusReport};
pub use transport::{
    KeyStore, MessageLookup, Presence, ProtocolVersion, RetryCounterCache, Socket, SocketOptions,
    Transport,
};
