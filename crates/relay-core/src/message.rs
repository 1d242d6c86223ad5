//! Message and chat records as the transport reports them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stub type the transport attaches to a revoked ("deleted for everyone") message.
pub const REVOKE_STUB_TYPE: u32 = 2;

/// Identifies one message within one chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Chat identifier.
    pub remote_jid: String,
    /// Message identifier, unique within the chat.
    pub id: String,
    /// Whether this process's account sent the message.
    #[serde(default)]
    pub from_me: bool,
    /// Sender inside a group chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

impl MessageKey {
    /// Key for a message received in `chat`.
    #[must_use]
    pub fn new(chat: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            remote_jid: chat.into(),
            id: id.into(),
            from_me: false,
            participant: None,
        }
    }
}

/// A message record. The body stays opaque protocol JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Message identity.
    pub key: MessageKey,
    /// Protocol message body; `None` once revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// Seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<i64>,
    /// Display name of the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    /// Protocol stub type for system messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_stub_type: Option<u32>,
    /// Delivery status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
}

impl WireMessage {
    /// A plain text message.
    #[must_use]
    pub fn text(key: MessageKey, text: impl Into<String>) -> Self {
        Self {
            key,
            message: Some(serde_json::json!({ "conversation": text.into() })),
            message_timestamp: None,
            push_name: None,
            message_stub_type: None,
            status: None,
        }
    }

    /// Apply an update in place. A removed body keeps the stored content so
    /// deletion handlers can still see what was deleted.
    pub fn apply(&mut self, update: &MessageUpdate) {
        if let BodyChange::Replaced(body) = &update.body {
            self.message = Some(body.clone());
        }
        if let Some(stub) = update.stub_type {
            self.message_stub_type = Some(stub);
        }
        if let Some(status) = update.status {
            self.status = Some(status);
        }
    }
}

/// Whether an inbound batch is live traffic or history backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKind {
    /// New message delivered live.
    Notify,
    /// History sync or outbound echo.
    Append,
}

/// What happened to a message body in an update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BodyChange {
    /// The update did not touch the body.
    #[default]
    Unchanged,
    /// The body was explicitly nulled (deleted).
    Removed,
    /// The body was edited.
    Replaced(Value),
}

/// Partial update for a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUpdate {
    /// Message being updated.
    pub key: MessageKey,
    /// Body change.
    pub body: BodyChange,
    /// New stub type, if any.
    pub stub_type: Option<u32>,
    /// New delivery status, if any.
    pub status: Option<u32>,
}

impl MessageUpdate {
    /// An update that revokes the message body.
    #[must_use]
    pub const fn revoke(key: MessageKey) -> Self {
        Self {
            key,
            body: BodyChange::Removed,
            stub_type: Some(REVOKE_STUB_TYPE),
            status: None,
        }
    }

    /// A delivery status change.
    #[must_use]
    pub const fn status(key: MessageKey, status: u32) -> Self {
        Self {
            key,
            body: BodyChange::Unchanged,
            stub_type: None,
            status: Some(status),
        }
    }

    /// A null body or the revoke stub marks a deletion.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        matches!(self.body, BodyChange::Removed) || self.stub_type == Some(REVOKE_STUB_TYPE)
    }
}

/// Chat metadata. Update events carry only the changed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    /// Chat identifier.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Unread message count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    /// Timestamp of the last message in the chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_timestamp: Option<i64>,
    /// Archived flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

impl ChatMetadata {
    /// Overlay the fields present in `patch`.
    pub fn merge(&mut self, patch: &Self) {
        if patch.name.is_some() {
            self.name.clone_from(&patch.name);
        }
        if patch.unread_count.is_some() {
            self.unread_count = patch.unread_count;
        }
        if patch.conversation_timestamp.is_some() {
            self.conversation_timestamp = patch.conversation_timestamp;
        }
        if patch.archived.is_some() {
            self.archived = patch.archived;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deletion_detection() {
        let key = MessageKey::new("chat@s", "m1");
        assert!(MessageUpdate::revoke(key.clone()).is_deletion());

        let null_body = MessageUpdate {
            key: key.clone(),
            body: BodyChange::Removed,
            stub_type: None,
            status: None,
        };
        assert!(null_body.is_deletion());

        let stub_only = MessageUpdate {
            key: key.clone(),
            body: BodyChange::Unchanged,
            stub_type: Some(REVOKE_STUB_TYPE),
            status: None,
        };
        assert!(stub_only.is_deletion());

        assert!(!MessageUpdate::status(key, 3).is_deletion());
    }

    #[test]
    fn revoke_keeps_original_body() {
        let key = MessageKey::new("chat@s", "m1");
        let mut stored = WireMessage::text(key.clone(), "hello");
        stored.apply(&MessageUpdate::revoke(key));
        assert_eq!(stored.message, Some(json!({ "conversation": "hello" })));
        assert_eq!(stored.message_stub_type, Some(REVOKE_STUB_TYPE));
    }

    #[test]
    fn chat_merge_only_overlays_present_fields() {
        let mut chat = ChatMetadata {
            id: "c".into(),
            name: Some("Team".into()),
            unread_count: Some(4),
            ..ChatMetadata::default()
        };
        chat.merge(&ChatMetadata {
            id: "c".into(),
            unread_count: Some(0),
            ..ChatMetadata::default()
        });
        assert_eq!(chat.name.as_deref(), Some("Team"));
        assert_eq!(chat.unread_count, Some(0));
    }

    #[test]
    fn key_serializes_camel_case() {
        let key = MessageKey::new("chat@s", "m1");
        let value = serde_json::to_value(&key).unwrap();
        assert_eq!(
            value,
            json!({ "remoteJid": "chat@s", "id": "m1", "fromMe": false })
        );
    }
}
