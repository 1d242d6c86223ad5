//! Authentication material exchanged between the transport and the
//! credential store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Contents of `creds.json`.
///
/// Only the registration flag and the account identity are interpreted;
/// every other field is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCredentials {
    /// Set once pairing completed.
    #[serde(default)]
    pub registered: bool,
    /// Account identity, present after the first login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<Value>,
    /// Remaining protocol fields (keys, identifiers, counters).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthCredentials {
    /// Credentials for a session that has never paired.
    #[must_use]
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Overlay a partial update.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged document no longer has the expected
    /// shape (for example a non-boolean `registered`).
    pub fn merge(&mut self, patch: &Map<String, Value>) -> Result<(), serde_json::Error> {
        let mut current = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            current.insert(key.clone(), value.clone());
        }
        *self = serde_json::from_value(Value::Object(current))?;
        Ok(())
    }
}

/// One signal-key write; `value: None` deletes the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyWrite {
    /// Key category (`pre-key`, `session`, `sender-key`, ...).
    pub category: String,
    /// Key identifier within the category.
    pub id: String,
    /// New value, or `None` to delete.
    pub value: Option<Value>,
}

impl KeyWrite {
    /// Store `value` under `category`/`id`.
    #[must_use]
    pub fn set(category: impl Into<String>, id: impl Into<String>, value: Value) -> Self {
        Self {
            category: category.into(),
            id: id.into(),
            value: Some(value),
        }
    }

    /// Delete `category`/`id`.
    #[must_use]
    pub fn delete(category: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            id: id.into(),
            value: None,
        }
    }

    /// File name the key is persisted under. Path separators and colons
    /// in identifiers are replaced so every key stays a flat file.
    #[must_use]
    pub fn file_name(&self) -> String {
        key_file_name(&self.category, &self.id)
    }
}

/// File name for a signal key.
#[must_use]
pub fn key_file_name(category: &str, id: &str) -> String {
    let raw = format!("{category}-{id}.json");
    raw.replace('/', "__").replace(':', "-")
}

/// Credential change emitted by the transport. Must be persisted before
/// the connection continues.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialsUpdate {
    /// Changed `creds.json` fields.
    pub creds: Map<String, Value>,
    /// Signal-key writes.
    pub keys: Vec<KeyWrite>,
}

impl CredentialsUpdate {
    /// Update touching only `creds.json` fields.
    #[must_use]
    pub fn creds(fields: Map<String, Value>) -> Self {
        Self {
            creds: fields,
            keys: Vec::new(),
        }
    }

    /// Check if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creds.is_empty() && self.keys.is_empty()
    }
}
