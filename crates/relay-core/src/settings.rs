//! Operator settings.
//!
//! Loaded from a TOML file and/or the process environment. Environment
//! values win over file values.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Operator-facing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Owner display name; doubles as the heartbeat bot id.
    pub owner_name: String,
    /// Comma-separated owner phone numbers. The first is the pairing number.
    pub owner_numbers: String,
    /// Session reference: empty, a remote reference (prefixed), or an
    /// inline base64 credential blob.
    pub session_id: String,
    /// Advertise `available` presence when connected.
    pub always_online: bool,
    /// Log level (`trace`..`error`, or `silent`).
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            owner_name: String::new(),
            owner_numbers: String::new(),
            session_id: String::new(),
            always_online: false,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "silent".to_string()
}

/// Environment variables read by [`Settings::apply_env`].
pub const ENV_OWNER_NAME: &str = "OWNER_NAME";
/// Owner numbers variable.
pub const ENV_OWNER_NUMBERS: &str = "OWNER_NUMBERS";
/// Session reference variable.
pub const ENV_SESSION_ID: &str = "SESSION_ID";
/// Presence flag variable.
pub const ENV_ALWAYS_ONLINE: &str = "ALWAYS_ONLINE";
/// Log level variable.
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

impl Settings {
    /// Parse settings from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or wrong types.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Defaults overlaid with the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env(|name| std::env::var(name).ok());
        settings
    }

    /// Overlay values from `lookup` (an environment accessor).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_OWNER_NAME) {
            self.owner_name = value;
        }
        if let Some(value) = lookup(ENV_OWNER_NUMBERS) {
            self.owner_numbers = value;
        }
        if let Some(value) = lookup(ENV_SESSION_ID) {
            self.session_id = value;
        }
        if let Some(value) = lookup(ENV_ALWAYS_ONLINE) {
            self.always_online = parse_flag(&value);
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.log_level = value;
        }
    }

    /// Session reference with surrounding whitespace removed.
    #[must_use]
    pub fn session_reference(&self) -> &str {
        self.session_id.trim()
    }

    /// First owner number, trimmed, if any.
    #[must_use]
    pub fn primary_owner_number(&self) -> Option<&str> {
        self.owner_numbers
            .split(',')
            .map(str::trim)
            .find(|n| !n.is_empty())
    }

    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.owner_name.trim().is_empty() {
            errors.push("owner_name must not be empty".to_string());
        }
        if let Some(number) = self.primary_owner_number() {
            if !number.chars().all(|c| c.is_ascii_digit()) {
                errors.push(format!("owner number `{number}` must contain digits only"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_toml_with_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            owner_name = "kord"
            owner_numbers = " 2348012345678 , 2348000000000"
            always_online = true
            "#,
        )
        .unwrap();
        assert_eq!(settings.owner_name, "kord");
        assert!(settings.always_online);
        assert_eq!(settings.log_level, "silent");
        assert_eq!(settings.primary_owner_number(), Some("2348012345678"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(Settings::from_toml_str("always_online = \"maybe\"").is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_OWNER_NAME, "env-owner"),
            (ENV_ALWAYS_ONLINE, "YES"),
            (ENV_SESSION_ID, "  kord_ai-abc  "),
        ]
        .into_iter()
        .collect();
        let mut settings = Settings {
            owner_name: "file-owner".into(),
            ..Settings::default()
        };
        settings.apply_env(|name| env.get(name).map(|v| (*v).to_string()));

        assert_eq!(settings.owner_name, "env-owner");
        assert!(settings.always_online);
        assert_eq!(settings.session_reference(), "kord_ai-abc");
    }

    #[test]
    fn validation_reports_every_problem() {
        let settings = Settings {
            owner_numbers: "+234-80".into(),
            ..Settings::default()
        };
        match settings.validate() {
            Err(ConfigError::Invalid(problems)) => assert_eq!(problems.len(), 2),
            other => panic!("expected invalid settings, got {other:?}"),
        }
    }

    #[test]
    fn no_owner_numbers_means_no_pairing_number() {
        let settings = Settings {
            owner_numbers: " , ".into(),
            ..Settings::default()
        };
        assert_eq!(settings.primary_owner_number(), None);
    }
}
