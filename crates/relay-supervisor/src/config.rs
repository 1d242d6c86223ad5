//! Supervisor timings, paths and endpoints.

use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_core::{ConfigError, Settings};
use serde::{Deserialize, Serialize};

/// Configuration for the supervisor and its components.
///
/// Durations are stored in milliseconds so the struct round-trips through
/// TOML. Defaults match the production deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Directory holding `creds.json` and the signal key files.
    pub session_dir: PathBuf,

    /// Message store snapshot file.
    pub store_path: PathBuf,

    /// Base URL of the monitoring dashboard (heartbeat + credential fetch).
    pub dashboard_url: String,

    /// API key sent to the dashboard.
    pub api_key: String,

    /// Session references starting with this prefix are fetched remotely.
    pub remote_session_prefix: String,

    /// Version tag reported in heartbeats.
    pub version_tag: String,

    /// Delay before a transient close starts the next connection cycle.
    /// Default: 5000ms.
    pub reconnect_delay_ms: u64,

    /// Maximum consecutive failed connection attempts before giving up.
    /// `None` retries forever. Default: `None`.
    pub max_consecutive_failures: Option<u32>,

    /// Store flush period. Default: 30000ms.
    pub flush_interval_ms: u64,

    /// Periodic heartbeat interval. Default: 300000ms (5 minutes).
    pub heartbeat_interval_ms: u64,

    /// Consecutive periodic failures that stop the reporter. Default: 3.
    pub heartbeat_max_failures: u32,

    /// Attempts for the first heartbeat of a connection. Default: 3.
    pub initial_heartbeat_attempts: u32,

    /// Delay between initial heartbeat attempts. Default: 5000ms.
    pub initial_heartbeat_retry_ms: u64,

    /// Timeout for outbound HTTP calls. Default: 5000ms.
    pub http_timeout_ms: u64,

    /// Upper bound for each graceful-shutdown step. Default: 5000ms.
    pub shutdown_step_timeout_ms: u64,

    /// Capacity of the outbound retry counter cache. Default: 1024.
    pub retry_cache_capacity: usize,

    /// Delete stale `pre-key-*` / `session-*` files at startup. Default: off.
    pub prune_stale_keys: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            session_dir: PathBuf::from("Session"),
            store_path: PathBuf::from("store.json"),
            dashboard_url: "https://kordai-dash.vercel.app".to_string(),
            api_key: "kordAi.key".to_string(),
            remote_session_prefix: "kord_ai-".to_string(),
            version_tag: "1.0.0".to_string(),
            reconnect_delay_ms: 5_000,
            max_consecutive_failures: None,
            flush_interval_ms: 30_000,
            heartbeat_interval_ms: 300_000,
            heartbeat_max_failures: 3,
            initial_heartbeat_attempts: 3,
            initial_heartbeat_retry_ms: 5_000,
            http_timeout_ms: 5_000,
            shutdown_step_timeout_ms: 5_000,
            retry_cache_capacity: 1_024,
            prune_stale_keys: false,
        }
    }
}

/// Environment variable overriding the dashboard API key.
pub const ENV_API_KEY: &str = "HEARTBEAT_API_KEY";
/// Environment variable overriding the dashboard URL.
pub const ENV_DASHBOARD_URL: &str = "DASHBOARD_URL";

impl SupervisorConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Overlay values from `lookup` (an environment accessor).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY) {
            self.api_key = key;
        }
        if let Some(url) = lookup(ENV_DASHBOARD_URL) {
            self.dashboard_url = url;
        }
    }

    /// Builder: place the session directory and store file under `root`.
    #[must_use]
    pub fn with_data_dir(mut self, root: &Path) -> Self {
        self.session_dir = root.join("Session");
        self.store_path = root.join("store.json");
        self
    }

    /// Builder: set the dashboard URL.
    #[must_use]
    pub fn with_dashboard_url(mut self, url: impl Into<String>) -> Self {
        self.dashboard_url = url.into();
        self
    }

    /// Builder: set the reconnect delay.
    #[must_use]
    pub const fn with_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_delay_ms = ms;
        self
    }

    /// Builder: bound consecutive connection failures.
    #[must_use]
    pub const fn with_max_consecutive_failures(mut self, max: Option<u32>) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Builder: set the flush interval.
    #[must_use]
    pub const fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }

    /// Builder: set the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    /// Path of `creds.json`.
    #[must_use]
    pub fn creds_path(&self) -> PathBuf {
        self.session_dir.join(crate::credentials::CREDS_FILE)
    }

    /// Reconnect delay as a Duration.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Flush interval as a Duration.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Heartbeat interval as a Duration.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Initial heartbeat retry delay as a Duration.
    #[must_use]
    pub const fn initial_heartbeat_retry(&self) -> Duration {
        Duration::from_millis(self.initial_heartbeat_retry_ms)
    }

    /// HTTP timeout as a Duration.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Shutdown step timeout as a Duration.
    #[must_use]
    pub const fn shutdown_step_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_step_timeout_ms)
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns every invalid value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.flush_interval_ms == 0 {
            errors.push("flush_interval_ms must be > 0".to_string());
        }
        if self.heartbeat_interval_ms == 0 {
            errors.push("heartbeat_interval_ms must be > 0".to_string());
        }
        if self.heartbeat_max_failures == 0 {
            errors.push("heartbeat_max_failures must be > 0".to_string());
        }
        if self.initial_heartbeat_attempts == 0 {
            errors.push("initial_heartbeat_attempts must be > 0".to_string());
        }
        if self.http_timeout_ms == 0 {
            errors.push("http_timeout_ms must be > 0".to_string());
        }
        if self.max_consecutive_failures == Some(0) {
            errors.push("max_consecutive_failures must be > 0 when set".to_string());
        }
        if self.retry_cache_capacity == 0 {
            errors.push("retry_cache_capacity must be > 0".to_string());
        }
        if self.remote_session_prefix.is_empty() {
            errors.push("remote_session_prefix must not be empty".to_string());
        }
        if !(self.dashboard_url.starts_with("http://") || self.dashboard_url.starts_with("https://"))
        {
            errors.push("dashboard_url must be an http(s) URL".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

/// Complete process configuration: one TOML file with a `[settings]` and a
/// `[supervisor]` table, overlaid by the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Operator settings.
    pub settings: Settings,
    /// Supervisor timings, paths and endpoints.
    pub supervisor: SupervisorConfig,
}

impl AppConfig {
    /// Parse from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load `path` (if given) and overlay the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from `lookup` on both sections.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.settings.apply_env(&lookup);
        self.supervisor.apply_env(&lookup);
    }

    /// Validate both sections, reporting every problem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing all problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        for result in [self.settings.validate(), self.supervisor.validate()] {
            match result {
                Ok(()) => {}
                Err(ConfigError::Invalid(found)) => problems.extend(found),
                Err(other) => return Err(other),
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let config = SupervisorConfig::default();
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(300));
        assert_eq!(config.heartbeat_max_failures, 3);
        assert_eq!(config.initial_heartbeat_attempts, 3);
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_collects_errors() {
        let config = SupervisorConfig {
            flush_interval_ms: 0,
            heartbeat_max_failures: 0,
            dashboard_url: "ftp://nope".into(),
            ..SupervisorConfig::default()
        };
        match config.validate() {
            Err(ConfigError::Invalid(problems)) => assert_eq!(problems.len(), 3),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn empty_remote_prefix_is_rejected() {
        let config = SupervisorConfig {
            remote_session_prefix: String::new(),
            ..SupervisorConfig::default()
        };
        match config.validate() {
            Err(ConfigError::Invalid(problems)) => {
                assert_eq!(problems, vec!["remote_session_prefix must not be empty".to_string()]);
            }
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = SupervisorConfig::from_toml_str(
            r#"
            reconnect_delay_ms = 100
            max_consecutive_failures = 4
            store_path = "/var/lib/relay/store.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(100));
        assert_eq!(config.max_consecutive_failures, Some(4));
        assert_eq!(config.store_path, PathBuf::from("/var/lib/relay/store.json"));
        assert_eq!(config.flush_interval_ms, 30_000);
    }

    #[test]
    fn env_overrides_api_key() {
        let mut config = SupervisorConfig::default();
        config.apply_env(|name| (name == ENV_API_KEY).then(|| "secret".to_string()));
        assert_eq!(config.api_key, "secret");
    }

    #[test]
    fn data_dir_places_files() {
        let config = SupervisorConfig::default().with_data_dir(Path::new("/data"));
        assert_eq!(config.creds_path(), PathBuf::from("/data/Session/creds.json"));
        assert_eq!(config.store_path, PathBuf::from("/data/store.json"));
    }

    #[test]
    fn app_config_reads_both_tables() {
        let mut config = AppConfig::from_toml_str(
            r#"
            [settings]
            owner_name = "kord"
            owner_numbers = "2348000000000, 2348111111111"

            [supervisor]
            reconnect_delay_ms = 250
            "#,
        )
        .unwrap();
        config.apply_env(|name| (name == "ALWAYS_ONLINE").then(|| "true".to_string()));

        assert_eq!(config.settings.primary_owner_number(), Some("2348000000000"));
        assert!(config.settings.always_online);
        assert_eq!(config.supervisor.reconnect_delay_ms, 250);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn app_config_collects_problems_from_both_sections() {
        let config = AppConfig {
            settings: Settings::default(),
            supervisor: SupervisorConfig {
                http_timeout_ms: 0,
                ..SupervisorConfig::default()
            },
        };
        match config.validate() {
            Err(ConfigError::Invalid(problems)) => assert_eq!(problems.len(), 2),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }
}
