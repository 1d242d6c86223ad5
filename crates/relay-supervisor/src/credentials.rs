//! Credential store: resolves the session at startup and persists every
//! credential change the socket emits.
//!
//! Resolution order:
//! 1. a session reference carrying the remote prefix is fetched from the
//!    dashboard,
//! 2. any other non-empty reference is decoded as an inline base64 blob,
//! 3. an existing `creds.json` is loaded as is,
//! 4. otherwise a fresh, unregistered session starts pairing.
//!
//! Cases 1 and 2 fail fast; nothing falls through to a later case.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use relay_core::{AuthCredentials, CredentialsUpdate, KeyStore, Settings};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::SupervisorConfig;
use crate::error::{CredentialError, CredentialResult};
use crate::keys::{CachedKeyStore, FileKeyStore};
use crate::persist::{read_optional, write_atomic};

/// File name of the persisted credentials inside the session directory.
pub const CREDS_FILE: &str = "creds.json";

const BODY_PREVIEW_CHARS: usize = 200;

/// Where the active credentials came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Fetched from the dashboard using this reference (prefix stripped).
    Remote {
        /// Reference sent to the fetch endpoint.
        reference: String,
    },
    /// Decoded from an inline base64 session blob.
    InlineBlob,
    /// Loaded from an existing `creds.json`.
    LocalFile,
    /// New session; the socket will pair.
    Fresh,
}

impl CredentialSource {
    /// Short label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Remote { .. } => "remote",
            Self::InlineBlob => "inline_blob",
            Self::LocalFile => "local_file",
            Self::Fresh => "fresh",
        }
    }
}

/// Outcome of [`CredentialStore::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCredentials {
    /// Active credentials.
    pub credentials: AuthCredentials,
    /// Resolution path taken.
    pub source: CredentialSource,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Owns the authoritative credential copy and the signal key files.
pub struct CredentialStore {
    session_dir: PathBuf,
    creds_path: PathBuf,
    dashboard_url: String,
    api_key: String,
    remote_prefix: String,
    http: reqwest::Client,
    active: Mutex<AuthCredentials>,
    keys: Arc<CachedKeyStore>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("session_dir", &self.session_dir)
            .field("dashboard_url", &self.dashboard_url)
            .field("remote_prefix", &self.remote_prefix)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Build a store from supervisor configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Fetch`] if the HTTP client cannot be built.
    pub fn new(config: &SupervisorConfig) -> CredentialResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| CredentialError::Fetch(e.to_string()))?;
        let files: Arc<dyn KeyStore> = Arc::new(FileKeyStore::new(&config.session_dir));

        Ok(Self {
            session_dir: config.session_dir.clone(),
            creds_path: config.creds_path(),
            dashboard_url: config.dashboard_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            remote_prefix: config.remote_session_prefix.clone(),
            http,
            active: Mutex::new(AuthCredentials::fresh()),
            keys: Arc::new(CachedKeyStore::new(files)),
        })
    }

    /// Session directory.
    #[must_use]
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Signal key store handed to every socket. The same instance is reused
    /// across reconnects so its cache stays coherent.
    #[must_use]
    pub fn key_store(&self) -> Arc<CachedKeyStore> {
        Arc::clone(&self.keys)
    }

    /// Snapshot of the active credentials.
    pub async fn current(&self) -> AuthCredentials {
        self.active.lock().await.clone()
    }

    /// Resolve the session credentials.
    ///
    /// # Errors
    ///
    /// Remote fetch and inline blob failures are returned as is; they are
    /// fatal to startup. A missing or unreadable local file never errors.
    #[instrument(skip_all, level = "debug")]
    pub async fn resolve(&self, settings: &Settings) -> CredentialResult<ResolvedCredentials> {
        tokio::fs::create_dir_all(&self.session_dir)
            .await
            .map_err(|e| CredentialError::io(&self.session_dir, e))?;

        let reference = settings.session_reference();
        let remote = if reference.is_empty() {
            None
        } else {
            reference.strip_prefix(self.remote_prefix.as_str())
        };

        let resolved = if let Some(remote) = remote {
            let data = self.fetch_remote(remote).await?;
            let credentials = self.persist_document(&data).await?;
            ResolvedCredentials {
                credentials,
                source: CredentialSource::Remote {
                    reference: remote.to_string(),
                },
            }
        } else if !reference.is_empty() {
            let (text, credentials) = decode_blob(reference)?;
            self.write_creds(text.as_bytes()).await?;
            ResolvedCredentials {
                credentials,
                source: CredentialSource::InlineBlob,
            }
        } else {
            match self.read_local().await {
                Ok(Some(credentials)) => ResolvedCredentials {
                    credentials,
                    source: CredentialSource::LocalFile,
                },
                Ok(None) => ResolvedCredentials {
                    credentials: AuthCredentials::fresh(),
                    source: CredentialSource::Fresh,
                },
                Err(e) => {
                    warn!(error = %e, "Local credentials unreadable, starting a fresh session");
                    ResolvedCredentials {
                        credentials: AuthCredentials::fresh(),
                        source: CredentialSource::Fresh,
                    }
                }
            }
        };

        *self.active.lock().await = resolved.credentials.clone();
        info!(
            source = resolved.source.as_str(),
            registered = resolved.credentials.registered,
            "Credentials resolved"
        );
        Ok(resolved)
    }

    /// Dashboard URL for a remote reference. The reference is one encoded
    /// path segment, so `/`, `?` and `#` stay part of it.
    fn fetch_url(&self, reference: &str) -> CredentialResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.dashboard_url)
            .map_err(|e| CredentialError::Fetch(format!("invalid dashboard url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| CredentialError::Fetch("dashboard url cannot hold a path".into()))?
            .pop_if_empty()
            .extend(["api", "files", "fetch", reference]);
        Ok(url)
    }

    async fn fetch_remote(&self, reference: &str) -> CredentialResult<Value> {
        let url = self.fetch_url(reference)?;
        debug!(%url, "Fetching remote credentials");

        let response = self
            .http
            .get(url)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| CredentialError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(BODY_PREVIEW_CHARS)
                .collect();
            return Err(CredentialError::FetchStatus { status, body });
        }

        let body: FetchResponse = response
            .json()
            .await
            .map_err(|_| CredentialError::InvalidResponse)?;
        match (body.status.as_deref(), body.data) {
            (Some("success"), Some(data)) if data.is_object() => Ok(data),
            _ => Err(CredentialError::InvalidResponse),
        }
    }

    async fn persist_document(&self, data: &Value) -> CredentialResult<AuthCredentials> {
        let credentials: AuthCredentials = serde_json::from_value(data.clone())
            .map_err(|_| CredentialError::InvalidResponse)?;
        let bytes = serde_json::to_vec_pretty(data)?;
        self.write_creds(&bytes).await?;
        Ok(credentials)
    }

    async fn write_creds(&self, bytes: &[u8]) -> CredentialResult<()> {
        write_atomic(&self.creds_path, bytes)
            .await
            .map_err(|e| CredentialError::io(&self.creds_path, e))
    }

    async fn read_local(&self) -> CredentialResult<Option<AuthCredentials>> {
        let Some(content) = read_optional(&self.creds_path)
            .await
            .map_err(|e| CredentialError::io(&self.creds_path, e))?
        else {
            return Ok(None);
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CredentialError::Corrupt {
                path: self.creds_path.clone(),
                message: e.to_string(),
            })
    }

    /// Reload the persisted credentials and make them active. Returns
    /// `None` when no `creds.json` exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_local(&self) -> CredentialResult<Option<AuthCredentials>> {
        let loaded = self.read_local().await?;
        if let Some(credentials) = &loaded {
            *self.active.lock().await = credentials.clone();
        }
        Ok(loaded)
    }

    /// Merge `update` into the active copy and persist it before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the merge produces an invalid document or a write
    /// fails. The active copy is left unchanged on merge failure.
    pub async fn update(&self, update: &CredentialsUpdate) -> CredentialResult<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut active = self.active.lock().await;
        if !update.creds.is_empty() {
            let mut merged = active.clone();
            merged.merge(&update.creds)?;
            let bytes = serde_json::to_vec_pretty(&merged)?;
            self.write_creds(&bytes).await?;
            *active = merged;
        }

        if !update.keys.is_empty() {
            self.keys.set(update.keys.clone()).await?;
        }

        debug!(
            fields = update.creds.len(),
            keys = update.keys.len(),
            registered = active.registered,
            "Credentials updated"
        );
        Ok(())
    }

    /// Delete stale `pre-key-*` and `session-*` files, keeping
    /// `session.json`. Failures are logged. Returns the number removed.
    pub async fn prune_stale_key_files(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.session_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(dir = %self.session_dir.display(), error = %e, "Cannot list session directory");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Session directory listing interrupted");
                    break;
                }
            };
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_stale_key_file(name) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    info!(file = name, "Deleted stale key file");
                    removed += 1;
                }
                Err(e) => warn!(file = name, error = %e, "Failed to delete stale key file"),
            }
        }
        removed
    }
}

/// Check whether a session directory entry is a prunable key file.
#[must_use]
pub fn is_stale_key_file(name: &str) -> bool {
    name.starts_with("pre-key-") || (name.starts_with("session-") && name != "session.json")
}

/// Decode an inline session blob into its JSON text and credentials.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidBlob`] for bad base64, non-UTF-8 bytes
/// or anything that is not a credential object.
pub fn decode_blob(blob: &str) -> CredentialResult<(String, AuthCredentials)> {
    let compact: String = blob.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(&compact).ok())
        .ok_or_else(|| CredentialError::InvalidBlob("not valid base64".into()))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| CredentialError::InvalidBlob("decoded bytes are not UTF-8".into()))?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| CredentialError::InvalidBlob(format!("decoded text is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(CredentialError::InvalidBlob("decoded JSON is not an object".into()));
    }
    let credentials = serde_json::from_value(value)
        .map_err(|e| CredentialError::InvalidBlob(e.to_string()))?;
    Ok((text, credentials))
}
