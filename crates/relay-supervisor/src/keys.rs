//! Signal key storage: one JSON file per key, with a read-through cache.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::credentials::key_file_name;
use relay_core::{KeyStore, KeyWrite, TransportError, TransportResult};
use serde_json::Value;
use tracing::{debug, warn};

use crate::persist::{read_optional, write_atomic};

/// Keys stored as `<category>-<id>.json` in the session directory.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Store rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the key files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, category: &str, id: &str) -> PathBuf {
        self.dir.join(key_file_name(category, id))
    }
}

fn key_error(path: &Path, e: &io::Error) -> TransportError {
    TransportError::KeyStore(format!("{}: {e}", path.display()))
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn get(&self, category: &str, ids: &[String]) -> TransportResult<HashMap<String, Value>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            let path = self.key_path(category, id);
            let Some(content) = read_optional(&path).await.map_err(|e| key_error(&path, &e))?
            else {
                continue;
            };
            match serde_json::from_str(&content) {
                Ok(value) => {
                    found.insert(id.clone(), value);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable key file"),
            }
        }
        Ok(found)
    }

    async fn set(&self, writes: Vec<KeyWrite>) -> TransportResult<()> {
        for write in writes {
            let path = self.key_path(&write.category, &write.id);
            match write.value {
                Some(value) => {
                    let bytes = serde_json::to_vec(&value)
                        .map_err(|e| TransportError::KeyStore(e.to_string()))?;
                    write_atomic(&path, &bytes)
                        .await
                        .map_err(|e| key_error(&path, &e))?;
                }
                None => match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(key_error(&path, &e)),
                },
            }
        }
        Ok(())
    }
}

/// Read-through cache in front of another key store.
///
/// All writes must go through the cache so cached entries never go stale.
pub struct CachedKeyStore {
    inner: Arc<dyn KeyStore>,
    cache: Mutex<HashMap<(String, String), Value>>,
}

impl std::fmt::Debug for CachedKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedKeyStore")
            .field("cached", &self.cache.lock().len())
            .finish_non_exhaustive()
    }
}

impl CachedKeyStore {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn KeyStore>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached keys.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

#[async_trait]
impl KeyStore for CachedKeyStore {
    async fn get(&self, category: &str, ids: &[String]) -> TransportResult<HashMap<String, Value>> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut misses = Vec::new();
        {
            let cache = self.cache.lock();
            for id in ids {
                match cache.get(&(category.to_string(), id.clone())) {
                    Some(value) => {
                        found.insert(id.clone(), value.clone());
                    }
                    None => misses.push(id.clone()),
                }
            }
        }

        if !misses.is_empty() {
            let loaded = self.inner.get(category, &misses).await?;
            debug!(category, requested = misses.len(), loaded = loaded.len(), "Key cache miss");
            let mut cache = self.cache.lock();
            for (id, value) in loaded {
                cache.insert((category.to_string(), id.clone()), value.clone());
                found.insert(id, value);
            }
        }

        Ok(found)
    }

    async fn set(&self, writes: Vec<KeyWrite>) -> TransportResult<()> {
        self.inner.set(writes.clone()).await?;
        let mut cache = self.cache.lock();
        for write in writes {
            let slot = (write.category, write.id);
            match write.value {
                Some(value) => {
                    cache.insert(slot, value);
                }
                None => {
                    cache.remove(&slot);
                }
            }
        }
        Ok(())
    }
}
