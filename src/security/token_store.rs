// Token Store Module
// Persists a single JSON record under one well-known key of a KeyValueStore

use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use crate::platform::{KeyValueStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("Token storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Stored token record is corrupt: {0}")]
    Corrupt(String),
}

/// A record that knows when it stops being valid
pub trait Expiring {
    /// Expiry as Unix epoch milliseconds
    fn expires_at_ms(&self) -> i64;

    /// Expired once `now_ms` is strictly past the expiry
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms() < now_ms
    }
}

/// Typed access to one JSON record. At most one record exists per key; writes
/// replace the whole record.
pub struct TokenStore<R> {
    backend: Arc<dyn KeyValueStore>,
    key: String,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for TokenStore<R> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            key: self.key.clone(),
            _record: PhantomData,
        }
    }
}

impl<R> TokenStore<R>
where
    R: Serialize + DeserializeOwned + Expiring,
{
    pub fn new(backend: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            _record: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read and parse the stored record. Missing is `Ok(None)`; unparsable is `Corrupt`.
    pub fn load(&self) -> Result<Option<R>, TokenStoreError> {
        let Some(raw) = self.backend.get(&self.key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| TokenStoreError::Corrupt(e.to_string()))
    }

    /// Replace the stored record
    pub fn save(&self, record: &R) -> Result<(), TokenStoreError> {
        let raw =
            serde_json::to_string(record).map_err(|e| TokenStoreError::Corrupt(e.to_string()))?;
        self.backend.set(&self.key, &raw)?;
        debug!(key = %self.key, expires_at_ms = record.expires_at_ms(), "Token record stored");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), TokenStoreError> {
        self.backend.remove(&self.key)?;
        Ok(())
    }
}
