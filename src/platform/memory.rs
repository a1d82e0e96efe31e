// In-memory storage capabilities
// Stand-ins for browser local/session storage and the document cookie jar

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{CookieJar, KeyValueStore, StorageError};
use crate::security::cookies::SecureCookie;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-local key-value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        lock(&self.entries).clear();
        Ok(())
    }
}

/// Process-local cookie jar.
///
/// Keeps the live cookies by name plus every `Set-Cookie`-style line written,
/// so callers can inspect exactly what would have reached the browser.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, SecureCookie>>,
    written: Mutex<Vec<String>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full cookie record for `name`, if present
    pub fn cookie(&self, name: &str) -> Option<SecureCookie> {
        lock(&self.cookies).get(name).cloned()
    }

    /// Every cookie line written so far, oldest first
    pub fn written_lines(&self) -> Vec<String> {
        lock(&self.written).clone()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.cookies).is_empty()
    }
}

impl CookieJar for MemoryCookieJar {
    fn set(&self, cookie: &SecureCookie) -> Result<(), StorageError> {
        lock(&self.written).push(cookie.to_string());
        lock(&self.cookies).insert(cookie.name().to_string(), cookie.clone());
        Ok(())
    }

    fn get(&self, name: &str) -> Option<String> {
        lock(&self.cookies).get(name).map(|c| c.value().to_string())
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        lock(&self.written).push(SecureCookie::expired(name).to_string());
        lock(&self.cookies).remove(name);
        Ok(())
    }
}
