//! Platform capabilities
//!
//! Everything the security core needs from its host environment is injected
//! through the traits in this module: wall-clock time, randomness, key-value
//! storage, the cookie jar and one-shot timers. Production implementations
//! live next to the traits; [`memory`] provides in-process stores and
//! [`manual`] a virtual-time platform for deterministic tests.

use chrono::{DateTime, Utc};
use std::time::Duration;

pub mod manual;
pub mod memory;
pub mod timer;

pub use manual::ManualScheduler;
pub use memory::{MemoryCookieJar, MemoryStore};
pub use timer::TokioScheduler;

use crate::security::cookies::SecureCookie;

/// Failures reported by storage-like capabilities (key-value stores, cookie jars)
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded for key {0}")]
    QuotaExceeded(String),
}

/// Failures constructing platform services
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Wall clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cryptographically secure random bytes.
///
/// Implementations must not fail silently; an unavailable entropy source is fatal.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Operating-system backed randomness via the thread-local CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(32) {
            let block: [u8; 32] = rand::random();
            chunk.copy_from_slice(&block[..chunk.len()]);
        }
    }
}

/// Generate `len` random bytes and hex-encode them (two lowercase digits per byte)
pub fn random_hex(rng: &dyn RandomSource, len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// String key-value storage (the browser's local/session storage)
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// Cookie storage. Names passed to `get`/`remove` are the full, prefixed names.
pub trait CookieJar: Send + Sync {
    fn set(&self, cookie: &SecureCookie) -> Result<(), StorageError>;
    fn get(&self, name: &str) -> Option<String>;
    fn remove(&self, name: &str) -> Result<(), StorageError>;
}

/// Identifies a scheduled one-shot callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub(crate) u64);

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot timers. Cancelling a handle that already fired or was already
/// cancelled is a no-op.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
    fn cancel(&self, handle: TimerHandle);
}
