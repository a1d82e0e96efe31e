//! Tokio-backed one-shot timers

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

use super::{PlatformError, Scheduler, TimerCallback, TimerHandle};

type PendingTimers = Arc<Mutex<HashMap<TimerHandle, AbortHandle>>>;

/// Schedules callbacks as tasks on a tokio runtime
pub struct TokioScheduler {
    runtime: Handle,
    next_id: AtomicU64,
    pending: PendingTimers,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Bind to the runtime of the calling context
    pub fn current() -> Result<Self, PlatformError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| PlatformError::NoRuntime(e.to_string()))
    }

    /// Number of timers scheduled but not yet fired or cancelled
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .map(|p| p.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pending = Arc::clone(&self.pending);

        // Hold the lock across spawn so a zero-delay timer cannot remove its
        // entry before it is inserted.
        let mut guard = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let still_pending = pending
                .lock()
                .map(|mut p| p.remove(&handle).is_some())
                .unwrap_or(false);
            if still_pending {
                callback();
            }
        });
        guard.insert(handle, task.abort_handle());
        debug!(timer = ?handle, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        let removed = self
            .pending
            .lock()
            .map(|mut p| p.remove(&handle))
            .unwrap_or(None);
        if let Some(task) = removed {
            task.abort();
            debug!(timer = ?handle, "Timer cancelled");
        }
    }
}
