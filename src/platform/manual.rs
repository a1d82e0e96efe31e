//! Virtual-time platform
//!
//! [`ManualScheduler`] is both a [`Clock`] and a [`Scheduler`]. Time only moves
//! when [`ManualScheduler::advance`] is called, at which point every callback
//! that became due fires in deadline order. Used by the test suites and handy
//! for embedding applications that want deterministic session tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{Clock, Scheduler, TimerCallback, TimerHandle};

struct PendingTimer {
    due: DateTime<Utc>,
    callback: TimerCallback,
}

struct ManualState {
    now: DateTime<Utc>,
    next_id: u64,
    pending: BTreeMap<TimerHandle, PendingTimer>,
}

fn deadline(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                next_id: 1,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// Start the virtual clock at the current wall-clock time
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move time forward, firing due callbacks one at a time.
    ///
    /// The lock is released while a callback runs, so callbacks may schedule
    /// or cancel timers themselves.
    pub fn advance(&self, by: Duration) {
        let target = {
            let state = self.lock();
            deadline(state.now, by)
        };

        loop {
            let callback = {
                let mut state = self.lock();
                let next = state
                    .pending
                    .iter()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by_key(|(handle, timer)| (timer.due, **handle))
                    .map(|(handle, _)| *handle);

                match next.and_then(|handle| state.pending.remove(&handle)) {
                    Some(timer) => {
                        if timer.due > state.now {
                            state.now = timer.due;
                        }
                        timer.callback
                    }
                    None => {
                        state.now = target;
                        break;
                    }
                }
            };
            callback();
        }
    }

    /// Number of callbacks scheduled but not yet fired or cancelled
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}

impl Clock for ManualScheduler {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let mut state = self.lock();
        let handle = TimerHandle(state.next_id);
        state.next_id += 1;
        let due = deadline(state.now, delay);
        state.pending.insert(handle, PendingTimer { due, callback });
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        self.lock().pending.remove(&handle);
    }
}
