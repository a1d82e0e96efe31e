// Secure Session Management Module
// Cookie-backed client session with an inactivity timer and lifecycle notifications

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::cookies::{SecureCookie, prefixed_name};
use super::credentials::{AuthError, AuthOutcome, CredentialVerifier, Credentials};
use super::events::{ActivitySignal, EventBus, SessionEvent, SessionEventKind};
use crate::config::SessionConfig;
use crate::platform::{
    Clock, CookieJar, KeyValueStore, RandomSource, Scheduler, StorageError, TimerHandle,
    random_hex,
};

/// Session identifier entropy in bytes (128 bits)
const SESSION_ID_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    LoggedOut,
    LoggingIn,
    Active,
    Expiring,
}

/// Session-related errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Cannot log in while session is {0:?}")]
    InvalidState(SessionPhase),

    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("Login was cancelled by a logout")]
    LoginCancelled,

    #[error("Failed to store session cookie: {0}")]
    Cookie(#[from] StorageError),
}

/// Host capabilities the session manager depends on
pub struct SessionPlatform {
    pub cookies: Arc<dyn CookieJar>,
    pub scheduler: Arc<dyn Scheduler>,
    pub clock: Arc<dyn Clock>,
    pub rng: Arc<dyn RandomSource>,
    pub verifier: Arc<dyn CredentialVerifier>,
    /// Client-side stores wiped on logout and expiry (local and session storage)
    pub client_stores: Vec<Arc<dyn KeyValueStore>>,
}

/// The single live inactivity timer of a session
#[derive(Debug, Clone, Copy)]
struct SessionTimer {
    handle: TimerHandle,
    generation: u64,
}

struct SessionState {
    phase: SessionPhase,
    session_id: Option<String>,
    timer: Option<SessionTimer>,
    /// Bumped on every login attempt and logout so stale continuations can tell
    login_attempt: u64,
    next_generation: u64,
}

struct SessionInner {
    config: SessionConfig,
    timeout: Duration,
    tracked_signals: HashSet<ActivitySignal>,
    platform: SessionPlatform,
    events: EventBus,
    state: Mutex<SessionState>,
}

/// Secure session manager. Clones share the same session.
#[derive(Clone)]
pub struct SecureSessionManager {
    inner: Arc<SessionInner>,
}

impl SecureSessionManager {
    pub fn new(config: &SessionConfig, platform: SessionPlatform) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                timeout: config.timeout(),
                tracked_signals: config.tracked_signals(),
                config: config.clone(),
                platform,
                events: EventBus::new(),
                state: Mutex::new(SessionState {
                    phase: SessionPhase::LoggedOut,
                    session_id: None,
                    timer: None,
                    login_attempt: 0,
                    next_generation: 0,
                }),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock_state().phase
    }

    pub fn is_active(&self) -> bool {
        self.phase() == SessionPhase::Active
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock_state().session_id.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Full (prefixed) name of the session cookie
    pub fn session_cookie_name(&self) -> String {
        prefixed_name(&self.inner.config.cookie_prefix, &self.inner.config.session_cookie)
    }

    /// Full (prefixed) name of the auth cookie
    pub fn auth_cookie_name(&self) -> String {
        prefixed_name(&self.inner.config.cookie_prefix, &self.inner.config.auth_cookie)
    }

    /// Authenticate and start a session.
    ///
    /// On success a random 128-bit session id is stored in the session cookie,
    /// the inactivity timer starts and `login:success` is published. On failure
    /// the session returns to `LoggedOut` with no timer running.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), SessionError> {
        let attempt = {
            let mut state = self.lock_state();
            if state.phase != SessionPhase::LoggedOut {
                return Err(SessionError::InvalidState(state.phase));
            }
            state.phase = SessionPhase::LoggingIn;
            state.login_attempt += 1;
            state.login_attempt
        };
        info!("Login started");

        let verified = self.inner.platform.verifier.verify(credentials).await;

        let mut state = self.lock_state();
        if state.login_attempt != attempt || state.phase != SessionPhase::LoggingIn {
            warn!("Login finished after logout, discarding result");
            return Err(SessionError::LoginCancelled);
        }

        let outcome = match verified {
            Ok(outcome) => outcome,
            Err(e) => {
                state.phase = SessionPhase::LoggedOut;
                warn!("Login failed: {}", e);
                return Err(e.into());
            }
        };

        let session_id = random_hex(self.inner.platform.rng.as_ref(), SESSION_ID_BYTES);
        if let Err(e) = self.store_cookies(&session_id, &outcome) {
            state.phase = SessionPhase::LoggedOut;
            drop(state);
            error!("Failed to store session cookies: {}", e);
            self.cleanup();
            return Err(e.into());
        }

        let id_prefix = &session_id[..8];
        debug!(session = %id_prefix, "Session cookie stored");
        state.session_id = Some(session_id);
        state.phase = SessionPhase::Active;
        self.schedule_expiry(&mut state);
        drop(state);

        info!(timeout_secs = self.inner.timeout.as_secs(), "Login successful");
        self.publish(SessionEventKind::LoginSuccess);
        Ok(())
    }

    /// Handle a user-interaction signal. Returns whether the timer was reset.
    pub fn record_activity(&self, signal: ActivitySignal) -> bool {
        if !self.inner.tracked_signals.contains(&signal) {
            return false;
        }
        self.reset_timer()
    }

    /// Restart the inactivity countdown from now. No-op unless `Active`.
    pub fn reset_timer(&self) -> bool {
        let mut state = self.lock_state();
        if state.phase != SessionPhase::Active {
            return false;
        }
        self.schedule_expiry(&mut state);
        true
    }

    /// Expire the active session now. Returns `false` when there was nothing to expire.
    pub fn expire(&self) -> bool {
        self.expire_matching(None)
    }

    /// End the session from any phase. Always publishes `auth:logout`.
    pub fn logout(&self) {
        let (previous, timer) = {
            let mut state = self.lock_state();
            let previous = state.phase;
            state.phase = SessionPhase::LoggedOut;
            state.session_id = None;
            state.login_attempt += 1;
            (previous, state.timer.take())
        };

        if let Some(timer) = timer {
            self.inner.platform.scheduler.cancel(timer.handle);
        }

        if previous == SessionPhase::LoggedOut {
            debug!("Logout requested while already logged out");
        } else {
            self.cleanup();
            info!(from = ?previous, "User logged out");
        }
        self.publish(SessionEventKind::Logout);
    }

    /// Feed activity signals from `signals` until the sender side is dropped
    pub fn spawn_activity_listener(
        &self,
        mut signals: mpsc::UnboundedReceiver<ActivitySignal>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                manager.record_activity(signal);
            }
            debug!("Activity listener stopped");
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel the current timer, then schedule a fresh one for the full timeout
    fn schedule_expiry(&self, state: &mut SessionState) {
        if let Some(previous) = state.timer.take() {
            self.inner.platform.scheduler.cancel(previous.handle);
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let handle = self.inner.platform.scheduler.schedule(
            self.inner.timeout,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    SecureSessionManager { inner }.expire_matching(Some(generation));
                }
            }),
        );
        state.timer = Some(SessionTimer { handle, generation });
    }

    /// Expire if `Active` and, for timer callbacks, only if `generation` is still
    /// the live timer. Anything else is a stale callback and does nothing.
    fn expire_matching(&self, generation: Option<u64>) -> bool {
        let timer = {
            let mut state = self.lock_state();
            if state.phase != SessionPhase::Active {
                if generation.is_some() {
                    debug!("Stale session timer fired after session ended");
                }
                return false;
            }
            if let Some(generation) = generation {
                if state.timer.map(|t| t.generation) != Some(generation) {
                    debug!(generation, "Stale session timer ignored");
                    return false;
                }
            }
            state.phase = SessionPhase::Expiring;
            state.session_id = None;
            state.timer.take()
        };

        if let Some(timer) = timer {
            self.inner.platform.scheduler.cancel(timer.handle);
        }
        self.cleanup();

        {
            let mut state = self.lock_state();
            if state.phase == SessionPhase::Expiring {
                state.phase = SessionPhase::LoggedOut;
            }
        }

        info!("Session expired due to inactivity");
        self.publish(SessionEventKind::SessionExpired);
        true
    }

    fn store_cookies(&self, session_id: &str, outcome: &AuthOutcome) -> Result<(), StorageError> {
        let config = &self.inner.config;
        let now = self.inner.platform.clock.now();
        let cookies = &self.inner.platform.cookies;

        cookies.set(&SecureCookie::new(
            &config.cookie_prefix,
            &config.session_cookie,
            session_id,
            config.cookie_max_age(),
            now,
        ))?;

        if let Some(token) = &outcome.auth_token {
            cookies.set(&SecureCookie::new(
                &config.cookie_prefix,
                &config.auth_cookie,
                token.as_str(),
                config.cookie_max_age(),
                now,
            ))?;
        }
        Ok(())
    }

    /// Delete session and auth cookies and wipe client-side stores.
    /// Failures are logged; cleanup always runs to completion.
    fn cleanup(&self) {
        let platform = &self.inner.platform;
        for name in [self.session_cookie_name(), self.auth_cookie_name()] {
            if let Err(e) = platform.cookies.remove(&name) {
                warn!(cookie = %name, "Failed to remove cookie: {}", e);
            }
        }
        for store in &platform.client_stores {
            if let Err(e) = store.clear() {
                warn!("Failed to clear client storage: {}", e);
            }
        }
    }

    fn publish(&self, kind: SessionEventKind) {
        let event = SessionEvent::new(kind, self.inner.platform.clock.now());
        self.inner.events.publish(event);
    }
}
