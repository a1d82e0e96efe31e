//! Session notification channel
//!
//! The session manager publishes [`SessionEvent`]s on an [`EventBus`]; the UI
//! layer subscribes and decides how to present them. User-interaction signals
//! flow the other way as [`ActivitySignal`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEventKind {
    #[serde(rename = "login:success")]
    LoginSuccess,
    #[serde(rename = "session:expired")]
    SessionExpired,
    #[serde(rename = "auth:logout")]
    Logout,
}

impl SessionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEventKind::LoginSuccess => "login:success",
            SessionEventKind::SessionExpired => "session:expired",
            SessionEventKind::Logout => "auth:logout",
        }
    }

    /// Default user-facing message for the event
    pub fn default_message(&self) -> &'static str {
        match self {
            SessionEventKind::LoginSuccess => "Login successful! Redirecting to dashboard...",
            SessionEventKind::SessionExpired => "Your session has expired due to inactivity",
            SessionEventKind::Logout => "You have been logged out",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: String,
    pub kind: SessionEventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            message: kind.default_message().to_string(),
            timestamp,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// Interaction signals that count as user activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivitySignal {
    PointerMove,
    Keypress,
    Scroll,
    Click,
}

impl ActivitySignal {
    pub const ALL: [ActivitySignal; 4] = [
        ActivitySignal::PointerMove,
        ActivitySignal::Keypress,
        ActivitySignal::Scroll,
        ActivitySignal::Click,
    ];
}

/// Broadcast channel owned by the session manager
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(event = name, receivers, "Session event published");
                receivers
            }
            Err(_) => {
                debug!(event = name, "Session event dropped: no subscribers");
                0
            }
        }
    }
}
