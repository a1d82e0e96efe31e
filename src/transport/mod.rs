//! Secure socket transport
//!
//! Wraps a raw socket with the client-side security rules:
//!
//! - Insecure schemes are upgraded (`ws:` to `wss:`, `http:` to `https:`)
//!   before the socket is opened, and userinfo is stripped from the URL.
//! - When a non-empty credential is configured it is sent as the first frame,
//!   `{"token": "<credential>"}`, never as part of the URL.
//! - Inbound frames are parsed, checked for authentication success and passed
//!   through the [`FieldPolicy`] allowlist before reaching caller handlers.
//! - After close no inbound frame reaches a handler, even if it was in flight.
//!
//! Socket events are processed strictly one at a time, in arrival order.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

pub mod sanitize;
pub mod socket;

pub use sanitize::{FieldCategory, FieldPolicy, SanitizedMessage};
pub use socket::{
    ChannelSocketTransport, EventSender, EventStream, RemotePeer, Socket, SocketEvent,
    SocketTransport,
};

use crate::config::TransportConfig;

/// Close code reported when a socket goes away without a close frame
const ABNORMAL_CLOSURE: u16 = 1006;

/// Transport-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid socket URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Malformed message: {0}")]
    MessageParse(String),

    #[error("Failed to serialize message: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Caller callbacks. Every method defaults to doing nothing.
///
/// Handlers run outside the connection's lock and may call back into it.
pub trait TransportHandlers: Send + Sync {
    fn on_open(&self) {}
    fn on_message(&self, _message: &SanitizedMessage) {}
    fn on_error(&self, _error: &TransportError) {}
    fn on_close(&self, _code: u16, _reason: &str) {}
}

/// Handlers that ignore everything
pub struct NoopHandlers;

impl TransportHandlers for NoopHandlers {}

/// Rewrite `raw` so the connection is always encrypted
pub fn secure_url(raw: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(raw).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    let upgraded = match url.scheme() {
        "ws" => Some("wss"),
        "http" => Some("https"),
        "wss" | "https" => None,
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    };
    if let Some(scheme) = upgraded {
        url.set_scheme(scheme)
            .map_err(|_| TransportError::InvalidUrl(format!("cannot upgrade {}", raw)))?;
        debug!(scheme, "Upgraded insecure socket scheme");
    }

    if !url.username().is_empty() || url.password().is_some() {
        warn!("Stripping credentials embedded in socket URL");
        let _ = url.set_username("");
        let _ = url.set_password(None);
    }

    Ok(url)
}

/// Opens authenticated, sanitizing connections over an injected socket capability
pub struct SecureTransport {
    socket: Arc<dyn SocketTransport>,
    policy: Arc<FieldPolicy>,
    close_code: u16,
    close_reason: String,
}

impl SecureTransport {
    pub fn new(config: &TransportConfig, socket: Arc<dyn SocketTransport>) -> Self {
        Self {
            socket,
            policy: Arc::new(config.policy.clone()),
            close_code: config.close_code,
            close_reason: config.close_reason.clone(),
        }
    }

    pub fn policy(&self) -> &Arc<FieldPolicy> {
        &self.policy
    }

    /// Open a connection. The caller feeds the returned event stream to
    /// [`SecureConnection::run`] or [`SecureConnection::pump_pending`].
    pub fn connect(
        &self,
        url: &str,
        credential: Option<String>,
        handlers: Arc<dyn TransportHandlers>,
    ) -> Result<(Arc<SecureConnection>, EventStream), TransportError> {
        let url = secure_url(url)?;
        let credential = credential.filter(|c| !c.is_empty());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let socket = self.socket.open(&url, events_tx)?;
        info!(url = %url, authenticated = credential.is_some(), "Secure socket connecting");

        let connection = Arc::new(SecureConnection {
            url,
            credential,
            policy: Arc::clone(&self.policy),
            handlers,
            close_code: self.close_code,
            close_reason: self.close_reason.clone(),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Connecting,
                authenticated: false,
                socket: Some(socket),
                close_notified: false,
            }),
        });
        Ok((connection, events_rx))
    }

    /// Open a connection and process its events on a spawned task
    pub fn connect_and_spawn(
        &self,
        url: &str,
        credential: Option<String>,
        handlers: Arc<dyn TransportHandlers>,
    ) -> Result<(Arc<SecureConnection>, JoinHandle<()>), TransportError> {
        let (connection, events) = self.connect(url, credential, handlers)?;
        let task = tokio::spawn(Arc::clone(&connection).run(events));
        Ok((connection, task))
    }
}

struct ConnectionInner {
    state: ConnectionState,
    authenticated: bool,
    socket: Option<Box<dyn Socket>>,
    close_notified: bool,
}

/// One secure connection: `Connecting -> Open -> Closed`, with `authenticated`
/// only ever true while `Open`.
pub struct SecureConnection {
    url: Url,
    credential: Option<String>,
    policy: Arc<FieldPolicy>,
    handlers: Arc<dyn TransportHandlers>,
    close_code: u16,
    close_reason: String,
    inner: Mutex<ConnectionInner>,
}

impl SecureConnection {
    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().authenticated
    }

    /// Send a payload. Strings go out verbatim, anything else as JSON.
    /// Returns `false` when not open or when the write fails; never panics.
    pub fn send<T: Serialize + ?Sized>(&self, data: &T) -> bool {
        let encoded = match serde_json::to_value(data) {
            Ok(Value::String(text)) => Ok(text),
            Ok(_) => serde_json::to_string(data),
            Err(e) => Err(e),
        };
        let frame = match encoded {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot send: {}", TransportError::Serialize(e.to_string()));
                return false;
            }
        };

        let mut inner = self.lock();
        if inner.state != ConnectionState::Open {
            warn!("Cannot send: socket not connected");
            return false;
        }
        let Some(socket) = inner.socket.as_mut() else {
            return false;
        };
        match socket.send(&frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("Error sending socket message: {}", e);
                false
            }
        }
    }

    /// Close with the configured default code and reason
    pub fn close_normal(&self) {
        let reason = self.close_reason.clone();
        self.close(self.close_code, &reason);
    }

    /// Close if open; otherwise do nothing
    pub fn close(&self, code: u16, reason: &str) {
        let socket = {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Open {
                debug!(state = ?inner.state, "Close ignored: socket not open");
                return;
            }
            inner.state = ConnectionState::Closed;
            inner.authenticated = false;
            inner.close_notified = true;
            inner.socket.take()
        };

        if let Some(mut socket) = socket {
            if let Err(e) = socket.close(code, reason) {
                warn!("Error closing socket: {}", e);
            }
        }
        info!(code, reason, "Secure socket closed");
        self.handlers.on_close(code, reason);
    }

    /// Process one platform event
    pub fn handle_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::Open => self.handle_open(),
            SocketEvent::Frame(text) => self.handle_frame(&text),
            SocketEvent::Error(message) => self.handle_error(message),
            SocketEvent::Closed { code, reason } => self.handle_closed(code, &reason),
        }
    }

    /// Process events until the socket reports its close or the stream ends.
    ///
    /// An error does not stop the loop; the close that follows it still reaches
    /// `on_close`. A stream that ends without a close is reported as one.
    pub async fn run(self: Arc<Self>, mut events: EventStream) {
        while let Some(event) = events.recv().await {
            let closed = matches!(event, SocketEvent::Closed { .. });
            self.handle_event(event);
            if closed {
                break;
            }
        }
        self.handle_closed(ABNORMAL_CLOSURE, "Connection lost");
        debug!(url = %self.url, "Socket event loop finished");
    }

    /// Process every event already queued, without waiting. Returns how many ran.
    pub fn pump_pending(&self, events: &mut EventStream) -> usize {
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_open(&self) {
        let handshake_error = {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Connecting {
                debug!(state = ?inner.state, "Open event ignored");
                return;
            }
            inner.state = ConnectionState::Open;

            match (&self.credential, inner.socket.as_mut()) {
                (Some(credential), Some(socket)) => {
                    let frame = serde_json::json!({ "token": credential }).to_string();
                    match socket.send(&frame) {
                        Ok(()) => {
                            debug!("Authentication message sent");
                            None
                        }
                        Err(e) => Some(e),
                    }
                }
                _ => None,
            }
        };

        info!(url = %self.url, "Secure socket connection established");
        if let Some(error) = handshake_error {
            warn!("Failed to send authentication message: {}", error);
            self.handlers.on_error(&error);
        }
        self.handlers.on_open();
    }

    fn handle_frame(&self, text: &str) {
        if !self.is_connected() {
            debug!("Dropping inbound frame: socket not open");
            return;
        }

        let payload: Value = match serde_json::from_str(text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Error processing socket message: {}", e);
                self.handlers
                    .on_error(&TransportError::MessageParse(e.to_string()));
                return;
            }
        };

        if signals_authentication(&payload) {
            let mut inner = self.lock();
            if inner.state == ConnectionState::Open && !inner.authenticated {
                inner.authenticated = true;
                info!("Secure socket authentication successful");
            }
        }

        let sanitized = self.policy.sanitize(&payload);

        // A handler for an earlier frame may have closed the connection
        if !self.is_connected() {
            debug!("Dropping inbound frame: closed during processing");
            return;
        }
        self.handlers.on_message(&sanitized);
    }

    fn handle_error(&self, message: String) {
        let socket = {
            let mut inner = self.lock();
            if inner.state == ConnectionState::Closed {
                debug!("Socket error after close ignored: {}", message);
                return;
            }
            inner.state = ConnectionState::Closed;
            inner.authenticated = false;
            inner.socket.take()
        };
        warn!("Secure socket error: {}", message);

        // The close handler still runs when the socket's close event arrives
        if let Some(mut socket) = socket {
            if let Err(e) = socket.close(self.close_code, &self.close_reason) {
                debug!("Error closing failed socket: {}", e);
            }
        }
        self.handlers.on_error(&TransportError::Network(message));
    }

    fn handle_closed(&self, code: u16, reason: &str) {
        let notify = {
            let mut inner = self.lock();
            inner.state = ConnectionState::Closed;
            inner.authenticated = false;
            inner.socket = None;
            !std::mem::replace(&mut inner.close_notified, true)
        };
        if notify {
            info!(code, reason, "Secure socket connection closed");
            self.handlers.on_close(code, reason);
        }
    }
}

/// `type == "AuthenticationSuccess"` or `status == "success"`
fn signals_authentication(payload: &Value) -> bool {
    payload.get("type").and_then(Value::as_str) == Some("AuthenticationSuccess")
        || payload.get("status").and_then(Value::as_str) == Some("success")
}
