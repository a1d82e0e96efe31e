// Socket Capability
// Raw socket interface the secure transport wraps, plus an in-process channel socket

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use super::TransportError;

/// Events the platform delivers for an open socket, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Frame(String),
    Error(String),
    Closed { code: u16, reason: String },
}

pub type EventSender = mpsc::UnboundedSender<SocketEvent>;
pub type EventStream = mpsc::UnboundedReceiver<SocketEvent>;

/// Opens raw sockets. Events for the new socket go to `events`.
pub trait SocketTransport: Send + Sync {
    fn open(&self, url: &Url, events: EventSender) -> Result<Box<dyn Socket>, TransportError>;
}

/// Outbound half of an open socket
pub trait Socket: Send {
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;
    fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

#[derive(Default)]
struct PeerState {
    url: Option<Url>,
    events: Option<EventSender>,
    sent: Vec<String>,
    closed_with: Option<(u16, String)>,
    fail_sends: bool,
}

/// In-process socket. The [`RemotePeer`] plays the server side.
#[derive(Clone, Default)]
pub struct ChannelSocketTransport {
    peer: RemotePeer,
}

impl ChannelSocketTransport {
    pub fn new() -> (Self, RemotePeer) {
        let transport = Self::default();
        let peer = transport.peer.clone();
        (transport, peer)
    }
}

impl SocketTransport for ChannelSocketTransport {
    fn open(&self, url: &Url, events: EventSender) -> Result<Box<dyn Socket>, TransportError> {
        let mut state = self.peer.lock();
        state.url = Some(url.clone());
        state.events = Some(events);
        state.sent.clear();
        state.closed_with = None;
        debug!(url = %url, "Channel socket opened");
        Ok(Box::new(ChannelSocket {
            peer: self.peer.clone(),
        }))
    }
}

struct ChannelSocket {
    peer: RemotePeer,
}

impl Socket for ChannelSocket {
    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let mut state = self.peer.lock();
        if state.fail_sends {
            return Err(TransportError::Network("socket write failed".to_string()));
        }
        if state.closed_with.is_some() {
            return Err(TransportError::Network("socket already closed".to_string()));
        }
        state.sent.push(frame.to_string());
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let mut state = self.peer.lock();
        state.closed_with = Some((code, reason.to_string()));
        if let Some(events) = &state.events {
            let _ = events.send(SocketEvent::Closed {
                code,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}

/// Server side of a [`ChannelSocketTransport`]
#[derive(Clone, Default)]
pub struct RemotePeer {
    state: Arc<Mutex<PeerState>>,
}

impl RemotePeer {
    fn lock(&self) -> MutexGuard<'_, PeerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(&self, event: SocketEvent) -> bool {
        match &self.lock().events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    /// URL the client connected to
    pub fn url(&self) -> Option<Url> {
        self.lock().url.clone()
    }

    /// Complete the connection handshake
    pub fn accept(&self) -> bool {
        self.deliver(SocketEvent::Open)
    }

    pub fn push_frame(&self, frame: impl Into<String>) -> bool {
        self.deliver(SocketEvent::Frame(frame.into()))
    }

    pub fn push_error(&self, error: impl Into<String>) -> bool {
        self.deliver(SocketEvent::Error(error.into()))
    }

    pub fn hang_up(&self, code: u16, reason: impl Into<String>) -> bool {
        self.deliver(SocketEvent::Closed {
            code,
            reason: reason.into(),
        })
    }

    /// Frames the client wrote, oldest first
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Close code and reason, if the client closed the socket
    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.lock().closed_with.clone()
    }

    /// Make every subsequent client write fail
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }
}
