#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use loginguard::config::{CsrfConfig, SessionConfig, TransportConfig};
use loginguard::platform::{
    KeyValueStore, ManualScheduler, MemoryCookieJar, MemoryStore, OsRandom, StorageError,
};
use async_trait::async_trait;
use loginguard::security::{
    AuthError, AuthOutcome, CredentialVerifier, Credentials, CsrfTokenManager, FormatVerifier, SecureSessionManager,
    SessionEvent, SessionEventKind, SessionPlatform,
};
use loginguard::transport::{
    ChannelSocketTransport, EventStream, RemotePeer, SanitizedMessage, SecureConnection,
    SecureTransport, TransportError, TransportHandlers,
};
use tokio::sync::broadcast;

/// Virtual-time platform with in-memory storage, shared by a test's managers
pub struct TestPlatform {
    pub time: Arc<ManualScheduler>,
    pub cookies: Arc<MemoryCookieJar>,
    pub local: Arc<MemoryStore>,
    pub session: Arc<MemoryStore>,
}

impl TestPlatform {
    pub fn new() -> Self {
        Self {
            time: Arc::new(ManualScheduler::starting_now()),
            cookies: Arc::new(MemoryCookieJar::new()),
            local: Arc::new(MemoryStore::new()),
            session: Arc::new(MemoryStore::new()),
        }
    }

    pub fn csrf(&self) -> CsrfTokenManager {
        self.csrf_with(self.local.clone())
    }

    pub fn csrf_with(&self, storage: Arc<dyn KeyValueStore>) -> CsrfTokenManager {
        CsrfTokenManager::new(
            &CsrfConfig::default(),
            storage,
            Arc::new(OsRandom),
            self.time.clone(),
        )
    }

    pub fn sessions(&self) -> SecureSessionManager {
        self.sessions_with(&SessionConfig::default(), Arc::new(FormatVerifier::new(6)))
    }

    pub fn sessions_with(
        &self,
        config: &SessionConfig,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> SecureSessionManager {
        SecureSessionManager::new(
            config,
            SessionPlatform {
                cookies: self.cookies.clone(),
                scheduler: self.time.clone(),
                clock: self.time.clone(),
                rng: Arc::new(OsRandom),
                verifier,
                client_stores: vec![
                    self.local.clone() as Arc<dyn KeyValueStore>,
                    self.session.clone() as Arc<dyn KeyValueStore>,
                ],
            },
        )
    }
}

pub fn valid_credentials() -> Credentials {
    Credentials::new("user@example.com", "password123")
}

/// Event kinds received so far, without waiting
pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

/// Accepts every login and issues a fixed bearer token
pub struct IssuingVerifier(pub &'static str);

#[async_trait]
impl CredentialVerifier for IssuingVerifier {
    async fn verify(&self, _credentials: &Credentials) -> Result<AuthOutcome, AuthError> {
        Ok(AuthOutcome {
            auth_token: Some(self.0.to_string()),
        })
    }
}

/// Storage that fails every operation
pub struct BrokenStore;

impl KeyValueStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }

    fn set(&self, key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::QuotaExceeded(key.to_string()))
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }

    fn clear(&self) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }
}

/// Transport handlers that record every callback
#[derive(Default)]
pub struct RecordingHandlers {
    pub opens: Mutex<usize>,
    pub messages: Mutex<Vec<serde_json::Value>>,
    pub errors: Mutex<Vec<TransportError>>,
    pub closes: Mutex<Vec<(u16, String)>>,
}

impl RecordingHandlers {
    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<TransportError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().unwrap().clone()
    }
}

impl TransportHandlers for RecordingHandlers {
    fn on_open(&self) {
        *self.opens.lock().unwrap() += 1;
    }

    fn on_message(&self, message: &SanitizedMessage) {
        self.messages.lock().unwrap().push(message.to_value());
    }

    fn on_error(&self, error: &TransportError) {
        self.errors.lock().unwrap().push(error.clone());
    }

    fn on_close(&self, code: u16, reason: &str) {
        self.closes.lock().unwrap().push((code, reason.to_string()));
    }
}

/// A connection over a loopback peer, not yet accepted
pub struct Loopback {
    pub connection: Arc<SecureConnection>,
    pub events: EventStream,
    pub peer: RemotePeer,
    pub handlers: Arc<RecordingHandlers>,
}

impl Loopback {
    pub fn connect(url: &str, credential: Option<&str>) -> Result<Self, TransportError> {
        let (socket, peer) = ChannelSocketTransport::new();
        let transport = SecureTransport::new(&TransportConfig::default(), Arc::new(socket));
        let handlers = Arc::new(RecordingHandlers::default());
        let (connection, events) =
            transport.connect(url, credential.map(str::to_string), handlers.clone())?;
        Ok(Self {
            connection,
            events,
            peer,
            handlers,
        })
    }

    /// Process everything the peer has queued
    pub fn pump(&mut self) -> usize {
        self.connection.pump_pending(&mut self.events)
    }
}
