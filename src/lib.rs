//! Client-side security and session subsystem
//!
//! - [`security::CsrfTokenManager`] issues, persists and validates anti-forgery tokens
//! - [`security::SecureSessionManager`] runs the login/session state machine with
//!   an inactivity timeout and hardened cookies
//! - [`transport::SecureTransport`] opens encrypted, authenticated sockets and
//!   sanitizes inbound messages
//!
//! Host services (time, randomness, storage, cookies, timers, sockets) are
//! injected through the traits in [`platform`] and [`transport::socket`].

pub mod config;
pub mod platform;
pub mod security;
pub mod transport;

pub use config::{Config, ConfigError, CsrfConfig, SessionConfig, TransportConfig};
pub use security::{CsrfTokenManager, SecureSessionManager, SessionEvent, SessionEventKind};
pub use transport::{SecureConnection, SecureTransport, TransportError, TransportHandlers};
