// Configuration
// Defaults, optional TOML file, then LOGINGUARD_-prefixed environment variables

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::security::cookies::{HOST_PREFIX, SECURE_PREFIX};
use crate::security::credentials::PasswordPolicy;
use crate::security::events::ActivitySignal;
use crate::transport::sanitize::FieldPolicy;

pub const ENV_PREFIX: &str = "LOGINGUARD_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: &str) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub csrf: CsrfConfig,
    pub session: SessionConfig,
    pub transport: TransportConfig,
}

/// Anti-forgery token settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Storage key of the persisted token record
    pub storage_key: String,
    /// Token lifetime (default: 30 minutes)
    pub expiration_minutes: u32,
    /// Request header carrying the token
    pub header_name: String,
    /// Hidden form field carrying the token
    pub field_name: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            storage_key: "csrfToken".to_string(),
            expiration_minutes: 30,
            header_name: "X-CSRF-Token".to_string(),
            field_name: "csrf_token".to_string(),
        }
    }
}

/// Cookie session and inactivity timeout settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity timeout (default: 30 minutes)
    pub timeout_minutes: u64,
    pub cookie_prefix: String,
    /// Cookie lifetime in seconds (default: 1 hour)
    pub cookie_max_age_secs: u64,
    pub session_cookie: String,
    pub auth_cookie: String,
    /// Signals that reset the inactivity timer
    pub activity_signals: Vec<ActivitySignal>,
    /// Checked by the built-in credential verifier before login
    pub password_policy: PasswordPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            cookie_prefix: HOST_PREFIX.to_string(),
            cookie_max_age_secs: 3600,
            session_cookie: "sessionId".to_string(),
            auth_cookie: "authToken".to_string(),
            activity_signals: ActivitySignal::ALL.to_vec(),
            password_policy: PasswordPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }

    pub fn cookie_max_age(&self) -> Duration {
        Duration::from_secs(self.cookie_max_age_secs)
    }

    pub fn tracked_signals(&self) -> HashSet<ActivitySignal> {
        self.activity_signals.iter().copied().collect()
    }
}

/// Secure socket settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub close_code: u16,
    pub close_reason: String,
    pub policy: FieldPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            close_code: 1000,
            close_reason: "Normal closure".to_string(),
            policy: FieldPolicy::default(),
        }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` (if given), then environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Config = Self::figment(path)
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.csrf.storage_key.trim().is_empty() {
            return Err(ConfigError::invalid("csrf.storage_key", "must not be empty"));
        }
        if self.csrf.expiration_minutes == 0 {
            return Err(ConfigError::invalid(
                "csrf.expiration_minutes",
                "must be at least 1 minute",
            ));
        }
        if self.csrf.header_name.trim().is_empty() {
            return Err(ConfigError::invalid("csrf.header_name", "must not be empty"));
        }
        if self.csrf.field_name.trim().is_empty() {
            return Err(ConfigError::invalid("csrf.field_name", "must not be empty"));
        }

        if self.session.timeout_minutes == 0 {
            return Err(ConfigError::invalid(
                "session.timeout_minutes",
                "must be at least 1 minute",
            ));
        }
        if self.session.timeout_minutes > 7 * 24 * 60 {
            return Err(ConfigError::invalid(
                "session.timeout_minutes",
                "must not exceed 7 days",
            ));
        }
        if self.session.cookie_prefix != HOST_PREFIX && self.session.cookie_prefix != SECURE_PREFIX
        {
            return Err(ConfigError::invalid(
                "session.cookie_prefix",
                "must be __Host- or __Secure-",
            ));
        }
        if self.session.session_cookie.is_empty() || self.session.auth_cookie.is_empty() {
            return Err(ConfigError::invalid(
                "session.session_cookie",
                "cookie names must not be empty",
            ));
        }
        if self.session.activity_signals.is_empty() {
            return Err(ConfigError::invalid(
                "session.activity_signals",
                "at least one activity signal is required",
            ));
        }

        if self.session.password_policy.min_length == 0 {
            return Err(ConfigError::invalid(
                "session.password_policy.min_length",
                "must be at least 1",
            ));
        }

        if !(1000..=4999).contains(&self.transport.close_code) {
            return Err(ConfigError::invalid(
                "transport.close_code",
                "must be between 1000 and 4999",
            ));
        }

        Ok(())
    }
}
