// CSRF (Cross-Site Request Forgery) Protection Module
// Client-side anti-forgery token lifecycle: generation, persistence with expiry,
// constant-time validation, and attachment to forms and outgoing requests

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::token_store::{Expiring, TokenStore, TokenStoreError};
use crate::config::CsrfConfig;
use crate::platform::{Clock, KeyValueStore, RandomSource, random_hex};

/// Token entropy in bytes (256 bits)
pub const TOKEN_BYTES: usize = 32;

/// Hex-encoded token length
pub const TOKEN_HEX_LEN: usize = TOKEN_BYTES * 2;

#[derive(Debug, thiserror::Error)]
pub enum CsrfError {
    #[error("Failed to persist CSRF token: {0}")]
    Persist(#[from] TokenStoreError),

    #[error("CSRF token lifetime must be at least one minute")]
    ZeroLifetime,
}

/// Persisted anti-forgery token. Replaced as a whole, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfToken {
    pub value: String,
    /// Epoch milliseconds
    #[serde(rename = "expires")]
    pub expires_at: i64,
}

impl CsrfToken {
    /// 64 lowercase-or-uppercase hex digits
    pub fn is_well_formed(&self) -> bool {
        self.value.len() == TOKEN_HEX_LEN && self.value.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl Expiring for CsrfToken {
    fn expires_at_ms(&self) -> i64 {
        self.expires_at
    }
}

/// Outgoing request options; `decorate_request` returns a copy with the token header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub method: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

impl RequestOptions {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Produces the field value to send at submit time
pub type FieldRefresher = Box<dyn Fn() -> String + Send + Sync>;

/// The parts of a form the CSRF manager needs to touch
pub trait CsrfForm {
    fn has_field(&self, name: &str) -> bool;
    fn append_hidden_field(&mut self, name: &str, value: String);
    /// Run `refresh` right before submission and store its result in `name`
    fn on_before_submit(&mut self, name: &str, refresh: FieldRefresher);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub value: String,
    pub hidden: bool,
}

/// Minimal form model: ordered fields plus pre-submit hooks
#[derive(Default)]
pub struct FormModel {
    fields: IndexMap<String, FormField>,
    refreshers: Vec<(String, FieldRefresher)>,
}

impl FormModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        self.fields
            .entry(name.to_string())
            .and_modify(|f| f.value = value.clone())
            .or_insert(FormField {
                value,
                hidden: false,
            });
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Apply every pre-submit hook, then return the submitted name/value pairs
    pub fn submit(&mut self) -> IndexMap<String, String> {
        for (name, refresh) in &self.refreshers {
            let value = refresh();
            if let Some(field) = self.fields.get_mut(name) {
                field.value = value;
            }
        }
        self.fields
            .iter()
            .map(|(name, field)| (name.clone(), field.value.clone()))
            .collect()
    }
}

impl CsrfForm for FormModel {
    fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn append_hidden_field(&mut self, name: &str, value: String) {
        self.fields.insert(
            name.to_string(),
            FormField {
                value,
                hidden: true,
            },
        );
    }

    fn on_before_submit(&mut self, name: &str, refresh: FieldRefresher) {
        self.refreshers.push((name.to_string(), refresh));
    }
}

/// CSRF token manager. Cheap to clone; clones share storage and randomness.
#[derive(Clone)]
pub struct CsrfTokenManager {
    store: TokenStore<CsrfToken>,
    rng: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
    default_lifetime_minutes: u32,
    header_name: String,
    field_name: String,
}

impl CsrfTokenManager {
    pub fn new(
        config: &CsrfConfig,
        storage: Arc<dyn KeyValueStore>,
        rng: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store: TokenStore::new(storage, config.storage_key.clone()),
            rng,
            clock,
            default_lifetime_minutes: config.expiration_minutes.max(1),
            header_name: config.header_name.clone(),
            field_name: config.field_name.clone(),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Fresh 256-bit random value, hex-encoded
    pub fn generate(&self) -> String {
        random_hex(self.rng.as_ref(), TOKEN_BYTES)
    }

    /// Current token, creating one with the configured lifetime when needed
    pub fn get_or_create(&self) -> String {
        self.get_or_create_with(self.default_lifetime_minutes)
    }

    /// Current token if a stored, parsable, unexpired record exists; otherwise a
    /// new one valid for `expiration_minutes`.
    ///
    /// Read failures count as "absent" so users are never locked out of forms.
    /// A zero lifetime falls back to the configured one.
    pub fn get_or_create_with(&self, expiration_minutes: u32) -> String {
        let expiration_minutes = if expiration_minutes == 0 {
            warn!("Zero CSRF token lifetime requested, using the configured lifetime");
            self.default_lifetime_minutes
        } else {
            expiration_minutes
        };
        match self.load_live() {
            Some(token) => token.value,
            None => {
                let token = self.mint(expiration_minutes);
                if let Err(e) = self.store.save(&token) {
                    warn!("Failed to persist new CSRF token, using it unsaved: {}", e);
                }
                token.value
            }
        }
    }

    /// Unconditionally replace the stored token
    pub fn rotate(&self, expiration_minutes: u32) -> Result<String, CsrfError> {
        if expiration_minutes == 0 {
            return Err(CsrfError::ZeroLifetime);
        }
        let token = self.mint(expiration_minutes);
        self.store.save(&token)?;
        info!(expires_at_ms = token.expires_at, "CSRF token rotated");
        Ok(token.value)
    }

    /// Check a presented token against the stored one. Any doubt is `false`.
    pub fn validate(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            debug!("CSRF validation rejected: empty token");
            return false;
        }

        let stored = match self.store.load() {
            Ok(Some(token)) => token,
            Ok(None) => {
                warn!("CSRF validation rejected: no stored token");
                return false;
            }
            Err(e) => {
                warn!("CSRF validation rejected: {}", e);
                return false;
            }
        };

        if stored.is_expired(self.clock.now_millis()) {
            warn!("CSRF validation rejected: token expired");
            return false;
        }

        let valid = constant_time_eq(candidate, &stored.value);
        if !valid {
            warn!("CSRF validation rejected: token mismatch");
        }
        valid
    }

    /// Add the hidden token field to `form` (once) and refresh it on submit
    pub fn attach_to_form(&self, form: &mut dyn CsrfForm) {
        if form.has_field(&self.field_name) {
            return;
        }

        form.append_hidden_field(&self.field_name, self.get_or_create());

        let manager = self.clone();
        form.on_before_submit(&self.field_name, Box::new(move || manager.get_or_create()));
        debug!(field = %self.field_name, "CSRF field attached to form");
    }

    /// Copy of `options` with the token header added; `options` is untouched
    pub fn decorate_request(&self, options: &RequestOptions) -> RequestOptions {
        let mut decorated = options.clone();
        decorated
            .headers
            .insert(self.header_name.clone(), self.get_or_create());
        decorated
    }

    /// Add the token header to an HTTP request about to be sent
    pub fn protect(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header(self.header_name.as_str(), self.get_or_create())
    }

    fn mint(&self, expiration_minutes: u32) -> CsrfToken {
        let lifetime = Duration::from_secs(u64::from(expiration_minutes) * 60);
        CsrfToken {
            value: self.generate(),
            expires_at: self.clock.now_millis() + lifetime.as_millis() as i64,
        }
    }

    fn load_live(&self) -> Option<CsrfToken> {
        match self.store.load() {
            Ok(Some(token)) if !token.is_well_formed() => {
                warn!("Stored CSRF token is malformed, replacing it");
                None
            }
            Ok(Some(token)) if token.is_expired(self.clock.now_millis()) => {
                debug!("Stored CSRF token expired, replacing it");
                None
            }
            Ok(token) => token,
            Err(e) => {
                warn!("Error reading CSRF token, replacing it: {}", e);
                None
            }
        }
    }
}

/// Constant-time string comparison.
///
/// Unequal lengths return `false` immediately; this reveals the length, never
/// the content. Equal-length inputs are compared over every byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
