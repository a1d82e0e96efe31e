// Secure Cookie Module
// Builds security-prefixed, secure, strict-samesite cookies and their wire format

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Prefix that pins a cookie to the exact host, over HTTPS, with `path=/`
pub const HOST_PREFIX: &str = "__Host-";

/// Prefix that only requires the cookie to be set over HTTPS
pub const SECURE_PREFIX: &str = "__Secure-";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "strict",
            SameSite::Lax => "lax",
        }
    }
}

/// A cookie that always carries its security prefix and `secure; samesite=strict`.
///
/// Fields are private so the invariants cannot be broken after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureCookie {
    name: String,
    value: String,
    expires_at: DateTime<Utc>,
}

impl SecureCookie {
    /// Create a cookie living `max_age` from `now`. A name that already carries
    /// `prefix` is not prefixed twice. The value is percent-encoded, so it can
    /// never carry `;`, `,` or whitespace into the cookie line.
    pub fn new(
        prefix: &str,
        name: &str,
        value: impl Into<String>,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        Self {
            name: prefixed_name(prefix, name),
            value: urlencoding::encode(&value.into()).into_owned(),
            expires_at: now.checked_add_signed(max_age).unwrap_or(now),
        }
    }

    /// The removal form of a cookie: empty value, expiry at the Unix epoch
    pub fn expired(full_name: &str) -> Self {
        Self {
            name: full_name.to_string(),
            value: String::new(),
            expires_at: Utc.timestamp_opt(0, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn path(&self) -> &'static str {
        "/"
    }

    pub fn secure(&self) -> bool {
        true
    }

    pub fn same_site(&self) -> SameSite {
        SameSite::Strict
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Display for SecureCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}; expires={}; path={}; secure; samesite={}",
            self.name,
            self.value,
            self.expires_at.format(HTTP_DATE_FORMAT),
            self.path(),
            self.same_site().as_str()
        )
    }
}

/// Apply `prefix` to `name` unless it is already there
pub fn prefixed_name(prefix: &str, name: &str) -> String {
    if name.starts_with(prefix) {
        name.to_string()
    } else {
        format!("{}{}", prefix, name)
    }
}
