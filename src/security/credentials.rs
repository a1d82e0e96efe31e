// Credential Verification
// Capability used by the session manager to decide whether a login succeeds

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("Password must contain a number")]
    PasswordMissingNumber,

    #[error("Password must contain an uppercase letter")]
    PasswordMissingUppercase,

    #[error("Password must contain a special character")]
    PasswordMissingSpecial,

    #[error("Invalid credentials")]
    Rejected,

    #[error("Authentication backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of a successful verification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthOutcome {
    /// Bearer token issued by the backend, stored in the auth cookie when present
    pub auth_token: Option<String>,
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<AuthOutcome, AuthError>;
}

/// Characters that satisfy `require_special`
const SPECIAL_CHARS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Password rules checked before a login reaches the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    /// Minimum length in characters (default: 6)
    pub min_length: usize,
    pub require_number: bool,
    pub require_uppercase: bool,
    /// At least one of `!@#$%^&*(),.?":{}|<>`
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 6,
            require_number: false,
            require_uppercase: false,
            require_special: false,
        }
    }
}

impl PasswordPolicy {
    pub fn with_min_length(min_length: usize) -> Self {
        Self {
            min_length,
            ..Self::default()
        }
    }

    pub fn check(&self, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < self.min_length {
            return Err(AuthError::PasswordTooShort {
                min: self.min_length,
            });
        }
        if self.require_special && !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            return Err(AuthError::PasswordMissingSpecial);
        }
        if self.require_number && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(AuthError::PasswordMissingNumber);
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(AuthError::PasswordMissingUppercase);
        }
        Ok(())
    }
}

/// Accepts any well-formed credentials, optionally after a simulated delay.
///
/// Stands in for a real backend in demos and tests.
pub struct FormatVerifier {
    email_pattern: Regex,
    policy: PasswordPolicy,
    latency: Duration,
}

impl FormatVerifier {
    pub fn new(min_password_length: usize) -> Self {
        Self::with_policy(PasswordPolicy::with_min_length(min_password_length))
    }

    pub fn with_policy(policy: PasswordPolicy) -> Self {
        let email_pattern =
            Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Valid regex pattern for email");
        Self {
            email_pattern,
            policy,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Surrounding whitespace in the email is ignored; the password is taken as is
    pub fn check(&self, credentials: &Credentials) -> Result<(), AuthError> {
        if !self.email_pattern.is_match(credentials.email.trim()) {
            return Err(AuthError::InvalidEmail);
        }
        self.policy.check(&credentials.password)
    }
}

#[async_trait]
impl CredentialVerifier for FormatVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<AuthOutcome, AuthError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check(credentials)?;
        debug!("Credentials accepted");
        Ok(AuthOutcome::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("user@example.com", "hunter22");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("user@example.com"));
        assert!(!rendered.contains("hunter22"));
    }

    #[tokio::test]
    async fn test_format_verifier() {
        let verifier = FormatVerifier::new(6);

        assert!(
            verifier
                .verify(&Credentials::new("user@example.com", "secret"))
                .await
                .is_ok()
        );
        assert_eq!(
            verifier
                .verify(&Credentials::new("not-an-email", "secret"))
                .await,
            Err(AuthError::InvalidEmail)
        );
        assert_eq!(
            verifier
                .verify(&Credentials::new("a@b.co", "12345"))
                .await,
            Err(AuthError::PasswordTooShort { min: 6 })
        );
        assert_eq!(
            verifier
                .verify(&Credentials::new("a b@c.io", "secret"))
                .await,
            Err(AuthError::InvalidEmail)
        );
    }

    #[test]
    fn test_email_is_trimmed() {
        let verifier = FormatVerifier::new(6);
        assert!(
            verifier
                .check(&Credentials::new("  user@example.com \t", "secret"))
                .is_ok()
        );
        assert_eq!(
            verifier.check(&Credentials::new("   ", "secret")),
            Err(AuthError::InvalidEmail)
        );
    }

    #[test]
    fn test_password_policy_rules() {
        let policy = PasswordPolicy {
            min_length: 8,
            require_number: true,
            require_uppercase: true,
            require_special: true,
        };

        assert_eq!(
            policy.check("Ab1!"),
            Err(AuthError::PasswordTooShort { min: 8 })
        );
        assert_eq!(
            policy.check("Abcdefg1"),
            Err(AuthError::PasswordMissingSpecial)
        );
        assert_eq!(
            policy.check("Abcdefg!"),
            Err(AuthError::PasswordMissingNumber)
        );
        assert_eq!(
            policy.check("abcdef1!"),
            Err(AuthError::PasswordMissingUppercase)
        );
        assert!(policy.check("Abcdef1!").is_ok());
        assert!(policy.check("Abcdef1\"").is_ok());
    }

    #[test]
    fn test_default_policy_only_checks_length() {
        let policy = PasswordPolicy::default();
        assert!(policy.check("aaaaaa").is_ok());
        assert_eq!(policy.check("aaaaa"), Err(AuthError::PasswordTooShort { min: 6 }));
    }

    #[tokio::test]
    async fn test_verifier_applies_policy() {
        let verifier = FormatVerifier::with_policy(PasswordPolicy {
            require_number: true,
            ..PasswordPolicy::default()
        });
        assert_eq!(
            verifier
                .verify(&Credentials::new("user@example.com", "password"))
                .await,
            Err(AuthError::PasswordMissingNumber)
        );
        assert!(
            verifier
                .verify(&Credentials::new("user@example.com", "passw0rd"))
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let verifier = FormatVerifier::new(1).with_latency(Duration::from_millis(1500));
        let started = tokio::time::Instant::now();
        verifier
            .verify(&Credentials::new("a@b.co", "x"))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }
}
