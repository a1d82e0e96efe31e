pub mod cookies;
pub mod credentials;
pub mod csrf;
pub mod events;
pub mod session;
pub mod token_store;

pub use cookies::{HOST_PREFIX, SECURE_PREFIX, SameSite, SecureCookie, prefixed_name};
pub use credentials::{
    AuthError, AuthOutcome, CredentialVerifier, Credentials, FormatVerifier, PasswordPolicy,
};
pub use csrf::{
    CsrfError, CsrfForm, CsrfToken, CsrfTokenManager, FieldRefresher, FormField, FormModel,
    RequestOptions, constant_time_eq,
};
pub use events::{ActivitySignal, EventBus, SessionEvent, SessionEventKind};
pub use session::{SecureSessionManager, SessionError, SessionPhase, SessionPlatform};
pub use token_store::{Expiring, TokenStore, TokenStoreError};
