//! Session Security Tests
//!
//! - Login, logout and inactivity expiry
//! - Activity tracking and timer resets
//! - Hardened cookie attributes
//! - Notifications on the event bus
//! - Real tokio timers with a paused clock

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{IssuingVerifier, TestPlatform, drain, valid_credentials};
use loginguard::config::SessionConfig;
use loginguard::platform::{
    Clock, CookieJar, KeyValueStore, MemoryCookieJar, OsRandom, SystemClock, TokioScheduler,
};
use loginguard::security::{
    ActivitySignal, AuthError, Credentials, FormatVerifier, SECURE_PREFIX, SecureSessionManager,
    SessionError, SessionEventKind, SessionPhase, SessionPlatform,
};
use tokio::sync::mpsc;

const ONE_MS: Duration = Duration::from_millis(1);

// ============================================================================
// Session Lifecycle
// ============================================================================

#[tokio::test]
async fn test_inactivity_expires_session_exactly_once() {
    let platform = TestPlatform::new();
    let sessions = platform.sessions();
    platform.local.set("csrfToken", "{}").unwrap();
    platform.session.set("draft", "hello").unwrap();

    sessions.login(&valid_credentials()).await.unwrap();
    let mut events = sessions.subscribe();

    platform.time.advance(sessions.timeout());

    assert_eq!(drain(&mut events), vec![SessionEventKind::SessionExpired]);
    assert_eq!(sessions.phase(), SessionPhase::LoggedOut);
    assert!(platform.cookies.get("__Host-sessionId").is_none());
    assert!(platform.local.is_empty());
    assert!(platform.session.is_empty());

    // Nothing else fires later
    platform.time.advance(sessions.timeout() * 3);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_inactivity_expiry_removes_auth_cookie() {
    let platform = TestPlatform::new();
    let sessions =
        platform.sessions_with(&SessionConfig::default(), Arc::new(IssuingVerifier("bearer-xyz")));
    sessions.login(&valid_credentials()).await.unwrap();
    assert_eq!(
        platform.cookies.get("__Host-authToken").as_deref(),
        Some("bearer-xyz")
    );
    let mut events = sessions.subscribe();

    platform.time.advance(sessions.timeout());

    assert_eq!(drain(&mut events), vec![SessionEventKind::SessionExpired]);
    assert!(platform.cookies.get("__Host-sessionId").is_none());
    assert!(platform.cookies.get("__Host-authToken").is_none());
    assert!(platform.cookies.is_empty());
    assert!(
        platform
            .cookies
            .written_lines()
            .iter()
            .any(|line| line.starts_with("__Host-authToken=; expires=Thu, 01 Jan 1970"))
    );
}

#[tokio::test]
async fn test_activity_just_before_timeout_extends_session() {
    let platform = TestPlatform::new();
    let sessions = platform.sessions();
    sessions.login(&valid_credentials()).await.unwrap();
    let mut events = sessions.subscribe();

    platform.time.advance(sessions.timeout() - ONE_MS);
    assert!(sessions.record_activity(ActivitySignal::PointerMove));

    // The original deadline passes without effect
    platform.time.advance(ONE_MS * 2);
    assert!(sessions.is_active());
    assert!(drain(&mut events).is_empty());

    // A full timeout after the activity, it expires
    platform.time.advance(sessions.timeout() - ONE_MS * 2);
    assert_eq!(drain(&mut events), vec![SessionEventKind::SessionExpired]);
    assert!(!sessions.is_active());
}

#[tokio::test]
async fn test_double_logout_is_harmless() {
    let platform = TestPlatform::new();
    let sessions = platform.sessions();
    sessions.login(&valid_credentials()).await.unwrap();
    let mut events = sessions.subscribe();

    sessions.logout();
    sessions.logout();

    assert_eq!(
        drain(&mut events),
        vec![SessionEventKind::Logout, SessionEventKind::Logout]
    );
    assert_eq!(sessions.phase(), SessionPhase::LoggedOut);
    assert_eq!(platform.time.pending(), 0);

    platform.time.advance(sessions.timeout() * 2);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_can_log_in_again_after_expiry() {
    let platform = TestPlatform::new();
    let sessions = platform.sessions();

    sessions.login(&valid_credentials()).await.unwrap();
    let first = sessions.session_id().unwrap();
    platform.time.advance(sessions.timeout());

    sessions.login(&valid_credentials()).await.unwrap();
    let second = sessions.session_id().unwrap();
    assert_ne!(first, second);
    assert_eq!(platform.cookies.get("__Host-sessionId"), Some(second));
}

#[tokio::test]
async fn test_rejected_credentials() {
    let platform = TestPlatform::new();
    let sessions = platform.sessions();
    let mut events = sessions.subscribe();

    let err = sessions
        .login(&Credentials::new("not-an-email", "password123"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Authentication(AuthError::InvalidEmail)));

    let err = sessions
        .login(&Credentials::new("user@example.com", "short"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Authentication(AuthError::PasswordTooShort { min: 6 })
    ));

    assert_eq!(sessions.phase(), SessionPhase::LoggedOut);
    assert!(drain(&mut events).is_empty());
    assert!(platform.cookies.is_empty());
}

// ============================================================================
// Cookies
// ============================================================================

#[tokio::test]
async fn test_session_cookie_is_hardened() {
    let platform = TestPlatform::new();
    let sessions = platform.sessions();
    sessions.login(&valid_credentials()).await.unwrap();

    let cookie = platform.cookies.cookie("__Host-sessionId").unwrap();
    assert_eq!(cookie.value().len(), 32);
    assert!(cookie.value().bytes().all(|b| b.is_ascii_hexdigit()));
    assert_eq!(
        cookie.expires_at(),
        platform.time.now() + chrono::Duration::hours(1)
    );

    let line = &platform.cookies.written_lines()[0];
    assert!(line.starts_with("__Host-sessionId="));
    assert!(line.contains("; path=/"));
    assert!(line.contains("; secure"));
    assert!(line.ends_with("; samesite=strict"));
}

#[tokio::test]
async fn test_secure_prefix_is_configurable() {
    let platform = TestPlatform::new();
    let config = SessionConfig {
        cookie_prefix: SECURE_PREFIX.to_string(),
        ..SessionConfig::default()
    };
    let sessions = platform.sessions_with(&config, Arc::new(FormatVerifier::new(6)));

    sessions.login(&valid_credentials()).await.unwrap();
    assert_eq!(sessions.session_cookie_name(), "__Secure-sessionId");
    assert!(platform.cookies.get("__Secure-sessionId").is_some());

    sessions.logout();
    assert!(platform.cookies.is_empty());
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_event_payloads() {
    let platform = TestPlatform::new();
    let sessions = platform.sessions();
    let mut events = sessions.subscribe();

    sessions.login(&valid_credentials()).await.unwrap();
    sessions.logout();

    let login = events.try_recv().unwrap();
    assert_eq!(login.name(), "login:success");
    assert_eq!(login.message, "Login successful! Redirecting to dashboard...");
    assert_eq!(login.timestamp, platform.time.now());

    let logout = events.try_recv().unwrap();
    assert_eq!(logout.name(), "auth:logout");
    assert_eq!(logout.message, "You have been logged out");
    assert_ne!(login.id, logout.id);
}

#[tokio::test]
async fn test_every_subscriber_is_notified() {
    let platform = TestPlatform::new();
    let sessions = platform.sessions();
    let mut first = sessions.subscribe();
    let mut second = sessions.clone().subscribe();

    sessions.login(&valid_credentials()).await.unwrap();

    assert_eq!(drain(&mut first), vec![SessionEventKind::LoginSuccess]);
    assert_eq!(drain(&mut second), vec![SessionEventKind::LoginSuccess]);
}

// ============================================================================
// Tokio Timers
// ============================================================================

fn tokio_sessions() -> (SecureSessionManager, Arc<TokioScheduler>, Arc<MemoryCookieJar>) {
    let scheduler = Arc::new(TokioScheduler::current().unwrap());
    let cookies = Arc::new(MemoryCookieJar::new());
    let sessions = SecureSessionManager::new(
        &SessionConfig::default(),
        SessionPlatform {
            cookies: cookies.clone(),
            scheduler: scheduler.clone(),
            clock: Arc::new(SystemClock),
            rng: Arc::new(OsRandom),
            verifier: Arc::new(FormatVerifier::new(6)),
            client_stores: Vec::<Arc<dyn KeyValueStore>>::new(),
        },
    );
    (sessions, scheduler, cookies)
}

#[tokio::test(start_paused = true)]
async fn test_tokio_timer_expires_session() {
    let (sessions, scheduler, cookies) = tokio_sessions();
    sessions.login(&valid_credentials()).await.unwrap();
    let mut events = sessions.subscribe();
    assert_eq!(scheduler.pending(), 1);

    tokio::time::sleep(sessions.timeout() + Duration::from_secs(1)).await;

    assert_eq!(events.recv().await.unwrap().kind, SessionEventKind::SessionExpired);
    assert_eq!(scheduler.pending(), 0);
    assert!(cookies.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_activity_listener_keeps_session_alive() {
    let (sessions, scheduler, _cookies) = tokio_sessions();
    sessions.login(&valid_credentials()).await.unwrap();

    let (signals, receiver) = mpsc::unbounded_channel();
    let listener = sessions.spawn_activity_listener(receiver);

    for _ in 0..3 {
        tokio::time::sleep(sessions.timeout() - Duration::from_secs(1)).await;
        signals.send(ActivitySignal::Keypress).unwrap();
        tokio::task::yield_now().await;
        assert!(sessions.is_active());
        assert_eq!(scheduler.pending(), 1);
    }

    drop(signals);
    listener.await.unwrap();

    tokio::time::sleep(sessions.timeout()).await;
    assert!(!sessions.is_active());
}
