//! Walks through a full client session against in-process platform services:
//! CSRF-protected form submit, login, an authenticated socket, then logout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use loginguard::Config;
use loginguard::platform::{
    KeyValueStore, MemoryCookieJar, MemoryStore, OsRandom, SystemClock, TokioScheduler,
};
use loginguard::security::{
    ActivitySignal, Credentials, CsrfTokenManager, FormModel, FormatVerifier,
    SecureSessionManager, SessionPlatform,
};
use loginguard::transport::{
    ChannelSocketTransport, SanitizedMessage, SecureTransport, TransportError, TransportHandlers,
};

#[derive(Parser, Debug)]
#[command(name = "login-demo", about = "Exercise the client security subsystem end to end")]
struct Args {
    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "user@example.com")]
    email: String,

    #[arg(long, default_value = "password123")]
    password: String,

    /// Socket endpoint; insecure schemes are upgraded automatically
    #[arg(long, default_value = "ws://localhost:8080/stream")]
    url: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

struct LoggingHandlers;

impl TransportHandlers for LoggingHandlers {
    fn on_open(&self) {
        info!("socket open");
    }

    fn on_message(&self, message: &SanitizedMessage) {
        info!(message = %message.to_value(), "socket message");
    }

    fn on_error(&self, error: &TransportError) {
        warn!("socket error: {}", error);
    }

    fn on_close(&self, code: u16, reason: &str) {
        info!(code, reason, "socket closed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    let config = Config::load(args.config.as_deref())?;
    let clock = Arc::new(SystemClock);
    let rng = Arc::new(OsRandom);
    let local_storage = Arc::new(MemoryStore::new());
    let session_storage = Arc::new(MemoryStore::new());
    let cookies = Arc::new(MemoryCookieJar::new());

    // Anti-forgery token on a form submit
    let csrf = CsrfTokenManager::new(&config.csrf, local_storage.clone(), rng.clone(), clock.clone());
    let mut form = FormModel::new();
    form.set_field("email", args.email.as_str());
    csrf.attach_to_form(&mut form);
    let submitted = form.submit();
    let token = submitted.get(csrf.field_name()).cloned().unwrap_or_default();
    info!(valid = csrf.validate(&token), "form submitted with CSRF token");

    // Session login and activity tracking
    let sessions = SecureSessionManager::new(
        &config.session,
        SessionPlatform {
            cookies: cookies.clone(),
            scheduler: Arc::new(TokioScheduler::current()?),
            clock: clock.clone(),
            rng: rng.clone(),
            verifier: Arc::new(
                FormatVerifier::with_policy(config.session.password_policy.clone())
                    .with_latency(Duration::from_millis(250)),
            ),
            client_stores: vec![
                local_storage.clone() as Arc<dyn KeyValueStore>,
                session_storage as Arc<dyn KeyValueStore>,
            ],
        },
    );

    let mut events = sessions.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(event = event.name(), message = %event.message, "session event");
        }
    });

    sessions
        .login(&Credentials::new(args.email.as_str(), args.password.as_str()))
        .await?;

    let (activity_tx, activity_rx) = mpsc::unbounded_channel();
    let listener = sessions.spawn_activity_listener(activity_rx);
    activity_tx.send(ActivitySignal::Click)?;

    // Authenticated socket over a loopback peer
    let (socket, peer) = ChannelSocketTransport::new();
    let transport = SecureTransport::new(&config.transport, Arc::new(socket));
    let (connection, pump) =
        transport.connect_and_spawn(&args.url, sessions.session_id(), Arc::new(LoggingHandlers))?;
    info!(url = %connection.url(), "connecting");

    peer.accept();
    peer.push_frame(r#"{"type":"AuthenticationSuccess","session":"hidden"}"#);
    peer.push_frame(r#"{"type":"data","payload":"hello","internal":"dropped"}"#);
    tokio::time::sleep(Duration::from_millis(50)).await;

    info!(authenticated = connection.is_authenticated(), "socket state");
    connection.send(&serde_json::json!({"type": "data", "payload": "ping"}));
    connection.close_normal();
    pump.await?;

    drop(activity_tx);
    listener.await?;
    sessions.logout();

    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    info!(cookies_cleared = cookies.is_empty(), "demo finished");
    Ok(())
}
