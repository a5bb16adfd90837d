//! # Chavrusa Board Binary
//!
//! Assembles the board from its plugins and serves it.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use cb_api::handlers::AppState;
use cb_auth_simple::SimpleAuthProvider;
use cb_config::Settings;
use cb_core::relay::Relay;
use cb_core::BoardService;
use cb_db_sqlite::SqlitePostRepo;
use cb_ratelimit_memory::MemoryRateLimiter;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "relay-smtp")]
use cb_core::traits::RelayTransport;
#[cfg(feature = "relay-smtp")]
use cb_relay_smtp::{SmtpRelay, SmtpSettings};

const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = cb_config::load_dotenv();
    init_tracing();
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(err) => debug!(error = %err, "no .env loaded"),
    }

    let mut settings = Settings::load()?;

    // 1. Storage
    let repo = SqlitePostRepo::open(&settings.database_path)
        .await
        .with_context(|| format!("opening database {}", settings.database_path.display()))?;
    let applied = repo.migrate().await.context("migrating database")?;
    info!(path = %settings.database_path.display(), migrations = applied, "database ready");

    // 2. Identity
    let owner_key_configured = settings.owner_delete_key.is_some();
    let auth = Arc::new(SimpleAuthProvider::new(settings.owner_delete_key.take()));

    match repo.import_legacy_file(&settings.legacy_posts_path, auth.as_ref()).await {
        Ok(0) => {}
        Ok(count) => info!(count, "legacy posts imported"),
        // Not recorded as done, so it is retried on the next start.
        Err(err) => error!(error = ?err, path = %settings.legacy_posts_path.display(), "legacy import failed"),
    }

    // 3. Relay
    let relay = build_relay(&mut settings);
    if !relay.is_configured() {
        warn!("email relay is not configured; responses are saved without notification");
    }
    info!(relay = relay.is_configured(), owner_key = owner_key_configured, "board configured");

    let service = BoardService::new(Arc::new(repo), auth, relay, settings.validation_policy);
    let state = AppState {
        service: Arc::new(service),
        limiter: Arc::new(MemoryRateLimiter::new()),
        base_url: settings.base_url(),
    };
    let app = cb_api::router(state, settings.public_dir.as_deref());

    let address = settings.listen_addr();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(%address, policy = ?settings.validation_policy, "server running");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

/// `RUST_LOG` filtering (default `info,sqlx=warn`); `LOG_FORMAT=json`
/// switches to one JSON object per line.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// A relay that cannot be built leaves the board running without email.
#[cfg(feature = "relay-smtp")]
fn build_relay(settings: &mut Settings) -> Relay {
    let smtp = SmtpSettings {
        host: settings.smtp_host.clone(),
        port: settings.smtp_port,
        user: settings.smtp_user.clone(),
        pass: settings.smtp_pass.take(),
        secure: settings.smtp_secure,
        from: settings.relay_from_email.clone(),
    };
    match SmtpRelay::from_settings(&smtp) {
        Ok(transport) => Relay::new(transport.map(|t| Arc::new(t) as Arc<dyn RelayTransport>)),
        Err(err) => {
            warn!(error = ?err, "SMTP relay could not be set up");
            Relay::default()
        }
    }
}

#[cfg(not(feature = "relay-smtp"))]
fn build_relay(_settings: &mut Settings) -> Relay {
    Relay::default()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(err) => {
                error!(error = %err, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
