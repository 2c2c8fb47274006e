//! Voicetime server entry point.

use std::sync::{Arc, Mutex};

use sqlx::postgres::PgPoolOptions;
use tokio::sync::{broadcast, watch};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use voicetime_core::clock::SystemClock;
use voicetime_core::event::DomainEvent;
use voicetime_core::platform::VoicePlatform;
use voicetime_core::repository::GuildRepository;
use voicetime_core::rng::{DeterministicRng, OsSeededRng};
use voicetime_server::config::{ServerConfig, StorageBackend};
use voicetime_server::error::AppError;
use voicetime_server::presence::PresenceCache;
use voicetime_server::state::AppState;
use voicetime_store::json_guild_repository::JsonGuildRepository;
use voicetime_store::pg_guild_repository::PgGuildRepository;
use voicetime_tracking::application::sweeper::spawn_sweeper;
use voicetime_tracking::application::tracker::{TrackerDeps, VoiceTracker};
use voicetime_tracking::domain::events::TrackerEvent;
use voicetime_tracking::domain::policy::PolicyRegistry;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    info!("Starting voicetime server");

    let config = ServerConfig::from_env()?;
    let repository = open_repository(&config.storage).await?;

    let presence = Arc::new(PresenceCache::new());
    let platform: Arc<dyn VoicePlatform> = presence.clone();
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(OsSeededRng::new()));
    let deps = TrackerDeps {
        repository,
        platform,
        clock: Arc::new(SystemClock),
        rng,
    };
    let tracker = Arc::new(VoiceTracker::new(
        config.options.clone(),
        config.defaults.clone(),
        PolicyRegistry::new(Arc::new(config.policy.clone())),
        deps,
    ));
    tracker.load().await?;

    let event_log = tokio::spawn(log_events(tracker.subscribe()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(Arc::clone(&tracker), shutdown_rx);

    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = voicetime_server::build_router(AppState::new(Arc::clone(&tracker), presence))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.socket_addr()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping sweeper");
    if shutdown_tx.send(true).is_err() {
        warn!("sweeper already gone");
    }
    if let Err(e) = sweeper.await {
        error!(error = %e, "sweeper task failed");
    }
    event_log.abort();

    Ok(())
}

async fn open_repository(storage: &StorageBackend) -> Result<Arc<dyn GuildRepository>, AppError> {
    match storage {
        StorageBackend::Json { path } => {
            info!(path = %path.display(), "using JSON file storage");
            Ok(Arc::new(JsonGuildRepository::open(path.clone()).await?))
        }
        StorageBackend::Postgres { database_url } => {
            info!("using PostgreSQL storage");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?;
            let repository = PgGuildRepository::new(pool);
            repository.ensure_schema().await?;
            Ok(Arc::new(repository))
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<TrackerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => debug!(
                event_type = event.event_type(),
                guild_id = %event.metadata().guild_id,
                user_id = %event.user_id,
                correlation_id = %event.metadata().correlation_id,
                "domain event"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutdown signal received");
}
