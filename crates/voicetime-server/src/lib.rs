//! Voicetime HTTP server library.
//!
//! Exposes the router and its state so integration tests can drive the
//! same routes as the binary.

use axum::Router;

pub mod config;
pub mod error;
pub mod presence;
pub mod routes;
pub mod state;

/// Builds the application router with every route mounted.
pub fn build_router(app_state: state::AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/voice-state", routes::voice_state::router())
        .nest("/api/v1/guilds", routes::guilds::router())
        .with_state(app_state)
}
