//! Shared test helpers for server integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use voicetime_core::platform::VoicePlatform;
use voicetime_core::rng::DeterministicRng;
use voicetime_server::presence::PresenceCache;
use voicetime_server::state::AppState;
use voicetime_test_support::{InMemoryGuildRepository, ManualClock, MockRng};
use voicetime_tracking::application::tracker::{TrackerDeps, TrackerOptions, VoiceTracker};
use voicetime_tracking::domain::config::TrackerDefaults;
use voicetime_tracking::domain::policy::PolicyRegistry;

/// The router plus handles to the doubles behind it.
pub struct TestApp {
    pub router: Router,
    pub clock: Arc<ManualClock>,
    pub repository: Arc<InMemoryGuildRepository>,
    pub tracker: Arc<VoiceTracker>,
}

/// Build the full app router over an in-memory repository, a manual clock
/// and `MockRng`. Uses the same route structure as `main.rs`.
pub fn build_test_app() -> TestApp {
    let clock = Arc::new(ManualClock::at_test_epoch());
    let repository = Arc::new(InMemoryGuildRepository::new());
    let presence = Arc::new(PresenceCache::new());
    let platform: Arc<dyn VoicePlatform> = presence.clone();
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(MockRng));

    let tracker = Arc::new(VoiceTracker::new(
        TrackerOptions::default(),
        TrackerDefaults::default(),
        PolicyRegistry::default(),
        TrackerDeps {
            repository: repository.clone(),
            platform,
            clock: clock.clone(),
            rng,
        },
    ));
    let router = voicetime_server::build_router(AppState::new(Arc::clone(&tracker), presence));

    TestApp {
        router,
        clock,
        repository,
        tracker,
    }
}

/// Body of a voice state notification for one member.
pub fn voice_update(
    guild_id: u64,
    user_id: u64,
    before: Option<u64>,
    after: Option<u64>,
) -> serde_json::Value {
    serde_json::json!({
        "guild_id": guild_id,
        "member": { "user_id": user_id },
        "before": { "channel_id": before },
        "after": { "channel_id": after },
    })
}

/// Send a request with an optional JSON body and return the status and the
/// parsed body (`Null` when empty).
pub async fn send_json(
    app: &TestApp,
    method: &str,
    uri: &str,
    body: Option<&serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: &TestApp,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send_json(app, "POST", uri, Some(body)).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: &TestApp, uri: &str) -> (StatusCode, serde_json::Value) {
    send_json(app, "GET", uri, None).await
}
