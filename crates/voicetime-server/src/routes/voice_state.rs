//! Voice state ingest route.

use axum::extract::State;
use axum::{Json, Router, routing::post};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;
use voicetime_core::event::DomainEvent;
use voicetime_tracking::application::voice_handlers;
use voicetime_tracking::domain::transitions::{Transition, VoiceStateUpdate};

use crate::state::AppState;

/// One published event, as reported back to the caller.
#[derive(Debug, Serialize)]
pub struct PublishedEvent {
    pub event_id: Uuid,
    pub event_type: &'static str,
}

/// Response body for POST /api/v1/voice-state.
#[derive(Debug, Serialize)]
pub struct VoiceStateResponse {
    pub correlation_id: Uuid,
    pub transitions: Vec<Transition>,
    pub events: Vec<PublishedEvent>,
}

/// POST /api/v1/voice-state
#[instrument(
    skip(state, update),
    fields(guild_id = %update.guild_id, user_id = %update.member.user_id)
)]
async fn ingest_voice_state(
    State(state): State<AppState>,
    Json(update): Json<VoiceStateUpdate>,
) -> Json<VoiceStateResponse> {
    state.presence.record(&update).await;

    let result = voice_handlers::handle_voice_state_update(&update, &state.tracker).await;

    info!(
        correlation_id = %result.correlation_id,
        events = result.events.len(),
        "handled voice state update"
    );

    Json(VoiceStateResponse {
        correlation_id: result.correlation_id,
        transitions: result.transitions,
        events: result
            .events
            .iter()
            .map(|event| PublishedEvent {
                event_id: event.metadata().event_id,
                event_type: event.event_type(),
            })
            .collect(),
    })
}

/// Returns the router for voice state ingest.
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(ingest_voice_state))
}
