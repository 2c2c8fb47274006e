//! Guild administration and query routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;
use voicetime_core::command::Command;
use voicetime_core::ids::GuildId;
use voicetime_tracking::application::command_handlers;
use voicetime_tracking::application::query_handlers::{
    self, GuildSummary, GuildView, LeaderboardEntry, LeaderboardOrder,
};
use voicetime_tracking::domain::commands::{
    CreateGuild, DeleteGuild, EditGuildConfig, GuildConfigPatch,
};

use crate::error::ApiError;
use crate::routes::users;
use crate::state::AppState;

const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Query string for GET /{guild_id}/leaderboard.
#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    #[serde(default)]
    pub order: LeaderboardOrder,
    pub limit: Option<usize>,
}

/// GET /api/v1/guilds
async fn list_guilds(State(state): State<AppState>) -> Json<Vec<GuildSummary>> {
    Json(query_handlers::list_guilds(&state.tracker).await)
}

/// GET /api/v1/guilds/{guild_id}
#[instrument(skip(state))]
async fn get_guild(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
) -> Result<Json<GuildView>, ApiError> {
    let view = query_handlers::get_guild(guild_id, &state.tracker).await?;
    Ok(Json(view))
}

/// POST /api/v1/guilds/{guild_id}
///
/// Answers 201 when the guild is new and 200 when it already existed.
#[instrument(skip(state))]
async fn create_guild(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
) -> Result<(StatusCode, Json<GuildView>), ApiError> {
    let command = CreateGuild {
        correlation_id: Uuid::new_v4(),
        guild_id,
    };

    info!(correlation_id = %command.correlation_id, command = command.command_type(), "handling command");

    let created = command_handlers::handle_create_guild(&command, &state.tracker).await;
    let view = query_handlers::get_guild(guild_id, &state.tracker).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(view)))
}

/// DELETE /api/v1/guilds/{guild_id}
#[instrument(skip(state))]
async fn delete_guild(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
) -> Result<StatusCode, ApiError> {
    let command = DeleteGuild {
        correlation_id: Uuid::new_v4(),
        guild_id,
    };

    info!(correlation_id = %command.correlation_id, command = command.command_type(), "handling command");

    command_handlers::handle_delete_guild(&command, &state.tracker).await?;
    state.presence.forget_guild(guild_id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/v1/guilds/{guild_id}/config
#[instrument(skip(state, config_patch))]
async fn edit_guild_config(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
    Json(config_patch): Json<GuildConfigPatch>,
) -> Result<Json<GuildView>, ApiError> {
    let command = EditGuildConfig {
        correlation_id: Uuid::new_v4(),
        guild_id,
        patch: config_patch,
    };

    info!(correlation_id = %command.correlation_id, command = command.command_type(), "handling command");

    command_handlers::handle_edit_guild_config(&command, &state.tracker).await?;
    let view = query_handlers::get_guild(guild_id, &state.tracker).await?;
    Ok(Json(view))
}

/// GET /api/v1/guilds/{guild_id}/leaderboard
#[instrument(skip(state))]
async fn leaderboard(
    State(state): State<AppState>,
    Path(guild_id): Path<GuildId>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    let entries = query_handlers::leaderboard(guild_id, params.order, limit, &state.tracker).await?;
    Ok(Json(entries))
}

/// Returns the router for guild routes, users included.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_guilds))
        .route(
            "/{guild_id}",
            get(get_guild).post(create_guild).delete(delete_guild),
        )
        .route("/{guild_id}/config", patch(edit_guild_config))
        .route("/{guild_id}/leaderboard", get(leaderboard))
        .merge(users::router())
}
