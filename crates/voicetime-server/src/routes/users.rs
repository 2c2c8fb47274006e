//! User administration and query routes, nested under a guild.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use tracing::{info, instrument};
use uuid::Uuid;
use voicetime_core::command::Command;
use voicetime_core::ids::{GuildId, UserId};
use voicetime_tracking::application::command_handlers;
use voicetime_tracking::application::query_handlers::{self, UserView};
use voicetime_tracking::domain::commands::{DeleteUser, EditUser, UserPatch};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/v1/guilds/{guild_id}/users/{user_id}
#[instrument(skip(state))]
async fn get_user(
    State(state): State<AppState>,
    Path((guild_id, user_id)): Path<(GuildId, UserId)>,
) -> Result<Json<UserView>, ApiError> {
    let view = query_handlers::get_user(guild_id, user_id, &state.tracker).await?;
    Ok(Json(view))
}

/// PATCH /api/v1/guilds/{guild_id}/users/{user_id}
#[instrument(skip(state, patch))]
async fn edit_user(
    State(state): State<AppState>,
    Path((guild_id, user_id)): Path<(GuildId, UserId)>,
    Json(patch): Json<UserPatch>,
) -> Result<Json<UserView>, ApiError> {
    let command = EditUser {
        correlation_id: Uuid::new_v4(),
        guild_id,
        user_id,
        patch,
    };

    info!(correlation_id = %command.correlation_id, command = command.command_type(), "handling command");

    command_handlers::handle_edit_user(&command, &state.tracker).await?;
    let view = query_handlers::get_user(guild_id, user_id, &state.tracker).await?;
    Ok(Json(view))
}

/// DELETE /api/v1/guilds/{guild_id}/users/{user_id}
#[instrument(skip(state))]
async fn delete_user(
    State(state): State<AppState>,
    Path((guild_id, user_id)): Path<(GuildId, UserId)>,
) -> Result<StatusCode, ApiError> {
    let command = DeleteUser {
        correlation_id: Uuid::new_v4(),
        guild_id,
        user_id,
    };

    info!(correlation_id = %command.correlation_id, command = command.command_type(), "handling command");

    command_handlers::handle_delete_user(&command, &state.tracker).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Returns the router for user routes.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{guild_id}/users/{user_id}",
        get(get_user).patch(edit_user).delete(delete_user),
    )
}
