//! Domain error types.

use thiserror::Error;

use crate::ids::{GuildId, UserId};

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A guild aggregate was not found.
    #[error("guild not found: {0}")]
    GuildNotFound(GuildId),

    /// A user aggregate was not found within its guild.
    #[error("user {user_id} not found in guild {guild_id}")]
    UserNotFound {
        /// The guild that was searched.
        guild_id: GuildId,
        /// The missing user.
        user_id: UserId,
    },

    /// An invalid option was passed to an edit operation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Stored content could not be parsed into guild records.
    #[error("malformed store: {0}")]
    MalformedStore(String),

    /// A platform lookup failed or timed out.
    #[error("platform error: {0}")]
    Platform(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}
