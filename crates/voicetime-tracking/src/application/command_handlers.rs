//! Command handlers for administrative edits.
//!
//! Each handler locks the guild, applies the edit and commits. Invalid
//! input and unknown ids are rejected; storage failures are logged by the
//! tracker and leave the in-memory edit in place.

use tracing::{error, info, instrument};
use voicetime_core::error::DomainError;

use crate::application::tracker::VoiceTracker;
use crate::domain::commands::{CreateGuild, DeleteGuild, DeleteUser, EditGuildConfig, EditUser};

/// Handles the `CreateGuild` command: materializes the guild with the
/// default config and stores it. Returns whether the guild was new.
#[instrument(skip(command, tracker), fields(correlation_id = %command.correlation_id, guild_id = %command.guild_id))]
pub async fn handle_create_guild(command: &CreateGuild, tracker: &VoiceTracker) -> bool {
    let created = tracker.guild_handle(command.guild_id).await.is_none();
    let handle = tracker.guild_or_create(command.guild_id).await;
    let mut guild = handle.lock().await;
    tracker.commit(&mut guild).await;
    if created {
        info!("created guild");
    }
    created
}

/// Handles the `EditGuildConfig` command.
///
/// # Errors
///
/// Returns `DomainError::GuildNotFound` if the guild is unknown, or
/// `DomainError::Validation` if the patched bounds are inconsistent.
#[instrument(skip(command, tracker), fields(correlation_id = %command.correlation_id, guild_id = %command.guild_id))]
pub async fn handle_edit_guild_config(
    command: &EditGuildConfig,
    tracker: &VoiceTracker,
) -> Result<(), DomainError> {
    let handle = tracker
        .guild_handle(command.guild_id)
        .await
        .ok_or(DomainError::GuildNotFound(command.guild_id))?;
    let mut guild = handle.lock().await;
    guild.apply_config_patch(&command.patch, tracker.defaults())?;
    tracker.commit(&mut guild).await;
    Ok(())
}

/// Handles the `EditUser` command. Blacklisting a user closes any open
/// session without crediting it.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a malformed patch,
/// `DomainError::GuildNotFound` or `DomainError::UserNotFound` for unknown
/// ids.
#[instrument(
    skip(command, tracker),
    fields(
        correlation_id = %command.correlation_id,
        guild_id = %command.guild_id,
        user_id = %command.user_id
    )
)]
pub async fn handle_edit_user(command: &EditUser, tracker: &VoiceTracker) -> Result<(), DomainError> {
    command.patch.validate()?;
    let handle = tracker
        .guild_handle(command.guild_id)
        .await
        .ok_or(DomainError::GuildNotFound(command.guild_id))?;
    let mut guild = handle.lock().await;
    let multiplier = tracker.policy_for(command.guild_id).level_multiplier();
    let now = tracker.now();

    let user = guild
        .user_mut(command.user_id)
        .ok_or(DomainError::UserNotFound {
            guild_id: command.guild_id,
            user_id: command.user_id,
        })?;
    if let Some(xp) = command.patch.xp {
        user.set_xp(xp, multiplier);
    }
    if let Some(is_blacklisted) = command.patch.is_blacklisted {
        if let (true, Some(channel_id)) = (is_blacklisted, user.open_channel()) {
            user.close_session(channel_id, now, false);
        }
        user.set_blacklisted(is_blacklisted);
    }
    if let Some(times) = &command.patch.channel_times {
        user.replace_channel_times(times);
    }

    tracker.commit(&mut guild).await;
    Ok(())
}

/// Handles the `DeleteGuild` command.
///
/// # Errors
///
/// Returns `DomainError::GuildNotFound` if the guild is unknown.
#[instrument(skip(command, tracker), fields(correlation_id = %command.correlation_id, guild_id = %command.guild_id))]
pub async fn handle_delete_guild(
    command: &DeleteGuild,
    tracker: &VoiceTracker,
) -> Result<(), DomainError> {
    match tracker.delete_guild(command.guild_id).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(DomainError::GuildNotFound(command.guild_id)),
        Err(error) => {
            error!(%error, "guild removed from memory but not from storage");
            Ok(())
        }
    }
}

/// Handles the `DeleteUser` command.
///
/// # Errors
///
/// Returns `DomainError::GuildNotFound` or `DomainError::UserNotFound` for
/// unknown ids.
#[instrument(
    skip(command, tracker),
    fields(
        correlation_id = %command.correlation_id,
        guild_id = %command.guild_id,
        user_id = %command.user_id
    )
)]
pub async fn handle_delete_user(
    command: &DeleteUser,
    tracker: &VoiceTracker,
) -> Result<(), DomainError> {
    let handle = tracker
        .guild_handle(command.guild_id)
        .await
        .ok_or(DomainError::GuildNotFound(command.guild_id))?;
    let mut guild = handle.lock().await;
    guild
        .remove_user(command.user_id)
        .ok_or(DomainError::UserNotFound {
            guild_id: command.guild_id,
            user_id: command.user_id,
        })?;
    tracker.commit(&mut guild).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;
    use voicetime_core::ids::{ChannelId, GuildId, UserId};
    use voicetime_test_support::{InMemoryGuildRepository, RepositoryWrite};

    use super::*;
    use crate::application::tracker::TrackerOptions;
    use crate::application::tracker::test_fixtures::{Harness, harness_with};
    use crate::domain::commands::{ChannelTimePatch, GuildConfigPatch, UserPatch};
    use crate::domain::config::TrackerDefaults;

    const GUILD: GuildId = GuildId(1);
    const USER: UserId = UserId(100);

    fn harness(repo: &Arc<InMemoryGuildRepository>) -> Harness {
        harness_with(
            Arc::clone(repo) as _,
            TrackerDefaults::default(),
            TrackerOptions::default(),
        )
    }

    async fn create(h: &Harness) {
        handle_create_guild(
            &CreateGuild {
                correlation_id: Uuid::new_v4(),
                guild_id: GUILD,
            },
            &h.tracker,
        )
        .await;
    }

    async fn seed_user(h: &Harness) {
        let handle = h.tracker.guild_handle(GUILD).await.unwrap();
        let mut guild = handle.lock().await;
        let start = Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap();
        let user = guild.user_or_insert(USER);
        user.credit_tick(ChannelId(10), 60_000, start);
        user.close_session(ChannelId(10), start, true);
    }

    fn edit_user(patch: UserPatch) -> EditUser {
        EditUser {
            correlation_id: Uuid::new_v4(),
            guild_id: GUILD,
            user_id: USER,
            patch,
        }
    }

    #[tokio::test]
    async fn test_create_guild_persists_default_config_once() {
        // Arrange
        let repo = Arc::new(InMemoryGuildRepository::new());
        let h = harness(&repo);
        let command = CreateGuild {
            correlation_id: Uuid::new_v4(),
            guild_id: GUILD,
        };

        // Act
        let first = handle_create_guild(&command, &h.tracker).await;
        let second = handle_create_guild(&command, &h.tracker).await;

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(repo.writes().len(), 1);
        assert!(matches!(repo.writes()[0], RepositoryWrite::Save(_)));
    }

    #[tokio::test]
    async fn test_edit_guild_config_applies_patch_and_extra_data() {
        // Arrange
        let repo = Arc::new(InMemoryGuildRepository::new());
        let h = harness(&repo);
        create(&h).await;
        let command = EditGuildConfig {
            correlation_id: Uuid::new_v4(),
            guild_id: GUILD,
            patch: GuildConfigPatch {
                track_mute: Some(Some(false)),
                extra_data: Some(serde_json::json!({"announce": true})),
                ..GuildConfigPatch::default()
            },
        };

        // Act
        handle_edit_guild_config(&command, &h.tracker).await.unwrap();

        // Assert
        let stored = repo.stored(GUILD).unwrap();
        assert_eq!(stored.config.track_mute, Some(false));
        assert_eq!(stored.extra_data["announce"], true);
    }

    #[tokio::test]
    async fn test_edit_guild_config_rejects_inverted_bounds() {
        let repo = Arc::new(InMemoryGuildRepository::new());
        let h = harness(&repo);
        create(&h).await;
        let command = EditGuildConfig {
            correlation_id: Uuid::new_v4(),
            guild_id: GUILD,
            patch: GuildConfigPatch {
                min_user_count_to_participate: Some(Some(5)),
                max_user_count_to_participate: Some(Some(2)),
                ..GuildConfigPatch::default()
            },
        };

        let result = handle_edit_guild_config(&command, &h.tracker).await;

        match result.unwrap_err() {
            DomainError::Validation(msg) => assert!(msg.contains("user count")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_edit_guild_config_unknown_guild_is_not_found() {
        let repo = Arc::new(InMemoryGuildRepository::new());
        let h = harness(&repo);
        let command = EditGuildConfig {
            correlation_id: Uuid::new_v4(),
            guild_id: GuildId(404),
            patch: GuildConfigPatch::default(),
        };

        let result = handle_edit_guild_config(&command, &h.tracker).await;

        assert!(matches!(result, Err(DomainError::GuildNotFound(GuildId(404)))));
    }

    #[tokio::test]
    async fn test_edit_user_sets_xp_and_recomputes_level() {
        // Arrange
        let repo = Arc::new(InMemoryGuildRepository::new());
        let h = harness(&repo);
        create(&h).await;
        seed_user(&h).await;

        // Act
        handle_edit_user(
            &edit_user(UserPatch {
                xp: Some(10_000),
                ..UserPatch::default()
            }),
            &h.tracker,
        )
        .await
        .unwrap();

        // Assert
        let stored = repo.stored(GUILD).unwrap();
        assert_eq!(stored.users[0].xp, 10_000);
        assert_eq!(stored.users[0].level, 10);
    }

    #[tokio::test]
    async fn test_edit_user_replaces_channel_times() {
        let repo = Arc::new(InMemoryGuildRepository::new());
        let h = harness(&repo);
        create(&h).await;
        seed_user(&h).await;

        handle_edit_user(
            &edit_user(UserPatch {
                channel_times: Some(vec![ChannelTimePatch {
                    channel_id: ChannelId(30),
                    time_in_channel: 1_500,
                }]),
                ..UserPatch::default()
            }),
            &h.tracker,
        )
        .await
        .unwrap();

        let stored = repo.stored(GUILD).unwrap();
        assert_eq!(stored.users[0].channels.len(), 1);
        assert_eq!(stored.users[0].channels[0].channel_id, ChannelId(30));
        assert_eq!(stored.users[0].total_voice_time, 1_500);
    }

    #[tokio::test]
    async fn test_edit_unknown_user_is_not_found() {
        let repo = Arc::new(InMemoryGuildRepository::new());
        let h = harness(&repo);
        create(&h).await;

        let result = handle_edit_user(&edit_user(UserPatch::default()), &h.tracker).await;

        assert!(matches!(
            result,
            Err(DomainError::UserNotFound {
                guild_id: GUILD,
                user_id: USER
            })
        ));
    }

    #[tokio::test]
    async fn test_blacklisting_closes_open_session_without_credit() {
        // Arrange
        let repo = Arc::new(InMemoryGuildRepository::new());
        let h = harness(&repo);
        create(&h).await;
        {
            let handle = h.tracker.guild_handle(GUILD).await.unwrap();
            let mut guild = handle.lock().await;
            guild.user_or_insert(USER).open_session(ChannelId(10), h.tracker.now());
        }
        h.clock.advance_millis(30_000);

        // Act
        handle_edit_user(
            &edit_user(UserPatch {
                is_blacklisted: Some(true),
                ..UserPatch::default()
            }),
            &h.tracker,
        )
        .await
        .unwrap();

        // Assert
        let handle = h.tracker.guild_handle(GUILD).await.unwrap();
        let guild = handle.lock().await;
        let user = guild.user(USER).unwrap();
        assert!(user.is_blacklisted());
        assert!(user.open_channel().is_none());
        assert_eq!(user.total_voice_time(), 0);
    }

    #[tokio::test]
    async fn test_delete_user_and_guild() {
        // Arrange
        let repo = Arc::new(InMemoryGuildRepository::new());
        let h = harness(&repo);
        create(&h).await;
        seed_user(&h).await;

        // Act
        handle_delete_user(
            &DeleteUser {
                correlation_id: Uuid::new_v4(),
                guild_id: GUILD,
                user_id: USER,
            },
            &h.tracker,
        )
        .await
        .unwrap();
        let user_gone = repo.stored(GUILD).unwrap().users.is_empty();
        let delete_guild = DeleteGuild {
            correlation_id: Uuid::new_v4(),
            guild_id: GUILD,
        };
        handle_delete_guild(&delete_guild, &h.tracker).await.unwrap();
        let again = handle_delete_guild(&delete_guild, &h.tracker).await;

        // Assert
        assert!(user_gone);
        assert!(repo.stored(GUILD).is_none());
        assert!(matches!(again, Err(DomainError::GuildNotFound(GUILD))));
    }
}
