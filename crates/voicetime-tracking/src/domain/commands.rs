//! Administrative commands for the voice tracking context.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer};
use uuid::Uuid;
use voicetime_core::command::Command;
use voicetime_core::error::DomainError;
use voicetime_core::ids::{ChannelId, GuildId, UserId};

/// Partial update of a guild's configuration. An absent field is left
/// unchanged, an explicit `null` clears the override so the manager-wide
/// default applies again.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuildConfigPatch {
    #[serde(deserialize_with = "nullable")]
    pub track_bots: Option<Option<bool>>,
    #[serde(deserialize_with = "nullable")]
    pub track_all_channels: Option<Option<bool>>,
    #[serde(deserialize_with = "nullable")]
    pub channel_ids: Option<Option<Vec<ChannelId>>>,
    #[serde(deserialize_with = "nullable")]
    pub exempt_permissions: Option<Option<Vec<String>>>,
    #[serde(deserialize_with = "nullable")]
    pub track_mute: Option<Option<bool>>,
    #[serde(deserialize_with = "nullable")]
    pub track_deaf: Option<Option<bool>>,
    #[serde(deserialize_with = "nullable")]
    pub min_user_count_to_participate: Option<Option<u32>>,
    #[serde(deserialize_with = "nullable")]
    pub max_user_count_to_participate: Option<Option<u32>>,
    #[serde(deserialize_with = "nullable")]
    pub min_xp_to_participate: Option<Option<u64>>,
    #[serde(deserialize_with = "nullable")]
    pub min_level_to_participate: Option<Option<u64>>,
    #[serde(deserialize_with = "nullable")]
    pub max_xp_to_participate: Option<Option<u64>>,
    #[serde(deserialize_with = "nullable")]
    pub max_level_to_participate: Option<Option<u64>>,
    #[serde(deserialize_with = "nullable")]
    pub voice_time_tracking_enabled: Option<Option<bool>>,
    #[serde(deserialize_with = "nullable")]
    pub leveling_tracking_enabled: Option<Option<bool>>,
    /// Replaces the guild's opaque application data.
    pub extra_data: Option<serde_json::Value>,
}

/// Maps a present field to `Some`, so `null` becomes `Some(None)` while an
/// absent field keeps the `None` from `#[serde(default)]`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Replacement time for one channel in a [`UserPatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelTimePatch {
    pub channel_id: ChannelId,
    pub time_in_channel: u64,
}

/// Partial update of a user's statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserPatch {
    /// New xp; the level is recomputed.
    pub xp: Option<u64>,
    pub is_blacklisted: Option<bool>,
    /// Replaces every channel time. Channels not listed are dropped.
    pub channel_times: Option<Vec<ChannelTimePatch>>,
}

impl UserPatch {
    /// Rejects patches that name the same channel twice.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` naming the repeated channel.
    pub fn validate(&self) -> Result<(), DomainError> {
        let Some(times) = &self.channel_times else {
            return Ok(());
        };
        let mut seen = BTreeSet::new();
        for entry in times {
            if !seen.insert(entry.channel_id) {
                return Err(DomainError::Validation(format!(
                    "channel {} listed more than once",
                    entry.channel_id
                )));
            }
        }
        Ok(())
    }
}

/// Command to materialize a guild with the default configuration.
#[derive(Debug, Clone)]
pub struct CreateGuild {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The guild to create.
    pub guild_id: GuildId,
}

/// Command to patch a guild's configuration.
#[derive(Debug, Clone)]
pub struct EditGuildConfig {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The guild to edit.
    pub guild_id: GuildId,
    /// Fields to change.
    pub patch: GuildConfigPatch,
}

/// Command to patch a user's statistics.
#[derive(Debug, Clone)]
pub struct EditUser {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The guild the user belongs to.
    pub guild_id: GuildId,
    /// The user to edit.
    pub user_id: UserId,
    /// Fields to change.
    pub patch: UserPatch,
}

/// Command to delete a guild and everything it owns.
#[derive(Debug, Clone)]
pub struct DeleteGuild {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The guild to delete.
    pub guild_id: GuildId,
}

/// Command to delete one user from a guild.
#[derive(Debug, Clone)]
pub struct DeleteUser {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The guild the user belongs to.
    pub guild_id: GuildId,
    /// The user to delete.
    pub user_id: UserId,
}

macro_rules! impl_command {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(impl Command for $ty {
            fn command_type(&self) -> &'static str {
                $name
            }

            fn correlation_id(&self) -> Uuid {
                self.correlation_id
            }
        })*
    };
}

impl_command!(
    CreateGuild => "tracking.create_guild",
    EditGuildConfig => "tracking.edit_guild_config",
    EditUser => "tracking.edit_user",
    DeleteGuild => "tracking.delete_guild",
    DeleteUser => "tracking.delete_user",
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guild_config_patch_rejects_unknown_fields() {
        let result = serde_json::from_str::<GuildConfigPatch>(r#"{"track_robots": true}"#);

        assert!(result.is_err());
    }

    #[test]
    fn test_guild_config_patch_parses_partial_body() {
        let patch: GuildConfigPatch =
            serde_json::from_str(r#"{"track_mute": false, "channel_ids": [1, 2]}"#).unwrap();

        assert_eq!(patch.track_mute, Some(Some(false)));
        assert_eq!(patch.channel_ids, Some(Some(vec![ChannelId(1), ChannelId(2)])));
        assert_eq!(patch.track_bots, None);
    }

    #[test]
    fn test_guild_config_patch_keeps_null_apart_from_absent() {
        let patch: GuildConfigPatch =
            serde_json::from_str(r#"{"track_mute": null, "channel_ids": null}"#).unwrap();

        assert_eq!(patch.track_mute, Some(None));
        assert_eq!(patch.channel_ids, Some(None));
        assert_eq!(patch.track_deaf, None);
    }

    #[test]
    fn test_user_patch_rejects_duplicate_channels() {
        let patch = UserPatch {
            channel_times: Some(vec![
                ChannelTimePatch {
                    channel_id: ChannelId(1),
                    time_in_channel: 10,
                },
                ChannelTimePatch {
                    channel_id: ChannelId(1),
                    time_in_channel: 20,
                },
            ]),
            ..UserPatch::default()
        };

        match patch.validate().unwrap_err() {
            DomainError::Validation(msg) => assert!(msg.contains("channel 1")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_command_type_names() {
        let command = DeleteUser {
            correlation_id: Uuid::nil(),
            guild_id: GuildId(1),
            user_id: UserId(2),
        };

        assert_eq!(command.command_type(), "tracking.delete_user");
        assert_eq!(command.correlation_id(), Uuid::nil());
    }
}
