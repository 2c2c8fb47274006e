//! Guild repository abstraction and its serializable record shapes.
//!
//! A guild is the unit of persistence: every mutation of a guild's users,
//! sessions or config is followed by a write of the whole [`GuildRecord`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{ChannelId, GuildId, UserId};

/// Stored representation of one user's time in one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    /// Guild the channel belongs to.
    pub guild_id: GuildId,
    /// The voice channel.
    pub channel_id: ChannelId,
    /// Accumulated milliseconds spent in the channel.
    pub time_in_channel: u64,
}

/// Stored representation of a user's statistics within a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Guild the user belongs to.
    pub guild_id: GuildId,
    /// The user.
    pub user_id: UserId,
    /// Per-channel accumulated time.
    #[serde(default)]
    pub channels: Vec<ChannelRecord>,
    /// Sum of all channel times, in milliseconds.
    #[serde(default)]
    pub total_voice_time: u64,
    /// Experience points.
    #[serde(default)]
    pub xp: u64,
    /// Level derived from `xp`.
    #[serde(default)]
    pub level: u64,
    /// Blacklisted users never accumulate time or xp.
    #[serde(default)]
    pub is_blacklisted: bool,
}

/// Stored guild-level configuration. Absent fields fall back to the
/// manager-wide defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct GuildConfigRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_bots: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_all_channels: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_ids: Option<Vec<ChannelId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exempt_permissions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_mute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_deaf: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_user_count_to_participate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_user_count_to_participate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_xp_to_participate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_level_to_participate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_xp_to_participate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_level_to_participate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_time_tracking_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leveling_tracking_enabled: Option<bool>,
}

/// Stored representation of a guild: its users, its config and opaque extra
/// data owned by the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildRecord {
    /// The guild.
    pub guild_id: GuildId,
    /// Users with recorded activity.
    #[serde(default)]
    pub users: Vec<UserRecord>,
    /// Guild-level configuration overrides.
    #[serde(default)]
    pub config: GuildConfigRecord,
    /// Opaque application data.
    #[serde(default)]
    pub extra_data: serde_json::Value,
}

/// Repository trait implemented by every storage adapter.
#[async_trait]
pub trait GuildRepository: Send + Sync {
    /// Loads every stored guild. Adapters create empty storage when none
    /// exists yet.
    async fn get_all_guilds(&self) -> Result<Vec<GuildRecord>, DomainError>;

    /// Stores a guild that is not yet persisted.
    async fn save_guild(&self, record: &GuildRecord) -> Result<(), DomainError>;

    /// Replaces the stored state of an already persisted guild.
    async fn edit_guild(&self, record: &GuildRecord) -> Result<(), DomainError>;

    /// Deletes a guild, returning whether it existed.
    async fn delete_guild(&self, guild_id: GuildId) -> Result<bool, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guild_record_uses_camel_case_field_names() {
        // Arrange
        let record = GuildRecord {
            guild_id: GuildId(1),
            users: vec![UserRecord {
                guild_id: GuildId(1),
                user_id: UserId(2),
                channels: vec![ChannelRecord {
                    guild_id: GuildId(1),
                    channel_id: ChannelId(3),
                    time_in_channel: 60_000,
                }],
                total_voice_time: 60_000,
                xp: 100,
                level: 1,
                is_blacklisted: false,
            }],
            config: GuildConfigRecord {
                track_bots: Some(false),
                ..GuildConfigRecord::default()
            },
            extra_data: serde_json::Value::Null,
        };

        // Act
        let json = serde_json::to_value(&record).unwrap();

        // Assert
        assert_eq!(json["guildId"], 1);
        assert_eq!(json["users"][0]["totalVoiceTime"], 60_000);
        assert_eq!(json["users"][0]["channels"][0]["timeInChannel"], 60_000);
        assert_eq!(json["config"]["trackBots"], false);
        assert!(json["config"].get("trackMute").is_none());
    }

    #[test]
    fn test_guild_record_tolerates_missing_optional_sections() {
        let record: GuildRecord = serde_json::from_str(r#"{"guildId": 9}"#).unwrap();

        assert_eq!(record.guild_id, GuildId(9));
        assert!(record.users.is_empty());
        assert_eq!(record.config, GuildConfigRecord::default());
        assert!(record.extra_data.is_null());
    }
}
