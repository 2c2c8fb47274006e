//! Voice presence cache fed by ingested notifications.
//!
//! The server has no gateway connection of its own. Every notification
//! posted to the ingest route carries the member's new state, which is
//! enough to answer the tracker's occupancy and membership lookups.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use voicetime_core::error::DomainError;
use voicetime_core::ids::{ChannelId, GuildId, UserId};
use voicetime_core::platform::{ChannelInfo, VoicePlatform, VoicePresence};
use voicetime_tracking::domain::transitions::VoiceStateUpdate;

/// Who is connected where, per guild.
#[derive(Debug, Default)]
pub struct PresenceCache {
    guilds: RwLock<HashMap<GuildId, BTreeMap<UserId, VoicePresence>>>,
}

impl PresenceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the `after` side of a notification.
    pub async fn record(&self, update: &VoiceStateUpdate) {
        let mut guilds = self.guilds.write().await;
        let guild = guilds.entry(update.guild_id).or_default();
        if update.after.channel_id.is_some() {
            guild.insert(
                update.member.user_id,
                VoicePresence {
                    member: update.member.clone(),
                    state: update.after,
                },
            );
        } else {
            guild.remove(&update.member.user_id);
        }
    }

    /// Drops every presence of a guild.
    pub async fn forget_guild(&self, guild_id: GuildId) {
        self.guilds.write().await.remove(&guild_id);
    }
}

#[async_trait]
impl VoicePlatform for PresenceCache {
    async fn channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelInfo>, DomainError> {
        let guilds = self.guilds.read().await;
        let members: Vec<UserId> = guilds
            .get(&guild_id)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|presence| presence.state.channel_id == Some(channel_id))
            .map(|presence| presence.member.user_id)
            .collect();
        // An empty channel has never been seen.
        Ok((!members.is_empty()).then_some(ChannelInfo {
            guild_id,
            channel_id,
            members,
        }))
    }

    async fn voice_members(&self, guild_id: GuildId) -> Result<Vec<VoicePresence>, DomainError> {
        Ok(self
            .guilds
            .read()
            .await
            .get(&guild_id)
            .map(|guild| guild.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn guild_available(&self, _guild_id: GuildId) -> Result<bool, DomainError> {
        // Outages are invisible without a gateway connection.
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use voicetime_core::platform::{MemberInfo, VoiceState};

    use super::*;

    fn update(user: u64, before: Option<u64>, after: Option<u64>) -> VoiceStateUpdate {
        VoiceStateUpdate {
            guild_id: GuildId(1),
            member: MemberInfo::new(UserId(user)),
            before: VoiceState {
                channel_id: before.map(ChannelId),
                ..VoiceState::default()
            },
            after: VoiceState {
                channel_id: after.map(ChannelId),
                ..VoiceState::default()
            },
        }
    }

    #[tokio::test]
    async fn test_channel_occupancy_follows_recorded_updates() {
        // Arrange
        let cache = PresenceCache::new();
        cache.record(&update(1, None, Some(10))).await;
        cache.record(&update(2, None, Some(10))).await;
        cache.record(&update(3, None, Some(20))).await;

        // Act
        cache.record(&update(3, Some(20), Some(10))).await;
        cache.record(&update(1, Some(10), None)).await;

        // Assert
        let info = cache.channel(GuildId(1), ChannelId(10)).await.unwrap().unwrap();
        assert_eq!(info.members, vec![UserId(2), UserId(3)]);
        assert!(cache.channel(GuildId(1), ChannelId(20)).await.unwrap().is_none());
        assert_eq!(cache.voice_members(GuildId(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_forget_guild_clears_presences() {
        let cache = PresenceCache::new();
        cache.record(&update(1, None, Some(10))).await;

        cache.forget_guild(GuildId(1)).await;

        assert!(cache.voice_members(GuildId(1)).await.unwrap().is_empty());
        assert!(cache.guild_available(GuildId(1)).await.unwrap());
    }
}
