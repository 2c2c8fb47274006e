//! Fake platform — a scriptable `VoicePlatform` for tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use voicetime_core::error::DomainError;
use voicetime_core::ids::{ChannelId, GuildId, UserId};
use voicetime_core::platform::{ChannelInfo, MemberInfo, VoicePlatform, VoicePresence, VoiceState};

/// A platform whose voice presences are set directly by the test.
///
/// Channel occupancy is derived from the presences, so a test that places
/// three members in a channel gets a member count of three back.
#[derive(Debug, Default)]
pub struct FakePlatform {
    presences: Mutex<BTreeMap<GuildId, BTreeMap<UserId, VoicePresence>>>,
    unavailable: Mutex<HashSet<GuildId>>,
}

impl FakePlatform {
    /// Create a platform with nobody connected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a member's voice state. A state without a channel disconnects
    /// them.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn set_voice_state(&self, guild_id: GuildId, member: MemberInfo, state: VoiceState) {
        let mut presences = self.presences.lock().unwrap();
        let guild = presences.entry(guild_id).or_default();
        if state.channel_id.is_some() {
            guild.insert(member.user_id, VoicePresence { member, state });
        } else {
            guild.remove(&member.user_id);
        }
    }

    /// Connects a member to a channel with no mute or deaf flags.
    pub fn connect(&self, guild_id: GuildId, member: MemberInfo, channel_id: ChannelId) {
        self.set_voice_state(
            guild_id,
            member,
            VoiceState {
                channel_id: Some(channel_id),
                ..VoiceState::default()
            },
        );
    }

    /// Makes `guild_available` report false for the guild.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn mark_unavailable(&self, guild_id: GuildId) {
        self.unavailable.lock().unwrap().insert(guild_id);
    }
}

#[async_trait]
impl VoicePlatform for FakePlatform {
    async fn channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelInfo>, DomainError> {
        let presences = self.presences.lock().unwrap();
        let members = presences
            .get(&guild_id)
            .map(|guild| {
                guild
                    .values()
                    .filter(|p| p.state.channel_id == Some(channel_id))
                    .map(|p| p.member.user_id)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(ChannelInfo {
            guild_id,
            channel_id,
            members,
        }))
    }

    async fn voice_members(&self, guild_id: GuildId) -> Result<Vec<VoicePresence>, DomainError> {
        let presences = self.presences.lock().unwrap();
        Ok(presences
            .get(&guild_id)
            .map(|guild| guild.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn guild_available(&self, guild_id: GuildId) -> Result<bool, DomainError> {
        Ok(!self.unavailable.lock().unwrap().contains(&guild_id))
    }
}
