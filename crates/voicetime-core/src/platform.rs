//! Chat-platform collaborator abstraction.
//!
//! The engine never talks to the platform gateway directly. It receives voice
//! state notifications as plain values and looks up channel occupancy and the
//! members currently in voice through [`VoicePlatform`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{ChannelId, GuildId, UserId};

/// Snapshot of one member's voice presence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct VoiceState {
    /// The occupied voice channel, if any.
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    /// Muted by the member.
    #[serde(default)]
    pub self_mute: bool,
    /// Muted by a moderator.
    #[serde(default)]
    pub server_mute: bool,
    /// Deafened by the member.
    #[serde(default)]
    pub self_deaf: bool,
    /// Deafened by a moderator.
    #[serde(default)]
    pub server_deaf: bool,
    /// Streaming (screen share or camera).
    #[serde(default)]
    pub streaming: bool,
}

impl VoiceState {
    /// Returns true when the member is self- or server-muted.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.self_mute || self.server_mute
    }

    /// Returns true when the member is self- or server-deafened.
    #[must_use]
    pub fn is_deafened(&self) -> bool {
        self.self_deaf || self.server_deaf
    }
}

/// Member attributes relevant to tracking eligibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// The member.
    pub user_id: UserId,
    /// Whether the member is a bot account.
    #[serde(default)]
    pub is_bot: bool,
    /// Permission identifiers held by the member.
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

impl MemberInfo {
    /// Creates a non-bot member without permissions.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            is_bot: false,
            permissions: BTreeSet::new(),
        }
    }
}

/// Current occupancy of a voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Guild owning the channel.
    pub guild_id: GuildId,
    /// The channel.
    pub channel_id: ChannelId,
    /// Members currently connected.
    pub members: Vec<UserId>,
}

impl ChannelInfo {
    /// Number of connected members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// A member currently connected to voice, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoicePresence {
    /// The connected member.
    pub member: MemberInfo,
    /// Their current voice state.
    pub state: VoiceState,
}

/// Lookups the engine needs from the chat platform.
#[async_trait]
pub trait VoicePlatform: Send + Sync {
    /// Returns the occupancy of a channel, or `None` when unknown.
    async fn channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelInfo>, DomainError>;

    /// Returns every member currently connected to a voice channel in the
    /// guild.
    async fn voice_members(&self, guild_id: GuildId) -> Result<Vec<VoicePresence>, DomainError>;

    /// Returns whether the guild is still reachable through the platform.
    async fn guild_available(&self, guild_id: GuildId) -> Result<bool, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_state_mute_and_deaf_flags_combine_sources() {
        let self_muted = VoiceState {
            self_mute: true,
            ..VoiceState::default()
        };
        let server_deafened = VoiceState {
            server_deaf: true,
            ..VoiceState::default()
        };

        assert!(self_muted.is_muted());
        assert!(!self_muted.is_deafened());
        assert!(server_deafened.is_deafened());
        assert!(!server_deafened.is_muted());
    }
}
