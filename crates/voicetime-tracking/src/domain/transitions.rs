//! Classification of voice state notifications into transitions.

use serde::{Deserialize, Serialize};
use voicetime_core::ids::{ChannelId, GuildId};
use voicetime_core::platform::{MemberInfo, VoiceState};

use super::events::FlagSource;

/// A before/after pair for one member, as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    /// Guild the member belongs to.
    pub guild_id: GuildId,
    /// The member whose presence changed.
    pub member: MemberInfo,
    /// Presence before the change.
    #[serde(default)]
    pub before: VoiceState,
    /// Presence after the change.
    #[serde(default)]
    pub after: VoiceState,
}

/// A classified change between two voice presence snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    Join { channel_id: ChannelId },
    Leave { channel_id: ChannelId },
    Switch { from: ChannelId, to: ChannelId },
    Mute { source: FlagSource },
    Unmute { source: FlagSource },
    Deafen { source: FlagSource },
    Undeafen { source: FlagSource },
    StreamStart,
    StreamStop,
}

/// Classifies a before/after pair.
///
/// At most one movement transition (join, leave or switch) is produced. The
/// mute, deaf and stream axes are evaluated independently, and only while the
/// member is connected in both snapshots: flags carried along with a join or
/// leave describe the connection itself, not a change. An empty result means
/// the notification is unhandled.
#[must_use]
pub fn classify(before: &VoiceState, after: &VoiceState) -> Vec<Transition> {
    let mut transitions = Vec::new();

    match (before.channel_id, after.channel_id) {
        (None, Some(channel_id)) => transitions.push(Transition::Join { channel_id }),
        (Some(channel_id), None) => transitions.push(Transition::Leave { channel_id }),
        (Some(from), Some(to)) if from != to => transitions.push(Transition::Switch { from, to }),
        _ => {}
    }

    if before.channel_id.is_none() || after.channel_id.is_none() {
        return transitions;
    }

    match (before.is_muted(), after.is_muted()) {
        (false, true) => transitions.push(Transition::Mute {
            source: flipped_source(before.server_mute, after.server_mute),
        }),
        (true, false) => transitions.push(Transition::Unmute {
            source: flipped_source(after.server_mute, before.server_mute),
        }),
        _ => {}
    }

    match (before.is_deafened(), after.is_deafened()) {
        (false, true) => transitions.push(Transition::Deafen {
            source: flipped_source(before.server_deaf, after.server_deaf),
        }),
        (true, false) => transitions.push(Transition::Undeafen {
            source: flipped_source(after.server_deaf, before.server_deaf),
        }),
        _ => {}
    }

    match (before.streaming, after.streaming) {
        (false, true) => transitions.push(Transition::StreamStart),
        (true, false) => transitions.push(Transition::StreamStop),
        _ => {}
    }

    transitions
}

/// `off` and `on` are the server flag on the side where the aggregate flag
/// was clear and set respectively.
fn flipped_source(off: bool, on: bool) -> FlagSource {
    if on && !off {
        FlagSource::Server
    } else {
        FlagSource::SelfInitiated
    }
}
