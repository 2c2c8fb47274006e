//! Domain events for voice session accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use voicetime_core::event::{DomainEvent, EventMetadata};
use voicetime_core::ids::{ChannelId, GuildId, UserId};
use voicetime_core::platform::VoiceState;

/// Point-in-time view of a user's totals, carried as before/after pairs so
/// listeners can compute deltas without querying the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// The user.
    pub user_id: UserId,
    /// Sum of all channel times, in milliseconds.
    pub total_voice_time: u64,
    /// Experience points.
    pub xp: u64,
    /// Level.
    pub level: u64,
}

/// Who flipped a mute or deaf flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
    /// The member toggled it themselves.
    SelfInitiated,
    /// A moderator toggled it.
    Server,
}

/// Emitted when a session is opened in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceJoined {
    /// The channel joined.
    pub channel_id: ChannelId,
    /// True when the user had no session in any channel before.
    pub first_session: bool,
    /// User state after the join.
    pub user: UserSnapshot,
}

/// Emitted when a session is closed and its time credited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceLeft {
    /// The channel left.
    pub channel_id: ChannelId,
    /// Milliseconds credited by closing the session.
    pub elapsed: u64,
    /// User state before the leave.
    pub before: UserSnapshot,
    /// User state after the leave.
    pub after: UserSnapshot,
}

/// Emitted once per channel switch, in place of separate leave and join
/// events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSwitched {
    /// The channel left.
    pub from_channel_id: ChannelId,
    /// The channel joined.
    pub to_channel_id: ChannelId,
    /// Milliseconds credited to the channel left.
    pub elapsed: u64,
    /// Whether a session was opened in the destination channel.
    pub joined: bool,
    /// User state before the switch.
    pub before: UserSnapshot,
    /// User state after the switch.
    pub after: UserSnapshot,
}

/// Emitted for mute, unmute, deafen and undeafen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceFlagChanged {
    /// The channel the member is in.
    pub channel_id: Option<ChannelId>,
    /// Who flipped the flag.
    pub source: FlagSource,
    /// Milliseconds credited when the change paused tracking.
    pub elapsed: Option<u64>,
    /// Whether the change resumed tracking.
    pub resumed: bool,
    /// User state before the change.
    pub before: UserSnapshot,
    /// User state after the change.
    pub after: UserSnapshot,
}

/// Emitted when a sweep tick credits time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceTimeAdded {
    /// The channel credited.
    pub channel_id: ChannelId,
    /// Milliseconds added.
    pub amount: u64,
    /// User state before the credit.
    pub before: UserSnapshot,
    /// User state after the credit.
    pub after: UserSnapshot,
}

/// Emitted when a sweep tick awards xp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpAdded {
    /// Experience added.
    pub amount: u64,
    /// User state before the award.
    pub before: UserSnapshot,
    /// User state after the award.
    pub after: UserSnapshot,
}

/// Emitted when an xp award raises the level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelledUp {
    /// Level before the award.
    pub old_level: u64,
    /// Level after the award.
    pub new_level: u64,
    /// User state before the award.
    pub before: UserSnapshot,
    /// User state after the award.
    pub after: UserSnapshot,
}

/// Emitted when a voice state notification matched no transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhandledVoiceState {
    /// The member the notification was about.
    pub user_id: UserId,
    /// Voice state before.
    pub before: VoiceState,
    /// Voice state after.
    pub after: VoiceState,
}

/// Event type identifier for [`TrackerEventKind::UserVoiceJoin`].
pub const USER_VOICE_JOIN_EVENT_TYPE: &str = "userVoiceJoin";
/// Event type identifier for [`TrackerEventKind::UserVoiceLeave`].
pub const USER_VOICE_LEAVE_EVENT_TYPE: &str = "userVoiceLeave";
/// Event type identifier for [`TrackerEventKind::UserVoiceSwitch`].
pub const USER_VOICE_SWITCH_EVENT_TYPE: &str = "userVoiceSwitch";
/// Event type identifier for [`TrackerEventKind::UserVoiceMute`].
pub const USER_VOICE_MUTE_EVENT_TYPE: &str = "userVoiceMute";
/// Event type identifier for [`TrackerEventKind::UserVoiceUnMute`].
pub const USER_VOICE_UNMUTE_EVENT_TYPE: &str = "userVoiceUnMute";
/// Event type identifier for [`TrackerEventKind::UserVoiceDeaf`].
pub const USER_VOICE_DEAF_EVENT_TYPE: &str = "userVoiceDeaf";
/// Event type identifier for [`TrackerEventKind::UserVoiceUndeaf`].
pub const USER_VOICE_UNDEAF_EVENT_TYPE: &str = "userVoiceUndeaf";
/// Event type identifier for [`TrackerEventKind::UserVoiceTimeAdd`].
pub const USER_VOICE_TIME_ADD_EVENT_TYPE: &str = "userVoiceTimeAdd";
/// Event type identifier for [`TrackerEventKind::UserXpAdd`].
pub const USER_XP_ADD_EVENT_TYPE: &str = "userXpAdd";
/// Event type identifier for [`TrackerEventKind::UserLevelUp`].
pub const USER_LEVEL_UP_EVENT_TYPE: &str = "userLevelUp";
/// Event type identifier for [`TrackerEventKind::UnhandledVoiceStateUpdate`].
pub const UNHANDLED_VOICE_STATE_UPDATE_EVENT_TYPE: &str = "unhandledVoiceStateUpdate";

/// Event payload variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerEventKind {
    UserVoiceJoin(VoiceJoined),
    UserVoiceLeave(VoiceLeft),
    UserVoiceSwitch(VoiceSwitched),
    UserVoiceMute(VoiceFlagChanged),
    UserVoiceUnMute(VoiceFlagChanged),
    UserVoiceDeaf(VoiceFlagChanged),
    UserVoiceUndeaf(VoiceFlagChanged),
    UserVoiceTimeAdd(VoiceTimeAdded),
    UserXpAdd(XpAdded),
    UserLevelUp(LevelledUp),
    UnhandledVoiceStateUpdate(UnhandledVoiceState),
}

impl TrackerEventKind {
    /// Returns the routing name of this payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserVoiceJoin(_) => USER_VOICE_JOIN_EVENT_TYPE,
            Self::UserVoiceLeave(_) => USER_VOICE_LEAVE_EVENT_TYPE,
            Self::UserVoiceSwitch(_) => USER_VOICE_SWITCH_EVENT_TYPE,
            Self::UserVoiceMute(_) => USER_VOICE_MUTE_EVENT_TYPE,
            Self::UserVoiceUnMute(_) => USER_VOICE_UNMUTE_EVENT_TYPE,
            Self::UserVoiceDeaf(_) => USER_VOICE_DEAF_EVENT_TYPE,
            Self::UserVoiceUndeaf(_) => USER_VOICE_UNDEAF_EVENT_TYPE,
            Self::UserVoiceTimeAdd(_) => USER_VOICE_TIME_ADD_EVENT_TYPE,
            Self::UserXpAdd(_) => USER_XP_ADD_EVENT_TYPE,
            Self::UserLevelUp(_) => USER_LEVEL_UP_EVENT_TYPE,
            Self::UnhandledVoiceStateUpdate(_) => UNHANDLED_VOICE_STATE_UPDATE_EVENT_TYPE,
        }
    }
}

/// Domain event envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// The user the event concerns.
    pub user_id: UserId,
    /// Event-specific payload.
    pub kind: TrackerEventKind,
}

impl TrackerEvent {
    /// Wraps a payload in a fresh envelope.
    #[must_use]
    pub fn new(
        guild_id: GuildId,
        user_id: UserId,
        correlation_id: Uuid,
        occurred_at: DateTime<Utc>,
        kind: TrackerEventKind,
    ) -> Self {
        Self {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: kind.event_type().to_owned(),
                guild_id,
                correlation_id,
                occurred_at,
            },
            user_id,
            kind,
        }
    }
}

impl DomainEvent for TrackerEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        // Serialization of derived Serialize types to Value is infallible.
        serde_json::to_value(&self.kind).expect("TrackerEventKind serialization is infallible")
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
