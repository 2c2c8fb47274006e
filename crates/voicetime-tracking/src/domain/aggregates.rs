//! Aggregate roots for the voice tracking context.
//!
//! A [`GuildAggregate`] owns its config and users; a [`UserAggregate`] owns
//! one [`ChannelSession`] per channel it has ever been credited in. A session
//! is open while `opened_at` is set. At most one session per user is open.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use voicetime_core::aggregate::AggregateRoot;
use voicetime_core::clock::elapsed_millis;
use voicetime_core::error::DomainError;
use voicetime_core::ids::{ChannelId, GuildId, UserId};
use voicetime_core::repository::{ChannelRecord, GuildRecord, UserRecord};

use super::commands::{ChannelTimePatch, GuildConfigPatch};
use super::config::{GuildConfig, TrackerDefaults};
use super::events::{TrackerEvent, UserSnapshot};
use super::policy::level_for_xp;

/// Accumulated time for one (guild, user, channel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSession {
    guild_id: GuildId,
    channel_id: ChannelId,
    time_in_channel: u64,
    opened_at: Option<DateTime<Utc>>,
}

impl ChannelSession {
    /// Creates a closed session with no time.
    #[must_use]
    pub fn new(guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            guild_id,
            channel_id,
            time_in_channel: 0,
            opened_at: None,
        }
    }

    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Accumulated milliseconds.
    #[must_use]
    pub fn time_in_channel(&self) -> u64 {
        self.time_in_channel
    }

    /// When the open session started, if one is open.
    #[must_use]
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.opened_at = Some(now);
    }

    /// Closes the session, crediting the time since it was opened.
    fn close(&mut self, now: DateTime<Utc>) -> Option<u64> {
        let opened_at = self.opened_at.take()?;
        let elapsed = elapsed_millis(opened_at, now);
        self.add_time(elapsed);
        Some(elapsed)
    }

    /// Closes the session without crediting anything.
    fn discard(&mut self) -> bool {
        self.opened_at.take().is_some()
    }

    fn add_time(&mut self, millis: u64) {
        self.time_in_channel = self.time_in_channel.saturating_add(millis);
    }

    fn to_record(&self) -> ChannelRecord {
        ChannelRecord {
            guild_id: self.guild_id,
            channel_id: self.channel_id,
            time_in_channel: self.time_in_channel,
        }
    }
}

/// One user's statistics within a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAggregate {
    guild_id: GuildId,
    user_id: UserId,
    channels: BTreeMap<ChannelId, ChannelSession>,
    total_voice_time: u64,
    xp: u64,
    level: u64,
    is_blacklisted: bool,
    /// Bot flag from the member that last opened a session. Not stored.
    is_bot: bool,
}

impl UserAggregate {
    /// Creates a user without any recorded activity.
    #[must_use]
    pub fn new(guild_id: GuildId, user_id: UserId) -> Self {
        Self {
            guild_id,
            user_id,
            channels: BTreeMap::new(),
            total_voice_time: 0,
            xp: 0,
            level: 0,
            is_blacklisted: false,
            is_bot: false,
        }
    }

    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Sessions keyed by channel.
    #[must_use]
    pub fn channels(&self) -> &BTreeMap<ChannelId, ChannelSession> {
        &self.channels
    }

    #[must_use]
    pub fn channel(&self, channel_id: ChannelId) -> Option<&ChannelSession> {
        self.channels.get(&channel_id)
    }

    /// Sum of all channel times, in milliseconds.
    #[must_use]
    pub fn total_voice_time(&self) -> u64 {
        self.total_voice_time
    }

    #[must_use]
    pub fn xp(&self) -> u64 {
        self.xp
    }

    #[must_use]
    pub fn level(&self) -> u64 {
        self.level
    }

    #[must_use]
    pub fn is_blacklisted(&self) -> bool {
        self.is_blacklisted
    }

    /// True once the user has a session in any channel.
    #[must_use]
    pub fn has_sessions(&self) -> bool {
        !self.channels.is_empty()
    }

    /// The channel holding the open session, if any.
    #[must_use]
    pub fn open_channel(&self) -> Option<ChannelId> {
        self.channels
            .values()
            .find(|session| session.is_open())
            .map(ChannelSession::channel_id)
    }

    /// Opens a session in `channel_id`. Any other open session is discarded
    /// without credit; callers close it first when it should be credited.
    pub fn open_session(&mut self, channel_id: ChannelId, now: DateTime<Utc>) {
        self.discard_sessions_except(channel_id);
        let guild_id = self.guild_id;
        self.channels
            .entry(channel_id)
            .or_insert_with(|| ChannelSession::new(guild_id, channel_id))
            .open(now);
    }

    /// Closes the session in `channel_id`. With `credit`, the time since it
    /// was opened is added to the channel. Returns the credited
    /// milliseconds, or `None` when no session was open there.
    pub fn close_session(
        &mut self,
        channel_id: ChannelId,
        now: DateTime<Utc>,
        credit: bool,
    ) -> Option<u64> {
        let session = self.channels.get_mut(&channel_id)?;
        let credited = if credit {
            session.close(now)
        } else {
            session.discard().then_some(0)
        };
        self.recompute_total();
        credited
    }

    /// Credits one sweep tick to `channel_id` and restarts its open session
    /// at `now`, so that a later close only credits time after the tick.
    pub fn credit_tick(&mut self, channel_id: ChannelId, millis: u64, now: DateTime<Utc>) {
        self.discard_sessions_except(channel_id);
        let guild_id = self.guild_id;
        let session = self
            .channels
            .entry(channel_id)
            .or_insert_with(|| ChannelSession::new(guild_id, channel_id));
        session.add_time(millis);
        session.open(now);
        self.recompute_total();
    }

    /// Adds xp and recomputes the level. Returns the old and new level.
    pub fn add_xp(&mut self, amount: u64, level_multiplier: f64) -> (u64, u64) {
        let old_level = self.level;
        self.set_xp(self.xp.saturating_add(amount), level_multiplier);
        (old_level, self.level)
    }

    /// Sets xp and recomputes the level.
    pub fn set_xp(&mut self, xp: u64, level_multiplier: f64) {
        self.xp = xp;
        self.level = level_for_xp(xp, level_multiplier);
    }

    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.is_bot
    }

    pub fn set_bot(&mut self, is_bot: bool) {
        self.is_bot = is_bot;
    }

    pub fn set_blacklisted(&mut self, is_blacklisted: bool) {
        self.is_blacklisted = is_blacklisted;
    }

    /// Replaces every channel time. Listed channels keep an open session if
    /// they had one; unlisted channels are dropped.
    pub fn replace_channel_times(&mut self, times: &[ChannelTimePatch]) {
        let mut channels = BTreeMap::new();
        for entry in times {
            let mut session = self
                .channels
                .remove(&entry.channel_id)
                .unwrap_or_else(|| ChannelSession::new(self.guild_id, entry.channel_id));
            session.time_in_channel = entry.time_in_channel;
            channels.insert(entry.channel_id, session);
        }
        self.channels = channels;
        self.recompute_total();
    }

    /// Current totals, for event payloads.
    #[must_use]
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            user_id: self.user_id,
            total_voice_time: self.total_voice_time,
            xp: self.xp,
            level: self.level,
        }
    }

    /// Converts the user into its stored form. Open sessions are not
    /// stored.
    #[must_use]
    pub fn to_record(&self) -> UserRecord {
        UserRecord {
            guild_id: self.guild_id,
            user_id: self.user_id,
            channels: self.channels.values().map(ChannelSession::to_record).collect(),
            total_voice_time: self.total_voice_time,
            xp: self.xp,
            level: self.level,
            is_blacklisted: self.is_blacklisted,
        }
    }

    /// Rebuilds a user from its stored form. Every session starts closed and
    /// the total is recomputed from the channels.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MalformedStore` when a guild id does not match
    /// its owner or a channel appears twice.
    pub fn from_record(guild_id: GuildId, record: &UserRecord) -> Result<Self, DomainError> {
        if record.guild_id != guild_id {
            return Err(DomainError::MalformedStore(format!(
                "user {} is stored under guild {} but belongs to guild {}",
                record.user_id, guild_id, record.guild_id
            )));
        }
        let mut channels = BTreeMap::new();
        for channel in &record.channels {
            if channel.guild_id != guild_id {
                return Err(DomainError::MalformedStore(format!(
                    "channel {} of user {} belongs to guild {}, expected {}",
                    channel.channel_id, record.user_id, channel.guild_id, guild_id
                )));
            }
            let session = ChannelSession {
                guild_id,
                channel_id: channel.channel_id,
                time_in_channel: channel.time_in_channel,
                opened_at: None,
            };
            if channels.insert(channel.channel_id, session).is_some() {
                return Err(DomainError::MalformedStore(format!(
                    "channel {} appears twice for user {}",
                    channel.channel_id, record.user_id
                )));
            }
        }
        let mut user = Self {
            guild_id,
            user_id: record.user_id,
            channels,
            total_voice_time: 0,
            xp: record.xp,
            level: record.level,
            is_blacklisted: record.is_blacklisted,
            is_bot: false,
        };
        user.recompute_total();
        Ok(user)
    }

    fn discard_sessions_except(&mut self, channel_id: ChannelId) {
        for session in self.channels.values_mut() {
            if session.channel_id != channel_id {
                session.discard();
            }
        }
    }

    fn recompute_total(&mut self) {
        self.total_voice_time = self
            .channels
            .values()
            .fold(0u64, |total, session| total.saturating_add(session.time_in_channel));
    }
}

/// The aggregate root for one guild: the unit of persistence.
#[derive(Debug)]
pub struct GuildAggregate {
    guild_id: GuildId,
    config: GuildConfig,
    users: BTreeMap<UserId, UserAggregate>,
    extra_data: serde_json::Value,
    /// Whether storage already holds a record for this guild.
    persisted: bool,
    /// Whether in-memory state differs from the last successful write.
    dirty: bool,
    /// Set once the guild is deleted; a handle cloned before that must not
    /// write it back.
    deleted: bool,
    uncommitted_events: Vec<TrackerEvent>,
}

impl GuildAggregate {
    /// Creates a guild with the default config. It starts dirty so that the
    /// first commit stores it.
    #[must_use]
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            config: GuildConfig::default(),
            users: BTreeMap::new(),
            extra_data: serde_json::Value::Null,
            persisted: false,
            dirty: true,
            deleted: false,
            uncommitted_events: Vec::new(),
        }
    }

    /// Rebuilds a guild loaded from storage.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MalformedStore` when a user appears twice or
    /// belongs to another guild.
    pub fn from_record(record: &GuildRecord) -> Result<Self, DomainError> {
        let mut users = BTreeMap::new();
        for user_record in &record.users {
            let user = UserAggregate::from_record(record.guild_id, user_record)?;
            if users.insert(user.user_id, user).is_some() {
                return Err(DomainError::MalformedStore(format!(
                    "user {} appears twice in guild {}",
                    user_record.user_id, record.guild_id
                )));
            }
        }
        Ok(Self {
            guild_id: record.guild_id,
            config: GuildConfig::from_record(&record.config),
            users,
            extra_data: record.extra_data.clone(),
            persisted: true,
            dirty: false,
            deleted: false,
            uncommitted_events: Vec::new(),
        })
    }

    /// Converts the guild into its stored form.
    #[must_use]
    pub fn to_record(&self) -> GuildRecord {
        GuildRecord {
            guild_id: self.guild_id,
            users: self.users.values().map(UserAggregate::to_record).collect(),
            config: self.config.to_record(),
            extra_data: self.extra_data.clone(),
        }
    }

    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    #[must_use]
    pub fn config(&self) -> &GuildConfig {
        &self.config
    }

    #[must_use]
    pub fn extra_data(&self) -> &serde_json::Value {
        &self.extra_data
    }

    #[must_use]
    pub fn users(&self) -> &BTreeMap<UserId, UserAggregate> {
        &self.users
    }

    #[must_use]
    pub fn user(&self, user_id: UserId) -> Option<&UserAggregate> {
        self.users.get(&user_id)
    }

    /// Mutable access to an existing user. Marks the guild dirty.
    pub fn user_mut(&mut self, user_id: UserId) -> Option<&mut UserAggregate> {
        let user = self.users.get_mut(&user_id)?;
        self.dirty = true;
        Some(user)
    }

    /// Mutable access to a user, creating it when unknown. Marks the guild
    /// dirty.
    pub fn user_or_insert(&mut self, user_id: UserId) -> &mut UserAggregate {
        self.dirty = true;
        let guild_id = self.guild_id;
        self.users
            .entry(user_id)
            .or_insert_with(|| UserAggregate::new(guild_id, user_id))
    }

    /// Removes a user, returning it when it existed.
    pub fn remove_user(&mut self, user_id: UserId) -> Option<UserAggregate> {
        let removed = self.users.remove(&user_id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Applies a config patch and replaces the extra data when the patch
    /// carries it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` when the merged config has inverted
    /// bounds; nothing is changed in that case.
    pub fn apply_config_patch(
        &mut self,
        patch: &GuildConfigPatch,
        defaults: &TrackerDefaults,
    ) -> Result<(), DomainError> {
        self.config.apply_patch(patch, defaults)?;
        if let Some(extra_data) = &patch.extra_data {
            self.extra_data = extra_data.clone();
        }
        self.dirty = true;
        Ok(())
    }

    pub fn record_events(&mut self, events: impl IntoIterator<Item = TrackerEvent>) {
        self.uncommitted_events.extend(events);
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Records a successful write.
    pub fn mark_persisted(&mut self) {
        self.persisted = true;
        self.dirty = false;
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

impl AggregateRoot for GuildAggregate {
    type Id = GuildId;
    type Event = TrackerEvent;

    fn aggregate_id(&self) -> GuildId {
        self.guild_id
    }

    fn uncommitted_events(&self) -> &[TrackerEvent] {
        &self.uncommitted_events
    }

    fn take_uncommitted_events(&mut self) -> Vec<TrackerEvent> {
        std::mem::take(&mut self.uncommitted_events)
    }
}
