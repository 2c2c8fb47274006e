//! Voice state handlers.
//!
//! A notification is classified into transitions and every transition runs
//! through one routine against the locked guild. Eligibility gates decide
//! whether a session may open. Closing always happens, but time is only
//! credited, and events only emitted, while the member may accumulate time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;
use voicetime_core::ids::{ChannelId, UserId};

use crate::application::tracker::VoiceTracker;
use crate::domain::aggregates::{ChannelSession, GuildAggregate, UserAggregate};
use crate::domain::config::EffectiveConfig;
use crate::domain::events::{
    FlagSource, TrackerEvent, TrackerEventKind, UnhandledVoiceState, UserSnapshot, VoiceFlagChanged,
    VoiceJoined, VoiceLeft, VoiceSwitched,
};
use crate::domain::policy::TrackingPolicy;
use crate::domain::transitions::{Transition, VoiceStateUpdate, classify};

/// Outcome of one voice state notification.
#[derive(Debug)]
pub struct VoiceUpdateResult {
    /// Correlation id stamped on every event produced.
    pub correlation_id: Uuid,
    /// The transitions the notification was classified into.
    pub transitions: Vec<Transition>,
    /// The events published.
    pub events: Vec<TrackerEvent>,
}

/// Handles one before/after voice state notification.
///
/// Persistence failures are logged by the tracker and never reach the
/// caller; the in-memory mutation stands.
#[instrument(
    skip(update, tracker),
    fields(guild_id = %update.guild_id, user_id = %update.member.user_id)
)]
pub async fn handle_voice_state_update(
    update: &VoiceStateUpdate,
    tracker: &VoiceTracker,
) -> VoiceUpdateResult {
    let correlation_id = Uuid::new_v4();
    let transitions = classify(&update.before, &update.after);

    let handle = tracker.guild_or_create(update.guild_id).await;
    let mut guild = handle.lock().await;

    let mut pass = TransitionPass {
        tracker,
        update,
        correlation_id,
        now: tracker.now(),
        config: tracker.effective_config(&guild),
        policy: tracker.policy_for(update.guild_id),
        events: Vec::new(),
    };

    if transitions.is_empty() {
        debug!("voice state update matched no transition");
        pass.emit(TrackerEventKind::UnhandledVoiceStateUpdate(
            UnhandledVoiceState {
                user_id: update.member.user_id,
                before: update.before,
                after: update.after,
            },
        ));
    }
    for transition in &transitions {
        pass.apply(&mut guild, *transition).await;
    }

    let TransitionPass { events, .. } = pass;
    guild.record_events(events);
    let events = tracker.commit(&mut guild).await;

    VoiceUpdateResult {
        correlation_id,
        transitions,
        events,
    }
}

/// A session closed with credit.
struct Closed {
    channel_id: ChannelId,
    elapsed: u64,
    before: UserSnapshot,
    after: UserSnapshot,
}

impl Closed {
    fn into_left(self) -> VoiceLeft {
        VoiceLeft {
            channel_id: self.channel_id,
            elapsed: self.elapsed,
            before: self.before,
            after: self.after,
        }
    }
}

/// A session opened after passing every gate.
struct Opened {
    first_session: bool,
    user: UserSnapshot,
}

/// State shared by the transitions of one notification.
struct TransitionPass<'a> {
    tracker: &'a VoiceTracker,
    update: &'a VoiceStateUpdate,
    correlation_id: Uuid,
    now: DateTime<Utc>,
    config: EffectiveConfig,
    policy: Arc<dyn TrackingPolicy>,
    events: Vec<TrackerEvent>,
}

impl TransitionPass<'_> {
    fn user_id(&self) -> UserId {
        self.update.member.user_id
    }

    fn emit(&mut self, kind: TrackerEventKind) {
        self.events.push(TrackerEvent::new(
            self.update.guild_id,
            self.user_id(),
            self.correlation_id,
            self.now,
            kind,
        ));
    }

    async fn apply(&mut self, guild: &mut GuildAggregate, transition: Transition) {
        match transition {
            Transition::Join { channel_id } => self.join(guild, channel_id).await,
            Transition::Leave { channel_id } => self.leave(guild, channel_id),
            Transition::Switch { from, to } => self.switch(guild, from, to).await,
            Transition::Mute { source } => {
                self.pause(guild, source, self.config.track_mute, TrackerEventKind::UserVoiceMute);
            }
            Transition::Unmute { source } => {
                self.resume(
                    guild,
                    source,
                    self.config.track_mute,
                    TrackerEventKind::UserVoiceUnMute,
                )
                .await;
            }
            Transition::Deafen { source } => {
                self.pause(guild, source, self.config.track_deaf, TrackerEventKind::UserVoiceDeaf);
            }
            Transition::Undeafen { source } => {
                self.resume(
                    guild,
                    source,
                    self.config.track_deaf,
                    TrackerEventKind::UserVoiceUndeaf,
                )
                .await;
            }
            Transition::StreamStart | Transition::StreamStop => {
                debug!(?transition, "stream transitions do not affect accounting");
            }
        }
    }

    async fn join(&mut self, guild: &mut GuildAggregate, channel_id: ChannelId) {
        // A session still open here means the leave was never delivered. It
        // is flushed whether or not the new channel is tracked.
        self.flush_stale(guild);
        let Some(opened) = self.open(guild, channel_id).await else {
            self.report_suppressed_join(guild, channel_id);
            return;
        };
        self.emit(TrackerEventKind::UserVoiceJoin(VoiceJoined {
            channel_id,
            first_session: opened.first_session,
            user: opened.user,
        }));
    }

    /// A member arriving muted or deafened where that state is not tracked
    /// gets the matching flag event instead of a join.
    fn report_suppressed_join(&mut self, guild: &GuildAggregate, channel_id: ChannelId) {
        let after = self.update.after;
        let suppressed: Option<(fn(VoiceFlagChanged) -> TrackerEventKind, bool)> =
            if !self.config.track_mute && after.is_muted() {
                Some((TrackerEventKind::UserVoiceMute, after.server_mute))
            } else if !self.config.track_deaf && after.is_deafened() {
                Some((TrackerEventKind::UserVoiceDeaf, after.server_deaf))
            } else {
                None
            };
        let Some((kind, by_server)) = suppressed.filter(|_| self.may_credit(guild)) else {
            debug!(%channel_id, "member not eligible for tracking in channel");
            return;
        };
        let user = self.snapshot(guild);
        self.emit(kind(VoiceFlagChanged {
            channel_id: Some(channel_id),
            source: if by_server {
                FlagSource::Server
            } else {
                FlagSource::SelfInitiated
            },
            elapsed: None,
            resumed: false,
            before: user,
            after: user,
        }));
    }

    /// Closes the session in the channel being left. A session open in any
    /// other channel is left for the next join or sweep to flush.
    fn leave(&mut self, guild: &mut GuildAggregate, channel_id: ChannelId) {
        if let Some(closed) = self.close_in(guild, channel_id) {
            self.emit(TrackerEventKind::UserVoiceLeave(closed.into_left()));
        }
    }

    fn flush_stale(&mut self, guild: &mut GuildAggregate) {
        if let Some(stale) = self.close_open(guild) {
            self.emit(TrackerEventKind::UserVoiceLeave(stale.into_left()));
        }
    }

    async fn switch(&mut self, guild: &mut GuildAggregate, from: ChannelId, to: ChannelId) {
        let before = self.snapshot(guild);
        let closed = self.close_open(guild);
        let opened = self.open(guild, to).await;
        if closed.is_none() && opened.is_none() {
            return;
        }
        self.emit(TrackerEventKind::UserVoiceSwitch(VoiceSwitched {
            from_channel_id: from,
            to_channel_id: to,
            elapsed: closed.map_or(0, |closed| closed.elapsed),
            joined: opened.is_some(),
            before,
            after: self.snapshot(guild),
        }));
    }

    /// Mute or deafen. When the state is not tracked, the open session is
    /// closed as on a leave.
    fn pause(
        &mut self,
        guild: &mut GuildAggregate,
        source: FlagSource,
        tracked: bool,
        kind: fn(VoiceFlagChanged) -> TrackerEventKind,
    ) {
        let before = self.snapshot(guild);
        let elapsed = if tracked {
            None
        } else {
            self.close_open(guild).map(|closed| closed.elapsed)
        };
        if !self.may_credit(guild) {
            return;
        }
        self.emit(kind(VoiceFlagChanged {
            channel_id: self.update.after.channel_id,
            source,
            elapsed,
            resumed: false,
            before,
            after: self.snapshot(guild),
        }));
    }

    /// Unmute or undeafen. When the state is not tracked, a session is
    /// reopened in the current channel as on a join.
    async fn resume(
        &mut self,
        guild: &mut GuildAggregate,
        source: FlagSource,
        tracked: bool,
        kind: fn(VoiceFlagChanged) -> TrackerEventKind,
    ) {
        let before = self.snapshot(guild);
        let mut resumed = false;
        if let (false, Some(channel_id)) = (tracked, self.update.after.channel_id) {
            let already_open =
                guild.user(self.user_id()).and_then(UserAggregate::open_channel) == Some(channel_id);
            if !already_open {
                self.flush_stale(guild);
                resumed = self.open(guild, channel_id).await.is_some();
            }
        }
        if !self.may_credit(guild) {
            return;
        }
        self.emit(kind(VoiceFlagChanged {
            channel_id: self.update.after.channel_id,
            source,
            elapsed: None,
            resumed,
            before,
            after: self.snapshot(guild),
        }));
    }

    /// Opens a session in `channel_id` when the member and the channel pass
    /// every gate. Callers flush any session still open first.
    async fn open(&self, guild: &mut GuildAggregate, channel_id: ChannelId) -> Option<Opened> {
        if !self.may_open(guild, channel_id).await {
            return None;
        }
        let user = guild.user_or_insert(self.user_id());
        let first_session = !user.has_sessions();
        user.set_bot(self.update.member.is_bot);
        user.open_session(channel_id, self.now);
        Some(Opened {
            first_session,
            user: user.snapshot(),
        })
    }

    /// Closes whatever session is open.
    fn close_open(&self, guild: &mut GuildAggregate) -> Option<Closed> {
        let channel_id = guild.user(self.user_id())?.open_channel()?;
        self.close_in(guild, channel_id)
    }

    /// Closes the session in `channel_id` if one is open there. Returns the
    /// closure only when time was credited.
    fn close_in(&self, guild: &mut GuildAggregate, channel_id: ChannelId) -> Option<Closed> {
        let open_here = guild
            .user(self.user_id())?
            .channel(channel_id)
            .is_some_and(ChannelSession::is_open);
        if !open_here {
            return None;
        }
        let credit = self.may_credit(guild);
        let user = guild.user_mut(self.user_id())?;
        let before = user.snapshot();
        let elapsed = user.close_session(channel_id, self.now, credit)?;
        credit.then(|| Closed {
            channel_id,
            elapsed,
            before,
            after: user.snapshot(),
        })
    }

    fn may_credit(&self, guild: &GuildAggregate) -> bool {
        self.config
            .may_credit(self.update.member.is_bot, guild.user(self.user_id()))
    }

    async fn may_open(&self, guild: &GuildAggregate, channel_id: ChannelId) -> bool {
        if !self.may_credit(guild) {
            return false;
        }
        let probe;
        let user = if let Some(user) = guild.user(self.user_id()) {
            user
        } else {
            probe = UserAggregate::new(self.update.guild_id, self.user_id());
            &probe
        };
        if !self
            .config
            .check_member(&self.update.member, &self.update.after, user, &*self.policy)
        {
            return false;
        }
        let channel = self
            .tracker
            .channel_info(self.update.guild_id, channel_id, self.user_id())
            .await;
        self.config.check_channel(&channel, &*self.policy)
    }

    fn snapshot(&self, guild: &GuildAggregate) -> UserSnapshot {
        guild.user(self.user_id()).map_or_else(
            || UserAggregate::new(self.update.guild_id, self.user_id()).snapshot(),
            UserAggregate::snapshot,
        )
    }
}
