//! Reconciliation sweeper.
//!
//! On every tick each loaded guild is swept independently: members the
//! platform reports in voice are credited one tick of time and an xp draw,
//! and sessions left open in a channel the member is no longer in are
//! closed. A slow guild does not hold up the others.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use voicetime_core::error::DomainError;
use voicetime_core::ids::{ChannelId, GuildId, UserId};
use voicetime_core::platform::ChannelInfo;

use crate::application::tracker::VoiceTracker;
use crate::domain::aggregates::UserAggregate;
use crate::domain::events::{
    LevelledUp, TrackerEvent, TrackerEventKind, VoiceLeft, VoiceTimeAdded, XpAdded,
};

/// Summary of one sweep over every guild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Guilds swept successfully.
    pub swept: usize,
    /// Guilds deleted because the platform no longer reaches them.
    pub deleted: usize,
    /// Guilds whose sweep failed.
    pub failed: usize,
}

/// Outcome of sweeping one guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildSweep {
    Swept,
    Deleted,
}

/// Starts the periodic sweep. The task stops once `shutdown` carries `true`
/// or its sender is dropped; a sweep already running is finished first.
#[must_use]
pub fn spawn_sweeper(
    tracker: Arc<VoiceTracker>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = tracker.options().sweep_interval.max(Duration::from_millis(1));
        info!(interval = ?period, "starting sweeper");

        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    let report = sweep_all(&tracker).await;
                    debug!(?report, "sweep finished");
                }
            }
        }

        info!("sweeper stopped");
    })
}

/// Sweeps every loaded guild concurrently.
pub async fn sweep_all(tracker: &Arc<VoiceTracker>) -> SweepReport {
    let correlation_id = Uuid::new_v4();
    let mut tasks = JoinSet::new();
    for guild_id in tracker.guild_ids().await {
        let tracker = Arc::clone(tracker);
        tasks.spawn(async move {
            let outcome = sweep_guild(&tracker, guild_id, correlation_id).await;
            (guild_id, outcome)
        });
    }

    let mut report = SweepReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(GuildSweep::Swept))) => report.swept += 1,
            Ok((_, Ok(GuildSweep::Deleted))) => report.deleted += 1,
            Ok((guild_id, Err(error))) => {
                warn!(%guild_id, %error, "guild sweep failed");
                report.failed += 1;
            }
            Err(error) => {
                error!(%error, "guild sweep task panicked");
                report.failed += 1;
            }
        }
    }
    report
}

/// Sweeps one guild.
///
/// # Errors
///
/// Returns `DomainError::Platform` when the voice member listing fails, or
/// `DomainError::Infrastructure` when the RNG is unusable. Time credited
/// before an RNG failure is still committed.
#[instrument(skip(tracker))]
pub async fn sweep_guild(
    tracker: &VoiceTracker,
    guild_id: GuildId,
    correlation_id: Uuid,
) -> Result<GuildSweep, DomainError> {
    if tracker.options().delete_unavailable_guilds {
        match tracker.guild_available(guild_id).await {
            Ok(false) => {
                info!("guild is no longer available; deleting it");
                if let Err(error) = tracker.delete_guild(guild_id).await {
                    error!(%error, "failed to delete unavailable guild from storage");
                }
                return Ok(GuildSweep::Deleted);
            }
            Ok(true) => {}
            Err(error) => warn!(%error, "guild availability check failed"),
        }
    }

    let presences = tracker.voice_members(guild_id).await?;
    let Some(handle) = tracker.guild_handle(guild_id).await else {
        return Ok(GuildSweep::Deleted);
    };
    let mut guild = handle.lock().await;

    let config = tracker.effective_config(&guild);
    let policy = tracker.policy_for(guild_id);
    let now = tracker.now();
    let event = |user_id: UserId, kind: TrackerEventKind| {
        TrackerEvent::new(guild_id, user_id, correlation_id, now, kind)
    };

    let mut occupancy: BTreeMap<ChannelId, Vec<UserId>> = BTreeMap::new();
    let mut current: BTreeMap<UserId, ChannelId> = BTreeMap::new();
    for presence in &presences {
        if let Some(channel_id) = presence.state.channel_id {
            occupancy
                .entry(channel_id)
                .or_default()
                .push(presence.member.user_id);
            current.insert(presence.member.user_id, channel_id);
        }
    }

    let mut events = Vec::new();

    // Sessions left open by a leave that never arrived, including those of
    // members now sitting in another channel.
    let stale: Vec<(UserId, ChannelId)> = guild
        .users()
        .values()
        .filter_map(|user| Some((user.user_id(), user.open_channel()?)))
        .filter(|(user_id, channel_id)| current.get(user_id) != Some(channel_id))
        .collect();
    for (user_id, channel_id) in stale {
        let Some(user) = guild.user_mut(user_id) else {
            continue;
        };
        let credit = config.may_credit(user.is_bot(), Some(&*user));
        let before = user.snapshot();
        if let (true, Some(elapsed)) = (credit, user.close_session(channel_id, now, credit)) {
            events.push(event(
                user_id,
                TrackerEventKind::UserVoiceLeave(VoiceLeft {
                    channel_id,
                    elapsed,
                    before,
                    after: user.snapshot(),
                }),
            ));
        }
    }

    let mut failure = None;
    if config.voice_time_tracking_enabled || config.leveling_tracking_enabled {
        for presence in &presences {
            let Some(channel_id) = presence.state.channel_id else {
                continue;
            };
            let user_id = presence.member.user_id;

            let eligible = {
                let probe;
                let user = if let Some(user) = guild.user(user_id) {
                    user
                } else {
                    probe = UserAggregate::new(guild_id, user_id);
                    &probe
                };
                let channel = ChannelInfo {
                    guild_id,
                    channel_id,
                    members: occupancy.get(&channel_id).cloned().unwrap_or_default(),
                };
                !user.is_blacklisted()
                    && config.check_member(&presence.member, &presence.state, user, &*policy)
                    && config.check_channel(&channel, &*policy)
            };
            if !eligible {
                continue;
            }

            let xp_amount = if config.leveling_tracking_enabled {
                match tracker.draw_xp(&*policy) {
                    Ok(amount) => Some(amount),
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
            } else {
                None
            };

            let user = guild.user_or_insert(user_id);
            user.set_bot(presence.member.is_bot);
            if config.voice_time_tracking_enabled {
                let amount = tracker
                    .options()
                    .sweep_tick_ms
                    .saturating_add(policy.time_to_add());
                let before = user.snapshot();
                user.credit_tick(channel_id, amount, now);
                events.push(event(
                    user_id,
                    TrackerEventKind::UserVoiceTimeAdd(VoiceTimeAdded {
                        channel_id,
                        amount,
                        before,
                        after: user.snapshot(),
                    }),
                ));
            }
            if let Some(amount) = xp_amount {
                let before = user.snapshot();
                let (old_level, new_level) = user.add_xp(amount, policy.level_multiplier());
                let after = user.snapshot();
                events.push(event(
                    user_id,
                    TrackerEventKind::UserXpAdd(XpAdded {
                        amount,
                        before,
                        after,
                    }),
                ));
                if new_level > old_level {
                    events.push(event(
                        user_id,
                        TrackerEventKind::UserLevelUp(LevelledUp {
                            old_level,
                            new_level,
                            before,
                            after,
                        }),
                    ));
                }
            }
        }
    }

    guild.record_events(events);
    tracker.commit(&mut guild).await;

    match failure {
        Some(error) => Err(error),
        None => Ok(GuildSweep::Swept),
    }
}
