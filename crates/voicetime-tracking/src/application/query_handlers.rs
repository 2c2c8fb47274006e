//! Query handlers for the voice tracking context.
//!
//! Queries lock one guild at a time and return read-only views.

use serde::{Deserialize, Serialize};
use voicetime_core::error::DomainError;
use voicetime_core::ids::{ChannelId, GuildId, UserId};

use crate::application::tracker::VoiceTracker;
use crate::domain::aggregates::{ChannelSession, UserAggregate};
use crate::domain::config::{EffectiveConfig, GuildConfig};

/// Read-only view of one channel session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelView {
    pub channel_id: ChannelId,
    pub time_in_channel: u64,
    /// Whether the user is currently being timed in this channel.
    pub is_open: bool,
}

/// Read-only view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub total_voice_time: u64,
    pub xp: u64,
    pub level: u64,
    pub is_blacklisted: bool,
    /// Sessions ordered by channel id.
    pub channels: Vec<ChannelView>,
}

impl From<&UserAggregate> for UserView {
    fn from(user: &UserAggregate) -> Self {
        Self {
            guild_id: user.guild_id(),
            user_id: user.user_id(),
            total_voice_time: user.total_voice_time(),
            xp: user.xp(),
            level: user.level(),
            is_blacklisted: user.is_blacklisted(),
            channels: user
                .channels()
                .values()
                .map(|session: &ChannelSession| ChannelView {
                    channel_id: session.channel_id(),
                    time_in_channel: session.time_in_channel(),
                    is_open: session.is_open(),
                })
                .collect(),
        }
    }
}

/// Read-only view of a guild.
#[derive(Debug, Clone, Serialize)]
pub struct GuildView {
    pub guild_id: GuildId,
    /// The config in force, defaults included.
    pub config: EffectiveConfig,
    /// Only the fields the guild sets itself; `null` means the default
    /// applies.
    pub overrides: GuildConfig,
    pub extra_data: serde_json::Value,
    /// Users ordered by user id.
    pub users: Vec<UserView>,
}

/// One line of the guild listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildSummary {
    pub guild_id: GuildId,
    pub user_count: usize,
}

/// Ranking key for [`leaderboard`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardOrder {
    #[default]
    Xp,
    VoiceTime,
}

/// One ranked user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    pub user_id: UserId,
    pub total_voice_time: u64,
    pub xp: u64,
    pub level: u64,
}

/// Retrieves a guild.
///
/// # Errors
///
/// Returns `DomainError::GuildNotFound` if the guild is not loaded.
pub async fn get_guild(guild_id: GuildId, tracker: &VoiceTracker) -> Result<GuildView, DomainError> {
    let handle = tracker
        .guild_handle(guild_id)
        .await
        .ok_or(DomainError::GuildNotFound(guild_id))?;
    let guild = handle.lock().await;
    Ok(GuildView {
        guild_id,
        config: tracker.effective_config(&guild),
        overrides: guild.config().clone(),
        extra_data: guild.extra_data().clone(),
        users: guild.users().values().map(UserView::from).collect(),
    })
}

/// Retrieves one user of a guild.
///
/// # Errors
///
/// Returns `DomainError::GuildNotFound` or `DomainError::UserNotFound` for
/// unknown ids.
pub async fn get_user(
    guild_id: GuildId,
    user_id: UserId,
    tracker: &VoiceTracker,
) -> Result<UserView, DomainError> {
    let handle = tracker
        .guild_handle(guild_id)
        .await
        .ok_or(DomainError::GuildNotFound(guild_id))?;
    let guild = handle.lock().await;
    guild
        .user(user_id)
        .map(UserView::from)
        .ok_or(DomainError::UserNotFound { guild_id, user_id })
}

/// Lists every loaded guild in id order.
pub async fn list_guilds(tracker: &VoiceTracker) -> Vec<GuildSummary> {
    let mut summaries = Vec::new();
    for guild_id in tracker.guild_ids().await {
        // A guild deleted since the id listing is skipped.
        if let Some(handle) = tracker.guild_handle(guild_id).await {
            let guild = handle.lock().await;
            summaries.push(GuildSummary {
                guild_id,
                user_count: guild.users().len(),
            });
        }
    }
    summaries
}

/// Ranks a guild's users by `order`, descending, ties broken by ascending
/// user id. Blacklisted users are not ranked.
///
/// # Errors
///
/// Returns `DomainError::GuildNotFound` if the guild is not loaded.
pub async fn leaderboard(
    guild_id: GuildId,
    order: LeaderboardOrder,
    limit: usize,
    tracker: &VoiceTracker,
) -> Result<Vec<LeaderboardEntry>, DomainError> {
    let handle = tracker
        .guild_handle(guild_id)
        .await
        .ok_or(DomainError::GuildNotFound(guild_id))?;
    let guild = handle.lock().await;

    let mut ranked: Vec<&UserAggregate> = guild
        .users()
        .values()
        .filter(|user| !user.is_blacklisted())
        .collect();
    ranked.sort_by(|a, b| {
        let key = |user: &UserAggregate| match order {
            LeaderboardOrder::Xp => user.xp(),
            LeaderboardOrder::VoiceTime => user.total_voice_time(),
        };
        key(b)
            .cmp(&key(a))
            .then_with(|| a.user_id().cmp(&b.user_id()))
    });

    Ok(ranked
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(index, user)| LeaderboardEntry {
            rank: index + 1,
            user_id: user.user_id(),
            total_voice_time: user.total_voice_time(),
            xp: user.xp(),
            level: user.level(),
        })
        .collect())
}
