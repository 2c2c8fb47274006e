//! Tracking policies: exemption predicates and xp/time/level formulas.
//!
//! A policy is a plain value supplied when the tracker is built. The
//! manager-wide default applies to every guild without its own override.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use voicetime_core::ids::{ChannelId, GuildId, UserId};
use voicetime_core::platform::{ChannelInfo, MemberInfo};
use voicetime_core::rng::DeterministicRng;

/// Pluggable rules that complement the boolean and numeric config gates.
pub trait TrackingPolicy: Send + Sync + Debug {
    /// Returns true when the member must never be tracked.
    fn is_exempt_member(&self, member: &MemberInfo) -> bool;

    /// Returns true when the channel must never be tracked.
    fn is_exempt_channel(&self, channel: &ChannelInfo) -> bool;

    /// Experience awarded on one sweep tick.
    fn xp_to_add(&self, rng: &mut dyn DeterministicRng) -> u64;

    /// Extra milliseconds credited on one sweep tick, on top of the fixed
    /// tick length.
    fn time_to_add(&self) -> u64;

    /// Multiplier in `level = floor(multiplier * sqrt(xp))`.
    fn level_multiplier(&self) -> f64;
}

/// The stock policy: a uniform xp draw, constant extra time, a fixed level
/// multiplier and explicit exemption lists.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardPolicy {
    /// Lowest xp awarded per tick.
    pub xp_min: u64,
    /// Highest xp awarded per tick.
    pub xp_max: u64,
    /// Extra milliseconds credited per tick.
    pub extra_time_ms: u64,
    /// Level multiplier.
    pub level_multiplier: f64,
    /// Members that are never tracked.
    pub exempt_members: BTreeSet<UserId>,
    /// Channels that are never tracked.
    pub exempt_channels: BTreeSet<ChannelId>,
}

impl Default for StandardPolicy {
    fn default() -> Self {
        Self {
            xp_min: 5,
            xp_max: 15,
            extra_time_ms: 0,
            level_multiplier: 0.1,
            exempt_members: BTreeSet::new(),
            exempt_channels: BTreeSet::new(),
        }
    }
}

impl TrackingPolicy for StandardPolicy {
    fn is_exempt_member(&self, member: &MemberInfo) -> bool {
        self.exempt_members.contains(&member.user_id)
    }

    fn is_exempt_channel(&self, channel: &ChannelInfo) -> bool {
        self.exempt_channels.contains(&channel.channel_id)
    }

    fn xp_to_add(&self, rng: &mut dyn DeterministicRng) -> u64 {
        rng.next_u64_range(self.xp_min, self.xp_max.max(self.xp_min))
    }

    fn time_to_add(&self) -> u64 {
        self.extra_time_ms
    }

    fn level_multiplier(&self) -> f64 {
        self.level_multiplier
    }
}

/// Default policy plus per-guild overrides, fixed at construction.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    default: Arc<dyn TrackingPolicy>,
    overrides: HashMap<GuildId, Arc<dyn TrackingPolicy>>,
}

impl PolicyRegistry {
    /// Creates a registry where every guild uses `default`.
    #[must_use]
    pub fn new(default: Arc<dyn TrackingPolicy>) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Returns the registry with a dedicated policy for one guild.
    #[must_use]
    pub fn with_guild_policy(mut self, guild_id: GuildId, policy: Arc<dyn TrackingPolicy>) -> Self {
        self.overrides.insert(guild_id, policy);
        self
    }

    /// Resolves the policy for a guild: its override, else the default.
    #[must_use]
    pub fn for_guild(&self, guild_id: GuildId) -> Arc<dyn TrackingPolicy> {
        self.overrides
            .get(&guild_id)
            .map_or_else(|| Arc::clone(&self.default), Arc::clone)
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new(Arc::new(StandardPolicy::default()))
    }
}

/// Computes `floor(multiplier * sqrt(xp))`. Negative or non-finite results
/// clamp to zero.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn level_for_xp(xp: u64, multiplier: f64) -> u64 {
    let level = (multiplier * (xp as f64).sqrt()).floor();
    if level.is_finite() && level > 0.0 {
        level as u64
    } else {
        0
    }
}
