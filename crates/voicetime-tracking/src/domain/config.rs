//! Guild configuration and eligibility evaluation.
//!
//! Configuration is two-tiered: every [`GuildConfig`] field is optional and
//! an absent field falls back to the manager-wide [`TrackerDefaults`].
//! Presence decides, not truthiness, so a guild can override a `true`
//! default with `false` or a non-zero bound with `0`.

use std::collections::BTreeSet;

use serde::Serialize;
use voicetime_core::error::DomainError;
use voicetime_core::ids::ChannelId;
use voicetime_core::platform::{ChannelInfo, MemberInfo, VoiceState};
use voicetime_core::repository::GuildConfigRecord;

use super::aggregates::UserAggregate;
use super::commands::GuildConfigPatch;
use super::policy::TrackingPolicy;

/// Manager-wide configuration used where a guild sets nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct TrackerDefaults {
    pub track_bots: bool,
    pub track_all_channels: bool,
    pub channel_ids: BTreeSet<ChannelId>,
    pub exempt_permissions: BTreeSet<String>,
    pub track_mute: bool,
    pub track_deaf: bool,
    pub min_user_count_to_participate: u32,
    pub max_user_count_to_participate: u32,
    pub min_xp_to_participate: u64,
    pub min_level_to_participate: u64,
    pub max_xp_to_participate: u64,
    pub max_level_to_participate: u64,
    pub voice_time_tracking_enabled: bool,
    pub leveling_tracking_enabled: bool,
}

impl Default for TrackerDefaults {
    fn default() -> Self {
        Self {
            track_bots: false,
            track_all_channels: true,
            channel_ids: BTreeSet::new(),
            exempt_permissions: BTreeSet::new(),
            track_mute: true,
            track_deaf: true,
            min_user_count_to_participate: 0,
            max_user_count_to_participate: 0,
            min_xp_to_participate: 0,
            min_level_to_participate: 0,
            max_xp_to_participate: 0,
            max_level_to_participate: 0,
            voice_time_tracking_enabled: true,
            leveling_tracking_enabled: true,
        }
    }
}

/// Guild-level overrides. `None` means "use the default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GuildConfig {
    pub track_bots: Option<bool>,
    pub track_all_channels: Option<bool>,
    pub channel_ids: Option<BTreeSet<ChannelId>>,
    pub exempt_permissions: Option<BTreeSet<String>>,
    pub track_mute: Option<bool>,
    pub track_deaf: Option<bool>,
    pub min_user_count_to_participate: Option<u32>,
    pub max_user_count_to_participate: Option<u32>,
    pub min_xp_to_participate: Option<u64>,
    pub min_level_to_participate: Option<u64>,
    pub max_xp_to_participate: Option<u64>,
    pub max_level_to_participate: Option<u64>,
    pub voice_time_tracking_enabled: Option<bool>,
    pub leveling_tracking_enabled: Option<bool>,
}

impl GuildConfig {
    /// Merges the overrides over `defaults`.
    #[must_use]
    pub fn resolve(&self, defaults: &TrackerDefaults) -> EffectiveConfig {
        EffectiveConfig {
            track_bots: self.track_bots.unwrap_or(defaults.track_bots),
            track_all_channels: self
                .track_all_channels
                .unwrap_or(defaults.track_all_channels),
            channel_ids: self
                .channel_ids
                .clone()
                .unwrap_or_else(|| defaults.channel_ids.clone()),
            exempt_permissions: self
                .exempt_permissions
                .clone()
                .unwrap_or_else(|| defaults.exempt_permissions.clone()),
            track_mute: self.track_mute.unwrap_or(defaults.track_mute),
            track_deaf: self.track_deaf.unwrap_or(defaults.track_deaf),
            min_user_count_to_participate: self
                .min_user_count_to_participate
                .unwrap_or(defaults.min_user_count_to_participate),
            max_user_count_to_participate: self
                .max_user_count_to_participate
                .unwrap_or(defaults.max_user_count_to_participate),
            min_xp_to_participate: self
                .min_xp_to_participate
                .unwrap_or(defaults.min_xp_to_participate),
            min_level_to_participate: self
                .min_level_to_participate
                .unwrap_or(defaults.min_level_to_participate),
            max_xp_to_participate: self
                .max_xp_to_participate
                .unwrap_or(defaults.max_xp_to_participate),
            max_level_to_participate: self
                .max_level_to_participate
                .unwrap_or(defaults.max_level_to_participate),
            voice_time_tracking_enabled: self
                .voice_time_tracking_enabled
                .unwrap_or(defaults.voice_time_tracking_enabled),
            leveling_tracking_enabled: self
                .leveling_tracking_enabled
                .unwrap_or(defaults.leveling_tracking_enabled),
        }
    }

    /// Applies a patch, rejecting it when the merged result has inverted
    /// bounds. A `null` field clears the override. On error the config is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` naming the offending bound pair.
    pub fn apply_patch(
        &mut self,
        patch: &GuildConfigPatch,
        defaults: &TrackerDefaults,
    ) -> Result<(), DomainError> {
        let mut next = self.clone();
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = patch.$field {
                    next.$field = value;
                })*
            };
        }
        set!(
            track_bots,
            track_all_channels,
            track_mute,
            track_deaf,
            min_user_count_to_participate,
            max_user_count_to_participate,
            min_xp_to_participate,
            min_level_to_participate,
            max_xp_to_participate,
            max_level_to_participate,
            voice_time_tracking_enabled,
            leveling_tracking_enabled,
        );
        if let Some(ids) = &patch.channel_ids {
            next.channel_ids = ids.as_ref().map(|ids| ids.iter().copied().collect());
        }
        if let Some(permissions) = &patch.exempt_permissions {
            next.exempt_permissions = permissions
                .as_ref()
                .map(|permissions| permissions.iter().cloned().collect());
        }

        next.resolve(defaults).validate()?;
        *self = next;
        Ok(())
    }

    /// Builds the config from its stored form.
    #[must_use]
    pub fn from_record(record: &GuildConfigRecord) -> Self {
        Self {
            track_bots: record.track_bots,
            track_all_channels: record.track_all_channels,
            channel_ids: record
                .channel_ids
                .as_ref()
                .map(|ids| ids.iter().copied().collect()),
            exempt_permissions: record
                .exempt_permissions
                .as_ref()
                .map(|perms| perms.iter().cloned().collect()),
            track_mute: record.track_mute,
            track_deaf: record.track_deaf,
            min_user_count_to_participate: record.min_user_count_to_participate,
            max_user_count_to_participate: record.max_user_count_to_participate,
            min_xp_to_participate: record.min_xp_to_participate,
            min_level_to_participate: record.min_level_to_participate,
            max_xp_to_participate: record.max_xp_to_participate,
            max_level_to_participate: record.max_level_to_participate,
            voice_time_tracking_enabled: record.voice_time_tracking_enabled,
            leveling_tracking_enabled: record.leveling_tracking_enabled,
        }
    }

    /// Converts the config into its stored form.
    #[must_use]
    pub fn to_record(&self) -> GuildConfigRecord {
        GuildConfigRecord {
            track_bots: self.track_bots,
            track_all_channels: self.track_all_channels,
            channel_ids: self
                .channel_ids
                .as_ref()
                .map(|ids| ids.iter().copied().collect()),
            exempt_permissions: self
                .exempt_permissions
                .as_ref()
                .map(|perms| perms.iter().cloned().collect()),
            track_mute: self.track_mute,
            track_deaf: self.track_deaf,
            min_user_count_to_participate: self.min_user_count_to_participate,
            max_user_count_to_participate: self.max_user_count_to_participate,
            min_xp_to_participate: self.min_xp_to_participate,
            min_level_to_participate: self.min_level_to_participate,
            max_xp_to_participate: self.max_xp_to_participate,
            max_level_to_participate: self.max_level_to_participate,
            voice_time_tracking_enabled: self.voice_time_tracking_enabled,
            leveling_tracking_enabled: self.leveling_tracking_enabled,
        }
    }
}

/// Fully resolved configuration for one guild at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct EffectiveConfig {
    pub track_bots: bool,
    pub track_all_channels: bool,
    pub channel_ids: BTreeSet<ChannelId>,
    pub exempt_permissions: BTreeSet<String>,
    pub track_mute: bool,
    pub track_deaf: bool,
    pub min_user_count_to_participate: u32,
    pub max_user_count_to_participate: u32,
    pub min_xp_to_participate: u64,
    pub min_level_to_participate: u64,
    pub max_xp_to_participate: u64,
    pub max_level_to_participate: u64,
    pub voice_time_tracking_enabled: bool,
    pub leveling_tracking_enabled: bool,
}

impl EffectiveConfig {
    /// Whether a member may accumulate time at all: tracking is enabled,
    /// the user is not blacklisted and bots are tracked if this is one.
    /// Gates every credited close, from a notification or a sweep.
    #[must_use]
    pub fn may_credit(&self, is_bot: bool, user: Option<&UserAggregate>) -> bool {
        self.voice_time_tracking_enabled
            && !user.is_some_and(UserAggregate::is_blacklisted)
            && (!is_bot || self.track_bots)
    }

    /// Bot, mute and deaf gates: the cheap checks that only need the
    /// member and their voice state.
    #[must_use]
    pub fn accepts_voice_state(&self, member: &MemberInfo, state: &VoiceState) -> bool {
        if member.is_bot && !self.track_bots {
            return false;
        }
        if !self.track_mute && state.is_muted() {
            return false;
        }
        !(!self.track_deaf && state.is_deafened())
    }

    /// Member-level eligibility: exemptions, exempt permissions, the voice
    /// state gates and the xp/level bounds.
    #[must_use]
    pub fn check_member(
        &self,
        member: &MemberInfo,
        state: &VoiceState,
        user: &UserAggregate,
        policy: &dyn TrackingPolicy,
    ) -> bool {
        if policy.is_exempt_member(member) {
            return false;
        }
        if member
            .permissions
            .iter()
            .any(|permission| self.exempt_permissions.contains(permission))
        {
            return false;
        }
        if !self.accepts_voice_state(member, state) {
            return false;
        }
        within_bounds(
            user.xp(),
            self.min_xp_to_participate,
            self.max_xp_to_participate,
        ) && within_bounds(
            user.level(),
            self.min_level_to_participate,
            self.max_level_to_participate,
        )
    }

    /// Channel-level eligibility: exemption, allow-list and occupancy bounds.
    #[must_use]
    pub fn check_channel(&self, channel: &ChannelInfo, policy: &dyn TrackingPolicy) -> bool {
        if policy.is_exempt_channel(channel) {
            return false;
        }
        if !self.track_all_channels && !self.channel_ids.contains(&channel.channel_id) {
            return false;
        }
        within_bounds(
            channel.member_count() as u64,
            u64::from(self.min_user_count_to_participate),
            u64::from(self.max_user_count_to_participate),
        )
    }

    /// Rejects inverted `[min, max]` pairs where both bounds are set.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` naming the offending pair.
    pub fn validate(&self) -> Result<(), DomainError> {
        let pairs = [
            (
                "user count",
                u64::from(self.min_user_count_to_participate),
                u64::from(self.max_user_count_to_participate),
            ),
            (
                "xp",
                self.min_xp_to_participate,
                self.max_xp_to_participate,
            ),
            (
                "level",
                self.min_level_to_participate,
                self.max_level_to_participate,
            ),
        ];
        for (name, min, max) in pairs {
            if min != 0 && max != 0 && max < min {
                return Err(DomainError::Validation(format!(
                    "maximum {name} to participate ({max}) is below the minimum ({min})"
                )));
            }
        }
        Ok(())
    }
}

/// `0` on either side means unbounded on that side.
fn within_bounds(value: u64, min: u64, max: u64) -> bool {
    (min == 0 || value >= min) && (max == 0 || value <= max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicetime_core::ids::{GuildId, UserId};

    use crate::domain::policy::StandardPolicy;

    fn channel(id: u64, occupants: u64) -> ChannelInfo {
        ChannelInfo {
            guild_id: GuildId(1),
            channel_id: ChannelId(id),
            members: (0..occupants).map(UserId).collect(),
        }
    }

    #[test]
    fn test_resolve_respects_explicit_false_and_zero_overrides() {
        // Arrange
        let defaults = TrackerDefaults {
            track_mute: true,
            max_user_count_to_participate: 10,
            ..TrackerDefaults::default()
        };
        let config = GuildConfig {
            track_mute: Some(false),
            max_user_count_to_participate: Some(0),
            ..GuildConfig::default()
        };

        // Act
        let effective = config.resolve(&defaults);

        // Assert
        assert!(!effective.track_mute);
        assert_eq!(effective.max_user_count_to_participate, 0);
        assert!(effective.track_deaf);
    }

    #[test]
    fn test_resolve_falls_back_to_defaults_when_unset() {
        let defaults = TrackerDefaults {
            track_bots: true,
            ..TrackerDefaults::default()
        };

        let effective = GuildConfig::default().resolve(&defaults);

        assert!(effective.track_bots);
        assert!(effective.track_all_channels);
    }

    #[test]
    fn test_check_channel_enforces_allow_list() {
        let config = GuildConfig {
            track_all_channels: Some(false),
            channel_ids: Some(BTreeSet::from([ChannelId(1)])),
            ..GuildConfig::default()
        }
        .resolve(&TrackerDefaults::default());
        let policy = StandardPolicy::default();

        assert!(config.check_channel(&channel(1, 1), &policy));
        assert!(!config.check_channel(&channel(2, 1), &policy));
    }

    #[test]
    fn test_check_channel_enforces_occupancy_bounds() {
        let config = GuildConfig {
            min_user_count_to_participate: Some(2),
            max_user_count_to_participate: Some(3),
            ..GuildConfig::default()
        }
        .resolve(&TrackerDefaults::default());
        let policy = StandardPolicy::default();

        assert!(!config.check_channel(&channel(1, 1), &policy));
        assert!(config.check_channel(&channel(1, 2), &policy));
        assert!(config.check_channel(&channel(1, 3), &policy));
        assert!(!config.check_channel(&channel(1, 4), &policy));
    }

    #[test]
    fn test_check_member_rejects_untracked_bots_and_muted_members() {
        let config = GuildConfig {
            track_mute: Some(false),
            ..GuildConfig::default()
        }
        .resolve(&TrackerDefaults::default());
        let policy = StandardPolicy::default();
        let user = UserAggregate::new(GuildId(1), UserId(5));
        let bot = MemberInfo {
            is_bot: true,
            ..MemberInfo::new(UserId(5))
        };
        let muted = VoiceState {
            channel_id: Some(ChannelId(1)),
            self_mute: true,
            ..VoiceState::default()
        };

        assert!(!config.check_member(&bot, &VoiceState::default(), &user, &policy));
        assert!(!config.check_member(&MemberInfo::new(UserId(5)), &muted, &user, &policy));
        assert!(config.check_member(
            &MemberInfo::new(UserId(5)),
            &VoiceState::default(),
            &user,
            &policy
        ));
    }

    #[test]
    fn test_check_member_rejects_exempt_permissions() {
        let config = GuildConfig {
            exempt_permissions: Some(BTreeSet::from(["ADMINISTRATOR".to_owned()])),
            ..GuildConfig::default()
        }
        .resolve(&TrackerDefaults::default());
        let policy = StandardPolicy::default();
        let user = UserAggregate::new(GuildId(1), UserId(5));
        let admin = MemberInfo {
            permissions: BTreeSet::from(["ADMINISTRATOR".to_owned()]),
            ..MemberInfo::new(UserId(5))
        };

        assert!(!config.check_member(&admin, &VoiceState::default(), &user, &policy));
    }

    #[test]
    fn test_check_member_applies_xp_gates() {
        let config = GuildConfig {
            min_xp_to_participate: Some(10),
            ..GuildConfig::default()
        }
        .resolve(&TrackerDefaults::default());
        let policy = StandardPolicy::default();
        let member = MemberInfo::new(UserId(5));
        let mut user = UserAggregate::new(GuildId(1), UserId(5));

        assert!(!config.check_member(&member, &VoiceState::default(), &user, &policy));

        user.set_xp(10, 0.1);
        assert!(config.check_member(&member, &VoiceState::default(), &user, &policy));
    }

    #[test]
    fn test_apply_patch_rejects_inverted_bounds_and_keeps_previous_state() {
        // Arrange
        let defaults = TrackerDefaults::default();
        let mut config = GuildConfig {
            track_bots: Some(true),
            ..GuildConfig::default()
        };
        let patch = GuildConfigPatch {
            track_bots: Some(Some(false)),
            min_xp_to_participate: Some(Some(100)),
            max_xp_to_participate: Some(Some(50)),
            ..GuildConfigPatch::default()
        };

        // Act
        let result = config.apply_patch(&patch, &defaults);

        // Assert
        match result.unwrap_err() {
            DomainError::Validation(msg) => assert!(msg.contains("xp")),
            other => panic!("expected Validation, got {other:?}"),
        }
        assert_eq!(config.track_bots, Some(true));
    }

    #[test]
    fn test_apply_patch_sets_present_fields_only() {
        let defaults = TrackerDefaults::default();
        let mut config = GuildConfig {
            track_deaf: Some(false),
            ..GuildConfig::default()
        };
        let patch = GuildConfigPatch {
            track_all_channels: Some(Some(false)),
            channel_ids: Some(Some(vec![ChannelId(3), ChannelId(4)])),
            ..GuildConfigPatch::default()
        };

        config.apply_patch(&patch, &defaults).unwrap();

        assert_eq!(config.track_deaf, Some(false));
        assert_eq!(config.track_all_channels, Some(false));
        assert_eq!(
            config.channel_ids,
            Some(BTreeSet::from([ChannelId(3), ChannelId(4)]))
        );
    }

    #[test]
    fn test_apply_patch_null_clears_override_back_to_default() {
        // Arrange
        let defaults = TrackerDefaults {
            max_user_count_to_participate: 10,
            ..TrackerDefaults::default()
        };
        let mut config = GuildConfig {
            track_mute: Some(false),
            max_user_count_to_participate: Some(0),
            channel_ids: Some(BTreeSet::from([ChannelId(3)])),
            ..GuildConfig::default()
        };
        let patch: GuildConfigPatch = serde_json::from_str(
            r#"{"track_mute": null, "max_user_count_to_participate": null, "channel_ids": null}"#,
        )
        .unwrap();

        // Act
        config.apply_patch(&patch, &defaults).unwrap();

        // Assert
        assert_eq!(config, GuildConfig::default());
        let effective = config.resolve(&defaults);
        assert!(effective.track_mute);
        assert_eq!(effective.max_user_count_to_participate, 10);
    }

    #[test]
    fn test_may_credit_gates_on_tracking_blacklist_and_bots() {
        let config = GuildConfig::default().resolve(&TrackerDefaults::default());
        let mut user = UserAggregate::new(GuildId(1), UserId(5));

        assert!(config.may_credit(false, None));
        assert!(config.may_credit(false, Some(&user)));
        assert!(!config.may_credit(true, Some(&user)));

        user.set_blacklisted(true);
        assert!(!config.may_credit(false, Some(&user)));

        let disabled = GuildConfig {
            voice_time_tracking_enabled: Some(false),
            ..GuildConfig::default()
        }
        .resolve(&TrackerDefaults::default());
        assert!(!disabled.may_credit(false, None));
    }

    #[test]
    fn test_record_conversion_preserves_unset_fields() {
        let config = GuildConfig {
            track_bots: Some(false),
            channel_ids: Some(BTreeSet::from([ChannelId(8)])),
            min_user_count_to_participate: Some(0),
            ..GuildConfig::default()
        };

        let record = config.to_record();
        let restored = GuildConfig::from_record(&record);

        assert_eq!(restored, config);
        assert_eq!(record.track_mute, None);
        assert_eq!(record.min_user_count_to_participate, Some(0));
    }
}
