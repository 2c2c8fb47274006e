//! The voice tracker: single owner of every guild aggregate.
//!
//! Guilds live behind one `tokio::sync::Mutex` each, so voice handlers,
//! administrative commands and the sweeper serialize per guild while
//! different guilds proceed concurrently. Every call into storage or the
//! platform is bounded by [`TrackerOptions::io_timeout`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};
use voicetime_core::aggregate::AggregateRoot;
use voicetime_core::clock::Clock;
use voicetime_core::error::DomainError;
use voicetime_core::ids::{ChannelId, GuildId, UserId};
use voicetime_core::platform::{ChannelInfo, VoicePlatform, VoicePresence};
use voicetime_core::repository::GuildRepository;
use voicetime_core::rng::DeterministicRng;

use crate::domain::aggregates::GuildAggregate;
use crate::domain::config::{EffectiveConfig, TrackerDefaults};
use crate::domain::events::TrackerEvent;
use crate::domain::policy::{PolicyRegistry, TrackingPolicy};

/// Shared handle to one guild aggregate.
pub type GuildHandle = Arc<tokio::sync::Mutex<GuildAggregate>>;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Time between two sweeps.
    pub sweep_interval: Duration,
    /// Milliseconds credited per sweep tick, before the policy's extra time.
    pub sweep_tick_ms: u64,
    /// Upper bound on every storage and platform call.
    pub io_timeout: Duration,
    /// Delete guilds the platform reports as unavailable during a sweep.
    pub delete_unavailable_guilds: bool,
    /// Capacity of the domain event broadcast channel.
    pub event_capacity: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(5_000),
            sweep_tick_ms: 5_000,
            io_timeout: Duration::from_millis(5_000),
            delete_unavailable_guilds: false,
            event_capacity: 1_024,
        }
    }
}

/// External collaborators of the tracker.
#[derive(Clone)]
pub struct TrackerDeps {
    /// Guild storage.
    pub repository: Arc<dyn GuildRepository>,
    /// Chat platform lookups.
    pub platform: Arc<dyn VoicePlatform>,
    /// Clock for all "now" reads.
    pub clock: Arc<dyn Clock>,
    /// Randomness for xp draws.
    pub rng: Arc<Mutex<dyn DeterministicRng + Send>>,
}

/// Owns the in-memory guild aggregates and the domain event bus.
pub struct VoiceTracker {
    options: TrackerOptions,
    defaults: TrackerDefaults,
    policies: PolicyRegistry,
    guilds: RwLock<BTreeMap<GuildId, GuildHandle>>,
    deps: TrackerDeps,
    events: broadcast::Sender<TrackerEvent>,
}

impl std::fmt::Debug for VoiceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceTracker")
            .field("options", &self.options)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl VoiceTracker {
    /// Creates a tracker with no guilds loaded.
    #[must_use]
    pub fn new(
        options: TrackerOptions,
        defaults: TrackerDefaults,
        policies: PolicyRegistry,
        deps: TrackerDeps,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            options,
            defaults,
            policies,
            guilds: RwLock::new(BTreeMap::new()),
            deps,
            events,
        }
    }

    /// Loads every stored guild into memory, replacing nothing that is
    /// already loaded. Returns the number of guilds loaded.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MalformedStore` when a stored record is
    /// inconsistent, or the repository error when loading fails.
    pub async fn load(&self) -> Result<usize, DomainError> {
        let records = self
            .bounded(
                "load guilds",
                DomainError::Infrastructure,
                self.deps.repository.get_all_guilds(),
            )
            .await?;

        let mut loaded = BTreeMap::new();
        for record in &records {
            let guild = GuildAggregate::from_record(record)?;
            if loaded
                .insert(record.guild_id, Arc::new(tokio::sync::Mutex::new(guild)))
                .is_some()
            {
                return Err(DomainError::MalformedStore(format!(
                    "guild {} appears twice",
                    record.guild_id
                )));
            }
        }

        let count = loaded.len();
        let mut guilds = self.guilds.write().await;
        for (guild_id, handle) in loaded {
            guilds.entry(guild_id).or_insert(handle);
        }
        info!(guilds = count, "loaded guilds from storage");
        Ok(count)
    }

    /// Subscribes to the domain events published after each commit.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    #[must_use]
    pub fn defaults(&self) -> &TrackerDefaults {
        &self.defaults
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.deps.clock.now()
    }

    /// Returns the guild, creating it with the default config when unknown.
    pub async fn guild_or_create(&self, guild_id: GuildId) -> GuildHandle {
        if let Some(handle) = self.guild_handle(guild_id).await {
            return handle;
        }
        let mut guilds = self.guilds.write().await;
        Arc::clone(guilds.entry(guild_id).or_insert_with(|| {
            debug!(%guild_id, "materializing guild with default config");
            Arc::new(tokio::sync::Mutex::new(GuildAggregate::new(guild_id)))
        }))
    }

    /// Returns the guild when it is loaded.
    pub async fn guild_handle(&self, guild_id: GuildId) -> Option<GuildHandle> {
        self.guilds.read().await.get(&guild_id).map(Arc::clone)
    }

    /// Ids of every loaded guild, in ascending order.
    pub async fn guild_ids(&self) -> Vec<GuildId> {
        self.guilds.read().await.keys().copied().collect()
    }

    /// Forgets a guild in memory and deletes it from storage. Waits for any
    /// mutation in flight on the guild first, then tombstones the aggregate
    /// so that holders of an older handle cannot write it back. Returns
    /// whether the guild was loaded.
    ///
    /// # Errors
    ///
    /// Returns the repository error when the storage delete fails; the guild
    /// is already gone from memory in that case.
    pub async fn delete_guild(&self, guild_id: GuildId) -> Result<bool, DomainError> {
        let Some(handle) = self.guild_handle(guild_id).await else {
            return Ok(false);
        };
        let mut guild = handle.lock().await;
        if guild.is_deleted() {
            return Ok(false);
        }
        guild.mark_deleted();
        {
            let mut guilds = self.guilds.write().await;
            if guilds
                .get(&guild_id)
                .is_some_and(|current| Arc::ptr_eq(current, &handle))
            {
                guilds.remove(&guild_id);
            }
        }
        self.bounded(
            "delete guild",
            DomainError::Infrastructure,
            self.deps.repository.delete_guild(guild_id),
        )
        .await?;
        info!(%guild_id, "deleted guild");
        Ok(true)
    }

    /// The policy in force for a guild.
    #[must_use]
    pub fn policy_for(&self, guild_id: GuildId) -> Arc<dyn TrackingPolicy> {
        self.policies.for_guild(guild_id)
    }

    /// The guild's config merged over the manager-wide defaults.
    #[must_use]
    pub fn effective_config(&self, guild: &GuildAggregate) -> EffectiveConfig {
        guild.config().resolve(&self.defaults)
    }

    /// Persists the guild when it changed, then publishes its uncommitted
    /// events. A failed write is logged and the guild stays dirty so the next
    /// commit retries it. Returns the published events.
    ///
    /// A deleted guild is neither written nor announced.
    pub async fn commit(&self, guild: &mut GuildAggregate) -> Vec<TrackerEvent> {
        if guild.is_deleted() {
            let dropped = guild.take_uncommitted_events();
            debug!(
                guild_id = %guild.guild_id(),
                events = dropped.len(),
                "discarding changes to a deleted guild"
            );
            return Vec::new();
        }
        if guild.is_dirty() {
            if let Err(error) = self.persist(guild).await {
                error!(
                    guild_id = %guild.guild_id(),
                    %error,
                    "failed to persist guild; keeping in-memory state"
                );
            }
        }

        let events = guild.take_uncommitted_events();
        for event in &events {
            // Having no subscribers is not an error.
            let _ = self.events.send(event.clone());
        }
        events
    }

    async fn persist(&self, guild: &mut GuildAggregate) -> Result<(), DomainError> {
        let record = guild.to_record();
        let repository = &self.deps.repository;
        if guild.is_persisted() {
            match self
                .bounded(
                    "edit guild",
                    DomainError::Infrastructure,
                    repository.edit_guild(&record),
                )
                .await
            {
                Err(DomainError::GuildNotFound(_)) => {
                    warn!(guild_id = %record.guild_id, "guild missing from storage; saving it again");
                    self.bounded(
                        "save guild",
                        DomainError::Infrastructure,
                        repository.save_guild(&record),
                    )
                    .await?;
                }
                other => other?,
            }
        } else {
            self.bounded(
                "save guild",
                DomainError::Infrastructure,
                repository.save_guild(&record),
            )
            .await?;
        }
        guild.mark_persisted();
        Ok(())
    }

    /// Occupancy of a channel. When the platform does not know the channel
    /// or fails, the member being handled is assumed to be alone in it.
    pub async fn channel_info(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        member: UserId,
    ) -> ChannelInfo {
        let lookup = self
            .bounded(
                "channel lookup",
                DomainError::Platform,
                self.deps.platform.channel(guild_id, channel_id),
            )
            .await;
        match lookup {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                debug!(%guild_id, %channel_id, "unknown channel; assuming a lone occupant");
                ChannelInfo {
                    guild_id,
                    channel_id,
                    members: vec![member],
                }
            }
            Err(error) => {
                warn!(%guild_id, %channel_id, %error, "channel lookup failed; assuming a lone occupant");
                ChannelInfo {
                    guild_id,
                    channel_id,
                    members: vec![member],
                }
            }
        }
    }

    /// Members the platform reports in voice for a guild.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Platform` when the lookup fails or times out.
    pub async fn voice_members(&self, guild_id: GuildId) -> Result<Vec<VoicePresence>, DomainError> {
        self.bounded(
            "voice member listing",
            DomainError::Platform,
            self.deps.platform.voice_members(guild_id),
        )
        .await
    }

    /// Whether the platform still reaches the guild.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Platform` when the lookup fails or times out.
    pub async fn guild_available(&self, guild_id: GuildId) -> Result<bool, DomainError> {
        self.bounded(
            "guild availability",
            DomainError::Platform,
            self.deps.platform.guild_available(guild_id),
        )
        .await
    }

    /// Draws the xp awarded for one sweep tick.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the RNG mutex is poisoned.
    pub fn draw_xp(&self, policy: &dyn TrackingPolicy) -> Result<u64, DomainError> {
        let mut rng = self
            .deps
            .rng
            .lock()
            .map_err(|e| DomainError::Infrastructure(format!("RNG mutex poisoned: {e}")))?;
        Ok(policy.xp_to_add(&mut *rng))
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        on_timeout: fn(String) -> DomainError,
        call: impl Future<Output = Result<T, DomainError>>,
    ) -> Result<T, DomainError> {
        tokio::time::timeout(self.options.io_timeout, call)
            .await
            .map_err(|_| {
                on_timeout(format!(
                    "{operation} timed out after {} ms",
                    self.options.io_timeout.as_millis()
                ))
            })?
    }
}
