//! Test repositories — mock `GuildRepository` implementations for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use voicetime_core::error::DomainError;
use voicetime_core::ids::GuildId;
use voicetime_core::repository::{GuildRecord, GuildRepository};

/// A single write observed by [`InMemoryGuildRepository`].
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryWrite {
    /// `save_guild` was called with this record.
    Save(GuildRecord),
    /// `edit_guild` was called with this record.
    Edit(GuildRecord),
    /// `delete_guild` was called for this guild.
    Delete(GuildId),
}

/// A guild repository that keeps records in memory and records every write.
#[derive(Debug, Default)]
pub struct InMemoryGuildRepository {
    records: Mutex<BTreeMap<GuildId, GuildRecord>>,
    writes: Mutex<Vec<RepositoryWrite>>,
}

impl InMemoryGuildRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-populated with `records`.
    #[must_use]
    pub fn with_guilds(records: Vec<GuildRecord>) -> Self {
        let repo = Self::new();
        {
            let mut stored = repo.records.lock().unwrap();
            for record in records {
                stored.insert(record.guild_id, record);
            }
        }
        repo
    }

    /// Returns the currently stored record for a guild.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn stored(&self, guild_id: GuildId) -> Option<GuildRecord> {
        self.records.lock().unwrap().get(&guild_id).cloned()
    }

    /// Returns a snapshot of all writes in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn writes(&self) -> Vec<RepositoryWrite> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl GuildRepository for InMemoryGuildRepository {
    async fn get_all_guilds(&self) -> Result<Vec<GuildRecord>, DomainError> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn save_guild(&self, record: &GuildRecord) -> Result<(), DomainError> {
        self.records
            .lock()
            .unwrap()
            .insert(record.guild_id, record.clone());
        self.writes
            .lock()
            .unwrap()
            .push(RepositoryWrite::Save(record.clone()));
        Ok(())
    }

    async fn edit_guild(&self, record: &GuildRecord) -> Result<(), DomainError> {
        let mut records = self.records.lock().unwrap();
        if !records.contains_key(&record.guild_id) {
            return Err(DomainError::GuildNotFound(record.guild_id));
        }
        records.insert(record.guild_id, record.clone());
        self.writes
            .lock()
            .unwrap()
            .push(RepositoryWrite::Edit(record.clone()));
        Ok(())
    }

    async fn delete_guild(&self, guild_id: GuildId) -> Result<bool, DomainError> {
        let existed = self.records.lock().unwrap().remove(&guild_id).is_some();
        self.writes
            .lock()
            .unwrap()
            .push(RepositoryWrite::Delete(guild_id));
        Ok(existed)
    }
}

/// A guild repository that always returns an infrastructure error. Useful for
/// testing that persistence failures do not roll back in-memory state.
#[derive(Debug)]
pub struct FailingGuildRepository;

#[async_trait]
impl GuildRepository for FailingGuildRepository {
    async fn get_all_guilds(&self) -> Result<Vec<GuildRecord>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn save_guild(&self, _record: &GuildRecord) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn edit_guild(&self, _record: &GuildRecord) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }

    async fn delete_guild(&self, _guild_id: GuildId) -> Result<bool, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}
