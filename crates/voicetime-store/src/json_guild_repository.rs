//! JSON file implementation of the `GuildRepository` trait.
//!
//! The whole store is one JSON array of guild records. Every write replaces
//! the file through a temp file and a rename, so a crash mid-write leaves
//! the previous content intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use voicetime_core::error::DomainError;
use voicetime_core::ids::GuildId;
use voicetime_core::repository::{GuildRecord, GuildRepository};

/// File-backed guild repository.
#[derive(Debug)]
pub struct JsonGuildRepository {
    path: PathBuf,
    // Records in file order. The lock also serializes file writes.
    records: Mutex<Vec<GuildRecord>>,
}

impl JsonGuildRepository {
    /// Opens the store at `path`, creating it with an empty array (and any
    /// missing parent directories) when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MalformedStore` when the file is not a JSON
    /// array of guild records, or `DomainError::Infrastructure` on I/O
    /// failure.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let path = path.into();
        if !tokio::fs::try_exists(&path).await.map_err(io_error(&path))? {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(io_error(parent))?;
            }
            tokio::fs::write(&path, b"[]").await.map_err(io_error(&path))?;
            info!(path = %path.display(), "created empty guild store");
        }

        let records = read_records(&path).await?;
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_records(&self, records: &[GuildRecord]) -> Result<(), DomainError> {
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| DomainError::Infrastructure(format!("serialize guild store: {e}")))?;

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(io_error(&temp_path))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(io_error(&self.path))?;

        debug!(path = %self.path.display(), guilds = records.len(), "guild store written");
        Ok(())
    }
}

async fn read_records(path: &Path) -> Result<Vec<GuildRecord>, DomainError> {
    let content = tokio::fs::read(path).await.map_err(io_error(path))?;
    let value: serde_json::Value = serde_json::from_slice(&content)
        .map_err(|e| DomainError::MalformedStore(format!("{}: {e}", path.display())))?;
    if !value.is_array() {
        return Err(DomainError::MalformedStore(format!(
            "{}: top-level value is not an array",
            path.display()
        )));
    }
    serde_json::from_value(value)
        .map_err(|e| DomainError::MalformedStore(format!("{}: {e}", path.display())))
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> DomainError + '_ {
    move |e| DomainError::Infrastructure(format!("{}: {e}", path.display()))
}

#[async_trait]
impl GuildRepository for JsonGuildRepository {
    async fn get_all_guilds(&self) -> Result<Vec<GuildRecord>, DomainError> {
        let mut records = self.records.lock().await;
        *records = read_records(&self.path).await?;
        Ok(records.clone())
    }

    async fn save_guild(&self, record: &GuildRecord) -> Result<(), DomainError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        match next.iter_mut().find(|r| r.guild_id == record.guild_id) {
            Some(existing) => *existing = record.clone(),
            None => next.push(record.clone()),
        }
        self.write_records(&next).await?;
        *records = next;
        Ok(())
    }

    async fn edit_guild(&self, record: &GuildRecord) -> Result<(), DomainError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let existing = next
            .iter_mut()
            .find(|r| r.guild_id == record.guild_id)
            .ok_or(DomainError::GuildNotFound(record.guild_id))?;
        *existing = record.clone();
        self.write_records(&next).await?;
        *records = next;
        Ok(())
    }

    async fn delete_guild(&self, guild_id: GuildId) -> Result<bool, DomainError> {
        let mut records = self.records.lock().await;
        let Some(index) = records.iter().position(|r| r.guild_id == guild_id) else {
            return Ok(false);
        };
        let mut next = records.clone();
        next.remove(index);
        self.write_records(&next).await?;
        *records = next;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use voicetime_core::repository::GuildConfigRecord;

    use super::*;

    fn record(guild_id: u64) -> GuildRecord {
        GuildRecord {
            guild_id: GuildId(guild_id),
            users: Vec::new(),
            config: GuildConfigRecord::default(),
            extra_data: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_open_creates_missing_store_with_empty_array() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("guilds.json");

        // Act
        let repo = JsonGuildRepository::open(&path).await.unwrap();

        // Assert
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
        assert!(repo.get_all_guilds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_rejects_non_array_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guilds.json");
        std::fs::write(&path, r#"{"guildId": 1}"#).unwrap();

        let result = JsonGuildRepository::open(&path).await;

        assert!(matches!(result, Err(DomainError::MalformedStore(_))));
    }

    #[tokio::test]
    async fn test_open_rejects_unparseable_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guilds.json");
        std::fs::write(&path, "not json").unwrap();

        let result = JsonGuildRepository::open(&path).await;

        assert!(matches!(result, Err(DomainError::MalformedStore(_))));
    }

    #[tokio::test]
    async fn test_writes_survive_reopen() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guilds.json");
        let repo = JsonGuildRepository::open(&path).await.unwrap();
        let mut edited = record(2);
        edited.extra_data = serde_json::json!({"prefix": "!"});

        // Act
        repo.save_guild(&record(1)).await.unwrap();
        repo.save_guild(&record(2)).await.unwrap();
        repo.edit_guild(&edited).await.unwrap();
        let reopened = JsonGuildRepository::open(&path).await.unwrap();

        // Assert
        let stored = reopened.get_all_guilds().await.unwrap();
        assert_eq!(stored, vec![record(1), edited]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_replaces_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonGuildRepository::open(dir.path().join("guilds.json"))
            .await
            .unwrap();
        let mut replacement = record(1);
        replacement.extra_data = serde_json::json!(7);

        repo.save_guild(&record(1)).await.unwrap();
        repo.save_guild(&replacement).await.unwrap();

        assert_eq!(repo.get_all_guilds().await.unwrap(), vec![replacement]);
    }

    #[tokio::test]
    async fn test_edit_of_unknown_guild_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonGuildRepository::open(dir.path().join("guilds.json"))
            .await
            .unwrap();

        let result = repo.edit_guild(&record(5)).await;

        assert!(matches!(result, Err(DomainError::GuildNotFound(GuildId(5)))));
    }

    #[tokio::test]
    async fn test_delete_reports_whether_guild_existed() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonGuildRepository::open(dir.path().join("guilds.json"))
            .await
            .unwrap();
        repo.save_guild(&record(1)).await.unwrap();

        let first = repo.delete_guild(GuildId(1)).await.unwrap();
        let second = repo.delete_guild(GuildId(1)).await.unwrap();

        assert!(first);
        assert!(!second);
        assert!(repo.get_all_guilds().await.unwrap().is_empty());
    }
}
