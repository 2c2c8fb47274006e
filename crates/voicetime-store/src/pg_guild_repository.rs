//! `PostgreSQL` implementation of the `GuildRepository` trait.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;

use voicetime_core::error::DomainError;
use voicetime_core::ids::GuildId;
use voicetime_core::repository::{GuildRecord, GuildRepository};

use crate::schema::CREATE_GUILDS_TABLE;

/// PostgreSQL-backed guild repository. Each guild is one row holding the
/// full record as JSONB.
#[derive(Debug, Clone)]
pub struct PgGuildRepository {
    pool: PgPool,
}

impl PgGuildRepository {
    /// Creates a new `PgGuildRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the guilds table when missing.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the statement fails.
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        sqlx::raw_sql(CREATE_GUILDS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

fn db_error(e: sqlx::Error) -> DomainError {
    match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            DomainError::MalformedStore(e.to_string())
        }
        other => DomainError::Infrastructure(other.to_string()),
    }
}

fn db_id(guild_id: GuildId) -> Result<i64, DomainError> {
    i64::try_from(guild_id.get())
        .map_err(|_| DomainError::Validation(format!("guild id {guild_id} out of range")))
}

#[async_trait]
impl GuildRepository for PgGuildRepository {
    async fn get_all_guilds(&self) -> Result<Vec<GuildRecord>, DomainError> {
        let rows: Vec<(Json<GuildRecord>,)> =
            sqlx::query_as("SELECT record FROM guilds ORDER BY guild_id")
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;
        debug!(guilds = rows.len(), "loaded guild rows");
        Ok(rows.into_iter().map(|(Json(record),)| record).collect())
    }

    async fn save_guild(&self, record: &GuildRecord) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO guilds (guild_id, record, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (guild_id) DO UPDATE SET record = EXCLUDED.record, updated_at = NOW()",
        )
        .bind(db_id(record.guild_id)?)
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn edit_guild(&self, record: &GuildRecord) -> Result<(), DomainError> {
        let result =
            sqlx::query("UPDATE guilds SET record = $2, updated_at = NOW() WHERE guild_id = $1")
                .bind(db_id(record.guild_id)?)
                .bind(Json(record))
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::GuildNotFound(record.guild_id));
        }
        Ok(())
    }

    async fn delete_guild(&self, guild_id: GuildId) -> Result<bool, DomainError> {
        let result = sqlx::query("DELETE FROM guilds WHERE guild_id = $1")
            .bind(db_id(guild_id)?)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}
