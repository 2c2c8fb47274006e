//! Guild store database schema.

/// SQL to create the guilds table.
pub const CREATE_GUILDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS guilds (
    guild_id    BIGINT PRIMARY KEY,
    record      JSONB NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";
