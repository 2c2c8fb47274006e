//! Guild storage adapters for the voicetime voice activity tracker.

pub mod json_guild_repository;
pub mod pg_guild_repository;
pub mod schema;
