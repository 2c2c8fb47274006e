//! Route modules.

pub mod guilds;
pub mod health;
pub mod users;
pub mod voice_state;
