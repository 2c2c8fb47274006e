//! Application layer: the tracker, its handlers and the sweeper.

pub mod command_handlers;
pub mod query_handlers;
pub mod sweeper;
pub mod tracker;
pub mod voice_handlers;
