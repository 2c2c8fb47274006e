//! Domain model for voice session accounting.

pub mod aggregates;
pub mod commands;
pub mod config;
pub mod events;
pub mod policy;
pub mod transitions;
