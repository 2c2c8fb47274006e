//! Voicetime — voice session accounting.
//!
//! Responsible for turning voice presence transitions into per-channel
//! session time, experience points and levels, under a per-guild
//! eligibility configuration.

pub mod application;
pub mod domain;
