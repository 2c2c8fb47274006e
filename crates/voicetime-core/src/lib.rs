//! Voicetime Core — shared domain abstractions.
//!
//! This crate defines the fundamental traits and types that the tracking
//! engine, the storage adapters and the server depend on. It contains no
//! infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod ids;
pub mod platform;
pub mod repository;
pub mod rng;
