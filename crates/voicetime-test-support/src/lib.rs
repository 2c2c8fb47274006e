//! Shared test mocks and utilities for the voicetime voice activity tracker.

mod clock;
mod platform;
mod repository;
mod rng;

pub use clock::ManualClock;
pub use platform::FakePlatform;
pub use repository::{FailingGuildRepository, InMemoryGuildRepository, RepositoryWrite};
pub use rng::{MockRng, SequenceRng};
