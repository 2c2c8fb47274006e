//! Test RNG — deterministic `DeterministicRng` implementations for tests.

use voicetime_core::rng::DeterministicRng;

/// A no-op RNG that always returns `min`. Suitable for tests that do not
/// depend on specific random values.
#[derive(Debug)]
pub struct MockRng;

impl DeterministicRng for MockRng {
    fn next_u64_range(&mut self, min: u64, _max: u64) -> u64 {
        min
    }
}

/// An RNG that returns values from a predetermined sequence. Panics if the
/// sequence is exhausted. Used in tests that need specific, repeatable xp
/// awards.
#[derive(Debug)]
pub struct SequenceRng {
    values: Vec<u64>,
    index: usize,
}

impl SequenceRng {
    /// Create a new `SequenceRng` with the given values.
    #[must_use]
    pub fn new(values: Vec<u64>) -> Self {
        Self { values, index: 0 }
    }
}

impl DeterministicRng for SequenceRng {
    fn next_u64_range(&mut self, _min: u64, _max: u64) -> u64 {
        let val = self.values[self.index];
        self.index += 1;
        val
    }
}
