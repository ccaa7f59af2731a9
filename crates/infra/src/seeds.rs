//! Seed sources for transaction generation.
//!
//! A seed is drawn once per `TriggerActivated` and stored in its payload;
//! everything derived from it (spawn angles, character instance ids) is then
//! reproducible from the log alone.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

pub trait SeedSource: Send + Sync {
    fn next_seed(&self) -> u64;
}

impl<T> SeedSource for std::sync::Arc<T>
where
    T: SeedSource + ?Sized,
{
    fn next_seed(&self) -> u64 {
        (**self).next_seed()
    }
}

/// Thread-local OS-seeded randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSeedSource;

impl ThreadRngSeedSource {
    pub fn new() -> Self {
        Self
    }
}

impl SeedSource for ThreadRngSeedSource {
    fn next_seed(&self) -> u64 {
        rand::thread_rng().r#gen()
    }
}

/// Counting seeds for tests: `start`, `start + 1`, ...
#[derive(Debug, Default)]
pub struct FixedSeedSource {
    next: AtomicU64,
}

impl FixedSeedSource {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl SeedSource for FixedSeedSource {
    fn next_seed(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
