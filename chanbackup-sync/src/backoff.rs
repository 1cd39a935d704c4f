//! Exponential backoff with jitter.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::num::Saturating;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// Retry schedule for one kind of operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First delay, before jitter.
    pub initial_delay_ms: u64,

    /// Upper bound for any delay, jitter included.
    pub max_delay_ms: u64,

    /// Number of retries before giving up. `None` retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl BackoffConfig {
    pub fn new(initial: Duration, max: Duration, max_retries: Option<u32>) -> Self {
        Self {
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            max_retries,
        }
    }

    pub fn validate(&self, name: &str) -> SyncResult<()> {
        if self.initial_delay_ms == 0 {
            return Err(SyncError::Config(format!("{name}: initial_delay_ms must be positive")));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(SyncError::Config(format!(
                "{name}: max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        Ok(())
    }

    /// Fresh delay sequence with a random seed.
    pub fn schedule(&self) -> ExponentialBackoff<StdRng> {
        self.schedule_with_seed(rand::random())
    }

    pub fn schedule_with_seed(&self, seed: u64) -> ExponentialBackoff<StdRng> {
        ExponentialBackoff::new_with_seed(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_retries,
            seed,
        )
    }
}

/// Iterator over retry delays: `min * 2^n` plus a random offset, capped at
/// `max`. Ends after `max_retries` items when a limit is set.
#[derive(Debug)]
pub struct ExponentialBackoff<R> {
    min_backoff: Duration,
    max_backoff: Duration,
    max_retries: Option<u32>,
    sequence_index: u32,
    max_jitter_ms: u64,
    rng: R,
}

impl ExponentialBackoff<StdRng> {
    /// Jitter never exceeds this, nor the minimum delay itself.
    const MAX_RAND_OFFSET_MS: u64 = 1000;

    pub fn new_with_seed(
        min_backoff: Duration,
        max_backoff: Duration,
        max_retries: Option<u32>,
        seed: u64,
    ) -> Self {
        Self::new_with_rng(min_backoff, max_backoff, max_retries, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> ExponentialBackoff<R> {
    pub fn new_with_rng(
        min_backoff: Duration,
        max_backoff: Duration,
        max_retries: Option<u32>,
        rng: R,
    ) -> Self {
        let max_jitter_ms = (min_backoff.as_millis() as u64)
            .min(ExponentialBackoff::<StdRng>::MAX_RAND_OFFSET_MS);
        Self {
            min_backoff,
            max_backoff,
            max_retries,
            sequence_index: 0,
            max_jitter_ms,
            rng,
        }
    }

    /// Retries handed out so far.
    pub fn attempts(&self) -> u32 {
        self.sequence_index
    }

    fn next_delay(&mut self) -> Duration {
        let jitter = Duration::from_millis(self.rng.random_range(0..=self.max_jitter_ms));
        let delay = self
            .min_backoff
            .saturating_mul(Saturating(2u32).pow(self.sequence_index.min(31)).0)
            .saturating_add(jitter)
            .min(self.max_backoff);

        self.sequence_index = self.sequence_index.saturating_add(1);
        delay
    }
}

impl<R: Rng> Iterator for ExponentialBackoff<R> {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(limit) = self.max_retries
            && self.sequence_index >= limit
        {
            return None;
        }
        Some(self.next_delay())
    }
}
