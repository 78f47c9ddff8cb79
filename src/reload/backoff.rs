// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{retry, watch};
use rand::Rng;
use std::time::Duration;

/// Per-key restart retry delay: `min(2^(attempt-1) * base, cap)`
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    base: Duration,
    cap: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(retry::BASE_DELAY_SECS),
            Duration::from_secs(retry::CAP_DELAY_SECS),
        )
    }
}

impl RetryBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

/// Jittered exponential backoff for list/watch failures.
///
/// Each sleep is `current * (0.5 + rand[0,1))`; `current` doubles up to the cap and
/// resets to the floor after any successful iteration.
#[derive(Debug, Clone)]
pub struct JitteredBackoff {
    floor: Duration,
    cap: Duration,
    current: Duration,
}

impl Default for JitteredBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(watch::BACKOFF_FLOOR_SECS),
            Duration::from_secs(watch::BACKOFF_CAP_SECS),
        )
    }
}

impl JitteredBackoff {
    pub fn new(floor: Duration, cap: Duration) -> Self {
        Self {
            floor,
            cap,
            current: floor,
        }
    }

    /// Delay for the next sleep, advancing the backoff
    pub fn next_delay(&mut self) -> Duration {
        let jitter = 0.5 + rand::thread_rng().gen::<f64>();
        let delay = self.current.mul_f64(jitter);
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}
