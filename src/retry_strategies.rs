// Copyright Keyline Project Contributors - SPDX Identifier: Apache-2.0

//! Reconnect backoff policy.

use std::time::Duration;

use rand::Rng;

pub(crate) const EXPONENT_BASE: u32 = 2;
pub(crate) const FACTOR: u32 = 100;
pub(crate) const NUMBER_OF_RETRIES: u32 = 3;

/// Exponential backoff with full jitter, bounded by a retry count.
///
/// The delay before retry `n` (zero-based) is drawn uniformly from
/// `0..=factor * exponent_base^(n + 1)` milliseconds.
#[derive(Clone, Debug)]
pub struct RetryStrategy {
    factor: u32,
    exponent_base: u32,
    number_of_retries: u32,
}

impl RetryStrategy {
    pub fn new(exponent_base: u32, factor: u32, number_of_retries: u32) -> Self {
        let exponent_base = if exponent_base > 0 {
            exponent_base
        } else {
            EXPONENT_BASE
        };
        let factor = if factor > 0 { factor } else { FACTOR };

        RetryStrategy {
            factor,
            exponent_base,
            number_of_retries,
        }
    }

    /// A fixed-interval strategy is an exponential one with base 1.
    pub fn fixed(interval_millis: u32, number_of_retries: u32) -> Self {
        Self::new(1, interval_millis, number_of_retries)
    }

    pub fn number_of_retries(&self) -> u32 {
        self.number_of_retries
    }

    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = (self.factor as u64)
            .saturating_mul((self.exponent_base as u64).saturating_pow(attempt.saturating_add(1)));
        jitter(Duration::from_millis(ceiling))
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(EXPONENT_BASE, FACTOR, NUMBER_OF_RETRIES)
    }
}

fn jitter(duration: Duration) -> Duration {
    duration.mul_f64(rand::thread_rng().gen_range(0.0..1.0))
}
