// Copyright 2025 Toolmesh (https://github.com/toolmesh)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Retry policy with jittered exponential backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-server retry policy.
///
/// `max_attempts` counts transport attempts, not retries: a policy of 3
/// allows the initial call plus two retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum transport attempts per server
    pub max_attempts: u32,
    /// Base delay before the first retry (ms)
    pub base_delay_ms: u64,
    /// Cap applied after jitter (ms)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay to wait after the given failed attempt (1-based).
    ///
    /// `base * 2^(attempt-1)`, scaled by a uniform jitter factor in
    /// [0.5, 1.5], then capped at `max_delay_ms`. Jitter draws from the
    /// thread-local RNG; callers needing bounds should assert the range,
    /// not exact values.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let exponent = attempt.saturating_sub(1).min(32);
        let base = self.base_delay_ms as f64 * 2f64.powi(exponent as i32);
        let jitter = rand::thread_rng().gen_range(0.5..=1.5);
        let delayed = (base * jitter).min(self.max_delay_ms as f64);
        Duration::from_millis(delayed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_delay_within_jitter_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
        };

        for _ in 0..100 {
            let d1 = policy.delay_for_attempt(1).as_millis() as u64;
            assert!((50..=150).contains(&d1), "attempt 1 delay {} out of bounds", d1);

            let d2 = policy.delay_for_attempt(2).as_millis() as u64;
            assert!((100..=300).contains(&d2), "attempt 2 delay {} out of bounds", d2);
        }
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 2000,
        };

        for _ in 0..50 {
            assert!(policy.delay_for_attempt(8) <= Duration::from_millis(2000));
        }
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_cap(
            base in 1u64..5000,
            cap in 1u64..20_000,
            attempt in 1u32..16,
        ) {
            let policy = RetryPolicy {
                max_attempts: 16,
                base_delay_ms: base,
                max_delay_ms: cap,
            };
            prop_assert!(policy.delay_for_attempt(attempt).as_millis() as u64 <= cap);
        }
    }
}
