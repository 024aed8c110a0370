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

//! Per-server circuit breaker.
//!
//! One breaker per configured server. Transitions:
//!
//! - `Closed -> Open` when consecutive failures reach the threshold
//! - `Open -> HalfOpen` lazily, when a call arrives after the open window
//! - `HalfOpen -> Closed` on the first successful probe
//! - `HalfOpen -> Open` on any failed probe (open window restarts)
//!
//! All state lives under a single `parking_lot::Mutex`, so two concurrent
//! callers can never both be admitted as "the" probe when the probe budget
//! is one. Outcome recording is driven by the execution engine after it has
//! classified the failure; caller-input errors never reach [`CircuitBreaker::record_failure`].

use crate::config::CircuitBreakerPolicy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Breaker state, as exposed on the metrics surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
}

/// Per-server failure-tracking state machine.
pub struct CircuitBreaker {
    server_name: String,
    policy: CircuitBreakerPolicy,
    inner: Mutex<BreakerInner>,
}

/// Why a call was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerRejection {
    /// Time until the breaker will admit a probe (zero while half-open)
    pub retry_after: Duration,
}

/// RAII marker for an admitted half-open probe.
///
/// Releases the probe slot on drop if the breaker is still half-open, so a
/// cancelled probe cannot permanently exhaust the probe budget.
pub struct ProbePermit<'a> {
    breaker: &'a CircuitBreaker,
}

impl std::fmt::Debug for ProbePermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbePermit").finish_non_exhaustive()
    }
}

impl Drop for ProbePermit<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }
}

/// Point-in-time view of one breaker, for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub server_name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    /// Milliseconds until the breaker admits a probe (only while open)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl CircuitBreaker {
    /// Create a breaker for one server.
    pub fn new(server_name: impl Into<String>, policy: CircuitBreakerPolicy) -> Self {
        Self {
            server_name: server_name.into(),
            policy,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_in_flight: 0,
            }),
        }
    }

    /// Name of the server this breaker guards.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Decide whether a call may proceed.
    ///
    /// Performs the lazy `Open -> HalfOpen` transition when the open window
    /// has elapsed. Returns a [`ProbePermit`] when the call was admitted as
    /// a half-open probe; the permit must be held for the duration of the
    /// transport attempt.
    pub fn admit(&self) -> Result<Option<ProbePermit<'_>>, BreakerRejection> {
        let mut inner = self.inner.lock();

        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO);
            let open_window = Duration::from_millis(self.policy.open_duration_ms);

            if elapsed >= open_window {
                inner.state = BreakerState::HalfOpen;
                inner.probes_in_flight = 0;
                tracing::debug!(server = %self.server_name, "circuit breaker half-open, probing");
            } else {
                return Err(BreakerRejection {
                    retry_after: open_window - elapsed,
                });
            }
        }

        match inner.state {
            BreakerState::Closed => Ok(None),
            BreakerState::HalfOpen => {
                if inner.probes_in_flight < self.policy.half_open_probe_count {
                    inner.probes_in_flight += 1;
                    Ok(Some(ProbePermit { breaker: self }))
                } else {
                    // Probe budget is already committed; treat as still open.
                    Err(BreakerRejection {
                        retry_after: Duration::ZERO,
                    })
                }
            }
            // Unreachable: Open is handled above.
            BreakerState::Open => Err(BreakerRejection {
                retry_after: Duration::from_millis(self.policy.open_duration_ms),
            }),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                tracing::info!(server = %self.server_name, "circuit breaker closed after probe success");
            }
            // A call admitted before the trip may finish after it; ignore.
            BreakerState::Open => {}
        }
    }

    /// Record one failed run against this server.
    ///
    /// The engine calls this once per exhausted retry sequence, not once
    /// per attempt.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.policy.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        server = %self.server_name,
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!(server = %self.server_name, "probe failed, circuit breaker re-opened");
            }
            BreakerState::Open => {}
        }
    }

    /// Current state (without triggering the lazy half-open transition).
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Point-in-time view for the metrics surface.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let retry_after_ms = match inner.state {
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                let open_window = Duration::from_millis(self.policy.open_duration_ms);
                Some(open_window.saturating_sub(elapsed).as_millis() as u64)
            }
            _ => None,
        };

        BreakerSnapshot {
            server_name: self.server_name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            retry_after_ms,
        }
    }
}
