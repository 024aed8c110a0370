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

//! Admission control for in-flight tool calls.
//!
//! A counting semaphore bounds the number of concurrent `execute` calls
//! across all servers. Acquisition is strictly non-blocking: when the limit
//! is reached the caller gets an immediate rejection (mapped to
//! `Overloaded` by the engine), never a queued wait. Permits are RAII, so
//! release happens exactly once even if a call unwinds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds concurrent in-flight calls.
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl AdmissionController {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Try to claim an execution slot without waiting.
    ///
    /// Returns `None` when the limit is reached. The permit releases its
    /// slot on drop.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Some(permit)
            }
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Configured concurrency limit.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Current statistics.
    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            available_slots: self.semaphore.available_permits(),
        }
    }
}

/// Point-in-time admission statistics.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AdmissionStats {
    pub accepted: u64,
    pub rejected: u64,
    pub available_slots: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_at_limit_without_waiting() {
        let controller = AdmissionController::new(2);

        let p1 = controller.try_acquire();
        let p2 = controller.try_acquire();
        assert!(p1.is_some() && p2.is_some());

        assert!(controller.try_acquire().is_none());

        let stats = controller.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.available_slots, 0);
    }

    #[test]
    fn test_permit_drop_releases_slot() {
        let controller = AdmissionController::new(1);

        let permit = controller.try_acquire().unwrap();
        assert!(controller.try_acquire().is_none());

        drop(permit);
        assert!(controller.try_acquire().is_some());
    }
}
