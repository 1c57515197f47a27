// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budget-enforced reservation ledger.
//!
//! The [`MemoryLedger`] does not hand out bytes itself. Model weights live
//! wherever the execution backend puts them (mmap, device memory). The
//! ledger tracks how much of the budget each resident component claims:
//!
//! 1. Reservations that would exceed the budget fail with
//!    [`MemoryError::OverBudget`] and leave the ledger untouched.
//! 2. Every successful reservation is an RAII [`Reservation`]; dropping it
//!    returns the bytes.
//! 3. Peaks and counts are recorded for `get_memory_stats`.
//!
//! # Thread Safety
//! `MemoryLedger` is cheap to clone and `Send + Sync`. The in-use counter is
//! updated with a compare-and-swap loop, so two racing reservations can
//! never jointly overshoot the budget.

use crate::stats::Counters;
use crate::{MemoryBudget, MemoryError, MemoryStats, Reservation};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Shared ledger state, held by the ledger and by every live reservation.
pub(crate) struct LedgerInner {
    budget_bytes: AtomicU64,
    in_use_bytes: AtomicU64,
    counters: Mutex<Counters>,
}

impl LedgerInner {
    /// Called by `Reservation::drop`.
    pub(crate) fn release(&self, label: &str, bytes: u64) {
        self.in_use_bytes.fetch_sub(bytes, Ordering::AcqRel);
        if let Ok(mut c) = self.counters.lock() {
            c.record_release();
        }
        tracing::debug!("released {bytes} bytes for '{label}'");
    }
}

/// Tracks memory claimed by loaded models against a hard budget.
///
/// # Example
/// ```
/// use memory_manager::{MemoryBudget, MemoryLedger};
///
/// let ledger = MemoryLedger::new(MemoryBudget::from_gb(3));
/// let weights = ledger.reserve("model-a", 2 * 1024 * 1024 * 1024).unwrap();
/// assert!(ledger.reserve("model-b", 2 * 1024 * 1024 * 1024).is_err());
///
/// drop(weights);
/// assert_eq!(ledger.in_use_bytes(), 0);
/// ```
#[derive(Clone)]
pub struct MemoryLedger {
    inner: Arc<LedgerInner>,
}

impl MemoryLedger {
    /// Creates an empty ledger with the given budget.
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                budget_bytes: AtomicU64::new(budget.as_bytes()),
                in_use_bytes: AtomicU64::new(0),
                counters: Mutex::new(Counters::default()),
            }),
        }
    }

    /// Reserves `bytes` under `label`.
    ///
    /// Fails without side effects (other than the rejection counter) if the
    /// reservation would exceed the budget.
    pub fn reserve(&self, label: &str, bytes: u64) -> Result<Reservation, MemoryError> {
        if bytes == 0 {
            return Err(MemoryError::ZeroSizedReservation(label.to_string()));
        }

        let budget = self.inner.budget_bytes.load(Ordering::Acquire);
        let claimed = self
            .inner
            .in_use_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(bytes)
                    .filter(|&after| after <= budget)
            });

        match claimed {
            Ok(before) => {
                let after = before + bytes;
                if let Ok(mut c) = self.inner.counters.lock() {
                    c.record_reserve(after);
                }
                tracing::debug!("reserved {bytes} bytes for '{label}' ({after}/{budget} in use)");
                Ok(Reservation::new(label.to_string(), bytes, Arc::clone(&self.inner)))
            }
            Err(current) => {
                if let Ok(mut c) = self.inner.counters.lock() {
                    c.record_rejection();
                }
                Err(MemoryError::OverBudget {
                    label: label.to_string(),
                    requested_bytes: bytes,
                    available_bytes: budget.saturating_sub(current),
                    budget_bytes: budget,
                })
            }
        }
    }

    /// Bytes held by live reservations.
    pub fn in_use_bytes(&self) -> u64 {
        self.inner.in_use_bytes.load(Ordering::Acquire)
    }

    /// Bytes left before the budget is reached.
    pub fn available_bytes(&self) -> u64 {
        self.budget().as_bytes().saturating_sub(self.in_use_bytes())
    }

    /// The current budget.
    pub fn budget(&self) -> MemoryBudget {
        MemoryBudget::from_bytes(self.inner.budget_bytes.load(Ordering::Acquire))
    }

    /// Replaces the budget, e.g. after a device profile refresh.
    ///
    /// Live reservations are never revoked; if the new budget is below the
    /// current usage, further reservations fail until enough are dropped.
    pub fn set_budget(&self, budget: MemoryBudget) {
        self.inner
            .budget_bytes
            .store(budget.as_bytes(), Ordering::Release);
        tracing::info!("memory budget set to {budget}");
    }

    /// Returns a snapshot of the ledger's statistics.
    pub fn stats(&self) -> MemoryStats {
        let in_use_bytes = self.in_use_bytes();
        let budget_bytes = self.budget().as_bytes();
        match self.inner.counters.lock() {
            Ok(c) => MemoryStats {
                in_use_bytes,
                budget_bytes,
                peak_in_use_bytes: c.peak_in_use_bytes,
                live_reservations: c.live_reservations,
                peak_live_reservations: c.peak_live_reservations,
                total_reservations: c.total_reservations,
                total_releases: c.total_releases,
                rejected_reservations: c.rejected_reservations,
            },
            Err(_) => MemoryStats {
                in_use_bytes,
                budget_bytes,
                ..Default::default()
            },
        }
    }
}

impl std::fmt::Debug for MemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLedger")
            .field("budget", &self.budget())
            .field("in_use_bytes", &self.in_use_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_reserve_and_drop() {
        let ledger = MemoryLedger::new(MemoryBudget::from_mb(1));
        let r = ledger.reserve("kv", 1024).unwrap();
        assert_eq!(ledger.in_use_bytes(), 1024);
        assert_eq!(r.bytes(), 1024);
        drop(r);
        assert_eq!(ledger.in_use_bytes(), 0);
    }

    #[test]
    fn test_over_budget_leaves_ledger_unchanged() {
        let ledger = MemoryLedger::new(MemoryBudget::from_gb(3));
        let _a = ledger.reserve("model-a", 2 * GIB).unwrap();
        let before = ledger.in_use_bytes();

        let err = ledger.reserve("model-b", 4 * GIB).unwrap_err();
        assert!(matches!(err, MemoryError::OverBudget { available_bytes, .. } if available_bytes == GIB));
        assert_eq!(ledger.in_use_bytes(), before);
        assert_eq!(ledger.stats().rejected_reservations, 1);
    }

    #[test]
    fn test_exact_fit() {
        let ledger = MemoryLedger::new(MemoryBudget::from_bytes(1000));
        let _r = ledger.reserve("all", 1000).unwrap();
        assert_eq!(ledger.available_bytes(), 0);
        assert!(ledger.reserve("one-more", 1).is_err());
    }

    #[test]
    fn test_zero_reservation() {
        let ledger = MemoryLedger::new(MemoryBudget::from_mb(1));
        assert!(matches!(
            ledger.reserve("empty", 0),
            Err(MemoryError::ZeroSizedReservation(_))
        ));
    }

    #[test]
    fn test_set_budget_does_not_revoke() {
        let ledger = MemoryLedger::new(MemoryBudget::from_bytes(1000));
        let _r = ledger.reserve("a", 800).unwrap();
        ledger.set_budget(MemoryBudget::from_bytes(500));
        assert_eq!(ledger.in_use_bytes(), 800);
        assert_eq!(ledger.available_bytes(), 0);
        assert!(ledger.reserve("b", 1).is_err());
    }

    #[test]
    fn test_stats_peaks() {
        let ledger = MemoryLedger::new(MemoryBudget::from_bytes(10_000));
        let a = ledger.reserve("a", 1000).unwrap();
        let b = ledger.reserve("b", 2000).unwrap();
        drop(a);
        drop(b);
        let s = ledger.stats();
        assert_eq!(s.peak_in_use_bytes, 3000);
        assert_eq!(s.peak_live_reservations, 2);
        assert_eq!(s.total_reservations, s.total_releases);
        assert_eq!(s.in_use_bytes, 0);
    }

    #[test]
    fn test_concurrent_reservations_never_overshoot() {
        let ledger = MemoryLedger::new(MemoryBudget::from_bytes(10 * 100));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let l = ledger.clone();
                std::thread::spawn(move || l.reserve("t", 100).ok())
            })
            .collect();
        let held: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(held.len(), 10);
        assert_eq!(ledger.in_use_bytes(), 1000);
    }

    #[test]
    fn test_debug_format() {
        let ledger = MemoryLedger::new(MemoryBudget::from_mb(64));
        let debug = format!("{ledger:?}");
        assert!(debug.contains("MemoryLedger"));
        assert!(debug.contains("budget"));
    }
}
