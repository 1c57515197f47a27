// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reservation statistics for `get_memory_stats` and diagnostics.

use std::fmt;

/// Point-in-time view of the ledger, as reported to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryStats {
    /// Bytes currently reserved by live reservations.
    pub in_use_bytes: u64,
    /// The ledger's budget ceiling.
    pub budget_bytes: u64,
    /// Highest `in_use_bytes` ever observed.
    pub peak_in_use_bytes: u64,
    /// Number of live reservations.
    pub live_reservations: u64,
    /// Highest number of simultaneously live reservations.
    pub peak_live_reservations: u64,
    /// Successful reservations over the ledger's lifetime.
    pub total_reservations: u64,
    /// Reservations returned (dropped).
    pub total_releases: u64,
    /// Reservations refused because they would exceed the budget.
    pub rejected_reservations: u64,
}

impl MemoryStats {
    /// Returns `budget - in_use`, saturating at zero.
    pub fn available_bytes(&self) -> u64 {
        self.budget_bytes.saturating_sub(self.in_use_bytes)
    }

    /// Returns the fraction of the budget in use, in `[0.0, 1.0]`.
    pub fn utilisation(&self) -> f64 {
        if self.budget_bytes == 0 {
            return 0.0;
        }
        (self.in_use_bytes as f64 / self.budget_bytes as f64).min(1.0)
    }

    /// Returns a one-line human-readable summary.
    pub fn summary(&self) -> String {
        let mb = |b: u64| b as f64 / (1024.0 * 1024.0);
        format!(
            "Memory: {:.1}/{:.1} MB in use ({:.0}%), peak {:.1} MB, \
             {} live reservations, {} rejected",
            mb(self.in_use_bytes),
            mb(self.budget_bytes),
            self.utilisation() * 100.0,
            mb(self.peak_in_use_bytes),
            self.live_reservations,
            self.rejected_reservations,
        )
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Mutable counters kept behind the ledger's mutex.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) peak_in_use_bytes: u64,
    pub(crate) live_reservations: u64,
    pub(crate) peak_live_reservations: u64,
    pub(crate) total_reservations: u64,
    pub(crate) total_releases: u64,
    pub(crate) rejected_reservations: u64,
}

impl Counters {
    pub(crate) fn record_reserve(&mut self, in_use_after: u64) {
        self.total_reservations += 1;
        self.live_reservations += 1;
        self.peak_live_reservations = self.peak_live_reservations.max(self.live_reservations);
        self.peak_in_use_bytes = self.peak_in_use_bytes.max(in_use_after);
    }

    pub(crate) fn record_release(&mut self) {
        self.total_releases += 1;
        self.live_reservations = self.live_reservations.saturating_sub(1);
    }

    pub(crate) fn record_rejection(&mut self) {
        self.rejected_reservations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_and_utilisation() {
        let s = MemoryStats {
            in_use_bytes: 750,
            budget_bytes: 1000,
            ..Default::default()
        };
        assert_eq!(s.available_bytes(), 250);
        assert!((s.utilisation() - 0.75).abs() < 1e-9);
        assert_eq!(MemoryStats::default().utilisation(), 0.0);
    }

    #[test]
    fn test_counters_track_peaks() {
        let mut c = Counters::default();
        c.record_reserve(100);
        c.record_reserve(300);
        c.record_release();
        c.record_reserve(200);
        assert_eq!(c.peak_in_use_bytes, 300);
        assert_eq!(c.peak_live_reservations, 2);
        assert_eq!(c.live_reservations, 2);
        assert_eq!(c.total_reservations, 3);
        assert_eq!(c.total_releases, 1);
    }

    #[test]
    fn test_summary() {
        let s = MemoryStats {
            in_use_bytes: 512 * 1024 * 1024,
            budget_bytes: 1024 * 1024 * 1024,
            live_reservations: 1,
            ..Default::default()
        };
        let text = s.summary();
        assert!(text.contains("512.0/1024.0 MB"));
        assert!(text.contains("50%"));
        assert!(text.contains("1 live reservations"));
    }
}
