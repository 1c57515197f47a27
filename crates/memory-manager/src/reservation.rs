// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII reservation that returns its bytes to the ledger on drop.
//!
//! A loaded model holds exactly one [`Reservation`] for its estimated
//! footprint. Unloading the model drops the reservation, so the ledger can
//! never report memory for a model that is no longer resident.

use crate::ledger::LedgerInner;
use std::sync::Arc;

/// A claim on part of a [`MemoryLedger`](crate::MemoryLedger)'s budget.
///
/// # Example
/// ```
/// use memory_manager::{MemoryBudget, MemoryLedger};
///
/// let ledger = MemoryLedger::new(MemoryBudget::from_mb(8));
/// let r = ledger.reserve("tokenizer", 4096).unwrap();
/// assert_eq!(r.label(), "tokenizer");
/// r.release();
/// assert_eq!(ledger.in_use_bytes(), 0);
/// ```
pub struct Reservation {
    label: String,
    bytes: u64,
    ledger: Arc<LedgerInner>,
}

impl Reservation {
    pub(crate) fn new(label: String, bytes: u64, ledger: Arc<LedgerInner>) -> Self {
        Self {
            label,
            bytes,
            ledger,
        }
    }

    /// Size of the claim in bytes.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Label given at reservation time (usually the model id).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the bytes to the ledger now. Same as dropping.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.ledger.release(&self.label, self.bytes);
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("label", &self.label)
            .field("bytes", &self.bytes)
            .finish()
    }
}
