// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for memory accounting.

/// Errors that can occur when reserving memory against a budget.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The reservation would push the ledger past its budget.
    #[error("insufficient memory for '{label}': requested {requested_bytes} bytes, only {available_bytes} available (budget: {budget_bytes})")]
    OverBudget {
        label: String,
        requested_bytes: u64,
        available_bytes: u64,
        budget_bytes: u64,
    },

    /// Attempted to reserve zero bytes.
    #[error("cannot reserve zero bytes for '{0}'")]
    ZeroSizedReservation(String),

    /// A budget string could not be parsed.
    #[error("invalid memory budget {0}")]
    InvalidBudget(String),
}
