// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! Budget accounting for on-device model residency.
//!
//! # Key Components
//!
//! - [`MemoryBudget`]: a hard ceiling with human-readable parsing
//!   (`"512M"`, `"3G"`, etc.).
//! - [`MemoryLedger`]: enforces the budget and hands out reservations.
//! - [`Reservation`]: an RAII claim. Dropping it returns the bytes.
//! - [`MemoryStats`]: in-use / budget / peak figures for `get_memory_stats`.
//!
//! # Ownership Model
//!
//! ```text
//! MemoryLedger::reserve(label, bytes)
//!       │
//!       ▼
//!   Reservation  ◄─── holds Arc<LedgerInner>
//!       │
//!       │  drop()
//!       ▼
//!   LedgerInner::release()  ──► in_use_bytes -= bytes
//! ```
//!
//! The loader reserves a model's whole estimated footprint before asking
//! the backend to load anything, so a budget failure happens before any
//! allocation.

mod budget;
mod error;
mod ledger;
mod reservation;
mod stats;

pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use ledger::MemoryLedger;
pub use reservation::Reservation;
pub use stats::MemoryStats;
