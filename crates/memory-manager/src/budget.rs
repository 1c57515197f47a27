// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory budget configuration and parsing.
//!
//! A [`MemoryBudget`] is the hard ceiling a loaded model (weights, KV cache
//! and scratch space) must fit under. Budgets come from three places: the
//! device probe, the caller's `max_memory_bytes`, and the runtime config.
//! The effective budget is the smallest of those that are set.

use crate::MemoryError;
use std::fmt;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// A hard memory ceiling for model residency.
///
/// # Parsing
/// Supports human-readable strings with binary suffixes:
/// - `"512M"` or `"512MB"` → 512 × 1024² bytes
/// - `"3G"` or `"3GB"` → 3 × 1024³ bytes
/// - `"2048K"` or `"2048KB"` → 2048 × 1024 bytes
/// - `"1073741824"` → raw byte count
///
/// # Examples
/// ```
/// use memory_manager::MemoryBudget;
///
/// let b = MemoryBudget::parse("3G").unwrap();
/// assert_eq!(b.as_mb(), 3072);
///
/// let capped = b.min(MemoryBudget::from_gb(2));
/// assert_eq!(capped, MemoryBudget::from_gb(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: u64,
}

impl MemoryBudget {
    /// Creates a budget from a byte count.
    pub fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    /// Creates a budget from mebibytes.
    pub fn from_mb(mb: u64) -> Self {
        Self { bytes: mb * MIB }
    }

    /// Creates a budget from gibibytes.
    pub fn from_gb(gb: u64) -> Self {
        Self { bytes: gb * GIB }
    }

    /// Returns the budget in bytes.
    pub fn as_bytes(&self) -> u64 {
        self.bytes
    }

    /// Returns the budget in mebibytes (truncated).
    pub fn as_mb(&self) -> u64 {
        self.bytes / MIB
    }

    /// Returns the tighter of two budgets.
    pub fn min(self, other: Self) -> Self {
        if other.bytes < self.bytes {
            other
        } else {
            self
        }
    }

    /// Tightens the budget by an optional caller-supplied ceiling.
    ///
    /// `None` and `Some(0)` both mean "no ceiling".
    pub fn capped_by(self, ceiling_bytes: Option<u64>) -> Self {
        match ceiling_bytes {
            Some(c) if c > 0 => self.min(Self::from_bytes(c)),
            _ => self,
        }
    }

    /// Returns `ratio` of this budget, clamped to `[0.0, 1.0]`.
    pub fn fraction(self, ratio: f64) -> Self {
        let ratio = ratio.clamp(0.0, 1.0);
        Self {
            bytes: (self.bytes as f64 * ratio) as u64,
        }
    }

    /// Returns `true` if `bytes` fits within this budget.
    pub fn admits(&self, bytes: u64) -> bool {
        bytes <= self.bytes
    }

    /// Parses a human-readable budget string.
    ///
    /// Accepted formats: `"512M"`, `"512MB"`, `"3G"`, `"3GB"`, `"2048K"`,
    /// `"2048KB"`, `"100B"`, or a plain byte count. Case-insensitive.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MemoryError::InvalidBudget("empty budget string".into()));
        }

        let upper = s.to_uppercase();
        let (num_str, multiplier) = [("GB", GIB), ("G", GIB), ("MB", MIB), ("M", MIB), ("KB", KIB), ("K", KIB), ("B", 1)]
            .iter()
            .find(|(suffix, _)| upper.ends_with(suffix))
            .map(|(suffix, mult)| (&s[..s.len() - suffix.len()], *mult))
            .unwrap_or((s, 1));

        let value: u64 = num_str.trim().parse().map_err(|_| {
            MemoryError::InvalidBudget(format!(
                "'{s}': expected a number followed by an optional suffix (K, M, G)"
            ))
        })?;

        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| MemoryError::InvalidBudget(format!("'{s}' overflows u64")))?;

        if bytes == 0 {
            return Err(MemoryError::InvalidBudget(format!("'{s}' is zero")));
        }

        Ok(Self { bytes })
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_bytes(self.bytes, f)
    }
}

/// Formats a byte count with the largest exact binary unit.
pub(crate) fn format_bytes(bytes: u64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if bytes >= GIB && bytes % GIB == 0 {
        write!(f, "{} GB", bytes / GIB)
    } else if bytes >= MIB && bytes % MIB == 0 {
        write!(f, "{} MB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        write!(f, "{} KB", bytes / KIB)
    } else if bytes >= MIB {
        write!(f, "{:.2} MB", bytes as f64 / MIB as f64)
    } else {
        write!(f, "{bytes} B")
    }
}
