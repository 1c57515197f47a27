// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host memory via `/proc/meminfo`.
//!
//! `MemAvailable` is the kernel's estimate of what a new allocation can
//! use without swapping; the model budget is derived from it.

use crate::ProbeError;
use std::path::Path;

/// Host memory state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MemoryInfo {
    /// Total physical memory in bytes.
    pub total_bytes: u64,
    /// Available memory (as reported by the kernel) in bytes.
    pub available_bytes: u64,
}

impl MemoryInfo {
    /// Reads memory information from a `/proc/meminfo`-formatted file.
    pub fn read_from(path: &Path) -> Result<Self, ProbeError> {
        let content = std::fs::read_to_string(path).map_err(|e| ProbeError::ReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    /// Parses `/proc/meminfo` content.
    pub(crate) fn parse(content: &str, source_path: &Path) -> Result<Self, ProbeError> {
        let mut total_kb: Option<u64> = None;
        let mut available_kb: Option<u64> = None;

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            match key {
                "MemTotal:" => total_kb = Some(parse_kb_value(value, source_path)?),
                "MemAvailable:" => available_kb = Some(parse_kb_value(value, source_path)?),
                _ => {}
            }
            if total_kb.is_some() && available_kb.is_some() {
                break;
            }
        }

        let missing = |field: &str| ProbeError::ParseError {
            path: source_path.display().to_string(),
            detail: format!("{field} not found"),
        };
        let total_kb = total_kb.ok_or_else(|| missing("MemTotal"))?;
        let available_kb = available_kb.ok_or_else(|| missing("MemAvailable"))?;

        Ok(Self {
            total_bytes: total_kb.saturating_mul(1024),
            available_bytes: available_kb.saturating_mul(1024),
        })
    }

    /// Available memory in megabytes.
    pub fn available_mb(&self) -> u64 {
        self.available_bytes / (1024 * 1024)
    }

    /// Total memory in megabytes.
    pub fn total_mb(&self) -> u64 {
        self.total_bytes / (1024 * 1024)
    }
}

/// Parses a numeric `/proc/meminfo` value (in kB).
fn parse_kb_value(s: &str, source_path: &Path) -> Result<u64, ProbeError> {
    s.parse::<u64>().map_err(|_| ProbeError::ParseError {
        path: source_path.display().to_string(),
        detail: format!("expected integer kB value, got '{s}'"),
    })
}
