// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-probe
//!
//! Reads what the device can offer an on-device model: how much memory
//! may be committed, whether a GPU backend exists, and what the hardware
//! is called.
//!
//! # Probed Facts
//! - **Memory budget.** 75% of `MemAvailable` from `/proc/meminfo`.
//! - **GPU presence.** Vendor device nodes (Adreno, Mali, DRM render).
//! - **Device name.** Device-tree model or DMI product name.
//!
//! # Graceful Degradation
//! Probing never fails. Unreadable memory falls back to a fixed budget and
//! sets [`DeviceProfile::degraded`]; a missing GPU node means CPU only; an
//! unreadable name becomes `"Unknown"`.
//!
//! # Example
//! ```no_run
//! use device_probe::DeviceProber;
//! use memory_manager::MemoryBudget;
//!
//! let profile = DeviceProber::new(MemoryBudget::from_gb(2)).probe();
//! println!("{}", profile.summary());
//! ```

mod error;
mod gpu;
mod memory;
mod prober;
mod profile;

pub use error::ProbeError;
pub use gpu::{GpuInfo, DEFAULT_GPU_NODES};
pub use memory::MemoryInfo;
pub use prober::{DeviceProber, ProbePaths, DEFAULT_BUDGET_FRACTION};
pub use profile::{BackendKind, Capabilities, DeviceProfile};

/// Device name reported when the hardware cannot be identified.
pub const UNKNOWN_DEVICE: &str = "Unknown";
