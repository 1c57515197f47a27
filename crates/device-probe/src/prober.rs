// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Best-effort device probing.
//!
//! Every individual probe may fail (containers, locked-down vendor
//! kernels, non-Linux hosts). Each failure is logged and replaced by a
//! safe default. Only a memory fallback sets [`DeviceProfile::degraded`],
//! since the budget is the one value a load depends on. Probing as a whole
//! never fails.

use crate::gpu::{self, GpuInfo, DEFAULT_GPU_NODES};
use crate::memory::MemoryInfo;
use crate::profile::{BackendKind, Capabilities, DeviceProfile};
use memory_manager::MemoryBudget;
use std::path::PathBuf;

/// Default path to the kernel memory info file.
const MEMINFO_PATH: &str = "/proc/meminfo";

/// Files that may hold a human-readable hardware name, tried in order.
const DEVICE_MODEL_PATHS: &[&str] = &[
    "/proc/device-tree/model",
    "/sys/devices/virtual/dmi/id/product_name",
];

/// Share of `MemAvailable` the runtime may commit to a model.
pub const DEFAULT_BUDGET_FRACTION: f64 = 0.75;

/// Where the prober looks. Overridable so tests can point at fixtures.
#[derive(Debug, Clone)]
pub struct ProbePaths {
    pub meminfo: PathBuf,
    pub gpu_nodes: Vec<PathBuf>,
    pub device_model: Vec<PathBuf>,
}

impl Default for ProbePaths {
    fn default() -> Self {
        Self {
            meminfo: PathBuf::from(MEMINFO_PATH),
            gpu_nodes: DEFAULT_GPU_NODES.iter().map(PathBuf::from).collect(),
            device_model: DEVICE_MODEL_PATHS.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Builds [`DeviceProfile`]s.
#[derive(Debug, Clone)]
pub struct DeviceProber {
    paths: ProbePaths,
    fallback_budget: MemoryBudget,
    budget_fraction: f64,
}

impl DeviceProber {
    /// A prober over the real system paths.
    ///
    /// `fallback_budget` is used when host memory cannot be read.
    pub fn new(fallback_budget: MemoryBudget) -> Self {
        Self::with_paths(ProbePaths::default(), fallback_budget)
    }

    pub fn with_paths(paths: ProbePaths, fallback_budget: MemoryBudget) -> Self {
        Self {
            paths,
            fallback_budget,
            budget_fraction: DEFAULT_BUDGET_FRACTION,
        }
    }

    /// Overrides the share of available memory used as the budget.
    pub fn with_budget_fraction(mut self, fraction: f64) -> Self {
        self.budget_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Probes the device. Never fails.
    pub fn probe(&self) -> DeviceProfile {
        let mut degraded = false;

        let (total_memory_bytes, memory_budget_bytes) = match MemoryInfo::read_from(&self.paths.meminfo) {
            Ok(mem) => {
                let budget = MemoryBudget::from_bytes(mem.available_bytes).fraction(self.budget_fraction);
                (mem.total_bytes, budget.as_bytes())
            }
            Err(e) => {
                tracing::warn!(error = %e, fallback = %self.fallback_budget, "memory probe failed, using fallback budget");
                degraded = true;
                (0, self.fallback_budget.as_bytes())
            }
        };

        let gpu: Option<GpuInfo> = gpu::detect(&self.paths.gpu_nodes);
        let capabilities = Capabilities {
            supports_gpu: gpu.is_some(),
            unified_memory: gpu.is_some(),
        };
        let gpu_memory_bytes = if capabilities.supports_gpu {
            total_memory_bytes
        } else {
            0
        };

        let device_info = self.device_info().unwrap_or_else(|| {
            tracing::debug!("device model not readable");
            crate::UNKNOWN_DEVICE.to_string()
        });

        let cpu_cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);

        let profile = DeviceProfile {
            backend: if capabilities.supports_gpu {
                BackendKind::Gpu
            } else {
                BackendKind::Cpu
            },
            memory_budget_bytes,
            total_memory_bytes,
            gpu_memory_bytes,
            capabilities,
            device_info,
            cpu_cores,
            degraded,
        };
        tracing::info!(
            gpu = ?gpu.map(|g| g.family),
            budget_mb = profile.memory_budget().as_mb(),
            degraded = profile.degraded,
            "device probed"
        );
        profile
    }

    fn device_info(&self) -> Option<String> {
        self.paths.device_model.iter().find_map(|p| {
            let raw = std::fs::read_to_string(p).ok()?;
            // Device-tree strings are NUL-terminated.
            let name = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
            (!name.is_empty()).then(|| name.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal: 8388608 kB\nMemAvailable: 4194304 kB\n";

    fn fixture(meminfo: Option<&str>, gpu: bool, model: Option<&str>) -> (tempfile::TempDir, ProbePaths) {
        let dir = tempfile::tempdir().unwrap();
        let meminfo_path = dir.path().join("meminfo");
        if let Some(content) = meminfo {
            std::fs::write(&meminfo_path, content).unwrap();
        }
        let gpu_node = dir.path().join("kgsl-3d0");
        if gpu {
            std::fs::write(&gpu_node, b"").unwrap();
        }
        let model_path = dir.path().join("model");
        if let Some(m) = model {
            std::fs::write(&model_path, m).unwrap();
        }
        let paths = ProbePaths {
            meminfo: meminfo_path,
            gpu_nodes: vec![gpu_node],
            device_model: vec![model_path],
        };
        (dir, paths)
    }

    #[test]
    fn test_probe_full() {
        let (_dir, paths) = fixture(Some(MEMINFO), true, Some("Test Phone\0"));
        let p = DeviceProber::with_paths(paths, MemoryBudget::from_gb(1)).probe();

        assert!(!p.degraded);
        assert_eq!(p.device_info, "Test Phone");
        assert_eq!(p.total_memory_bytes, 8 << 30);
        assert_eq!(p.memory_budget_bytes, 3 << 30);
        assert_eq!(p.backend, BackendKind::Gpu);
        assert!(p.capabilities.unified_memory);
        assert_eq!(p.gpu_memory_bytes, 8 << 30);
    }

    #[test]
    fn test_probe_degrades_to_cpu_defaults() {
        let (_dir, paths) = fixture(None, false, None);
        let p = DeviceProber::with_paths(paths, MemoryBudget::from_gb(2)).probe();

        assert!(p.degraded);
        assert_eq!(p.backend, BackendKind::Cpu);
        assert_eq!(p.memory_budget_bytes, 2 << 30);
        assert_eq!(p.total_memory_bytes, 0);
        assert_eq!(p.gpu_memory_bytes, 0);
        assert_eq!(p.device_info, "Unknown");
    }

    #[test]
    fn test_missing_device_name_is_not_degraded() {
        let (_dir, paths) = fixture(Some(MEMINFO), false, None);
        let p = DeviceProber::with_paths(paths, MemoryBudget::from_gb(1)).probe();
        assert!(!p.degraded);
        assert_eq!(p.device_info, "Unknown");
        assert_eq!(p.memory_budget_bytes, 3 << 30);
    }

    #[test]
    fn test_budget_fraction_override() {
        let (_dir, paths) = fixture(Some(MEMINFO), false, Some("x"));
        let p = DeviceProber::with_paths(paths, MemoryBudget::from_gb(1))
            .with_budget_fraction(0.5)
            .probe();
        assert_eq!(p.memory_budget_bytes, 2 << 30);
    }

    #[test]
    fn test_probe_real_system_never_panics() {
        let p = DeviceProber::new(MemoryBudget::from_gb(1)).probe();
        assert!(p.memory_budget_bytes > 0);
        assert!(p.cpu_cores >= 1);
    }
}
