// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The device profile and backend selection.

use crate::ProbeError;
use memory_manager::MemoryBudget;
use model_catalog::BackendRequirements;

/// Execution backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cpu,
    Gpu,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu => f.write_str("gpu"),
        }
    }
}

/// What the device can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Capabilities {
    pub supports_gpu: bool,
    /// GPU and CPU share physical memory.
    pub unified_memory: bool,
}

/// Point-in-time description of the device, as seen by the loader.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DeviceProfile {
    /// Preferred backend when nothing else constrains the choice.
    pub backend: BackendKind,
    /// Bytes the runtime may commit to a loaded model.
    pub memory_budget_bytes: u64,
    /// Physical memory, or 0 when unknown.
    pub total_memory_bytes: u64,
    /// Memory addressable by the GPU, or 0 without one.
    pub gpu_memory_bytes: u64,
    pub capabilities: Capabilities,
    /// Human-readable hardware name, `"Unknown"` when unreadable.
    pub device_info: String,
    /// Logical CPU cores.
    pub cpu_cores: u32,
    /// Host memory could not be read and the fallback budget was used.
    pub degraded: bool,
}

impl DeviceProfile {
    pub fn memory_budget(&self) -> MemoryBudget {
        MemoryBudget::from_bytes(self.memory_budget_bytes)
    }

    /// Picks the backend for a model.
    ///
    /// GPU is chosen only when the device has one and either the model or
    /// the caller asks for it. A model that *requires* a GPU on a CPU-only
    /// device is an error rather than a silent CPU fallback.
    pub fn select_backend(
        &self,
        model_id: &str,
        requirements: &BackendRequirements,
        prefer_gpu: bool,
    ) -> Result<BackendKind, ProbeError> {
        if requirements.requires_gpu && !self.capabilities.supports_gpu {
            return Err(ProbeError::BackendUnavailable {
                model_id: model_id.to_string(),
                detail: "model requires a GPU and none was detected".to_string(),
            });
        }
        let wants_gpu = requirements.requires_gpu || requirements.prefers_gpu || prefer_gpu;
        let kind = if self.capabilities.supports_gpu && wants_gpu {
            BackendKind::Gpu
        } else {
            BackendKind::Cpu
        };
        tracing::debug!(model_id, %kind, wants_gpu, "backend selected");
        Ok(kind)
    }

    /// One-line summary for logs and CLI output.
    ///
    /// # Example output
    /// ```text
    /// Device: Pixel 8 | 8 cores | budget 3072 MB of 7680 MB | gpu: yes (unified)
    /// ```
    pub fn summary(&self) -> String {
        let mb = |b: u64| b / (1024 * 1024);
        let gpu = match (self.capabilities.supports_gpu, self.capabilities.unified_memory) {
            (true, true) => "yes (unified)",
            (true, false) => "yes",
            (false, _) => "no",
        };
        format!(
            "Device: {} | {} cores | budget {} MB of {} MB | gpu: {gpu}{}",
            self.device_info,
            self.cpu_cores,
            mb(self.memory_budget_bytes),
            mb(self.total_memory_bytes),
            if self.degraded { " | degraded" } else { "" },
        )
    }
}
