// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! model_store = "/data/local/ondevice-rt/models"
//! manifest_path = "/data/local/ondevice-rt/models.json"
//! archive_root = "/sdcard/ondevice-rt"
//! memory_budget = "3G"
//! scratch_bytes = 67108864
//! prefer_gpu = true
//! fallback_budget = "2G"
//! budget_fraction = 0.75
//!
//! [sampling]
//! max_tokens = 150
//! temperature = 0.7
//! top_p = 0.9
//! top_k = 40
//! seed = 12345
//! ```

use crate::sampler::SamplingParams;
use memory_manager::MemoryBudget;
use std::path::{Path, PathBuf};

/// Default per-model scratch allowance (activations, logits buffers).
const DEFAULT_SCRATCH_BYTES: u64 = 64 * 1024 * 1024;

/// Configuration for the runtime.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Directory holding extracted model installs.
    #[serde(default = "default_model_store")]
    pub model_store: PathBuf,
    /// Path to the JSON model manifest.
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    /// Directory that manifest `archive` references are relative to.
    #[serde(default = "default_archive_root")]
    pub archive_root: PathBuf,
    /// Optional ceiling on top of the probed budget (e.g. `"3G"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_budget: Option<String>,
    /// Bytes added to every footprint estimate for scratch buffers.
    #[serde(default = "default_scratch_bytes")]
    pub scratch_bytes: u64,
    /// Ask for the GPU backend even when the model does not prefer it.
    #[serde(default)]
    pub prefer_gpu: bool,
    /// Budget used when host memory cannot be probed.
    #[serde(default = "default_fallback_budget")]
    pub fallback_budget: String,
    /// Share of available memory the probed budget may use, in `(0, 1]`.
    #[serde(default = "default_budget_fraction")]
    pub budget_fraction: f64,
    /// Defaults applied to requests that leave sampling unspecified.
    #[serde(default)]
    pub sampling: SamplingDefaults,
}

fn default_model_store() -> PathBuf {
    PathBuf::from("./models")
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("./models.json")
}

fn default_archive_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_scratch_bytes() -> u64 {
    DEFAULT_SCRATCH_BYTES
}

fn default_fallback_budget() -> String {
    "2G".to_string()
}

fn default_budget_fraction() -> f64 {
    device_probe::DEFAULT_BUDGET_FRACTION
}

/// Sampling defaults.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SamplingDefaults {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Seed used when a request does not carry one.
    pub seed: u64,
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 150,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            seed: 12345,
        }
    }
}

impl SamplingDefaults {
    /// Request parameters built from these defaults (seed left unset, so
    /// the engine falls back to [`SamplingDefaults::seed`]).
    pub fn params(&self) -> SamplingParams {
        SamplingParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            seed: None,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, super::RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            super::RuntimeError::ConfigError(format!(
                "cannot read config '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, super::RuntimeError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            super::RuntimeError::ConfigError(format!("TOML parse error: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, super::RuntimeError> {
        toml::to_string_pretty(self).map_err(|e| {
            super::RuntimeError::ConfigError(format!("TOML serialise error: {e}"))
        })
    }

    /// Checks that every string-typed field parses.
    pub fn validate(&self) -> Result<(), super::RuntimeError> {
        self.parse_budget()?;
        self.parse_fallback_budget()?;
        if !(self.budget_fraction > 0.0 && self.budget_fraction <= 1.0) {
            return Err(super::RuntimeError::ConfigError(format!(
                "budget_fraction must be in (0, 1], got {}",
                self.budget_fraction
            )));
        }
        self.sampling
            .params()
            .validate()
            .map_err(|e| super::RuntimeError::ConfigError(format!("[sampling]: {e}")))
    }

    /// Parses the optional budget ceiling.
    pub fn parse_budget(&self) -> Result<Option<MemoryBudget>, super::RuntimeError> {
        self.memory_budget
            .as_deref()
            .map(|s| {
                MemoryBudget::parse(s)
                    .map_err(|e| super::RuntimeError::ConfigError(format!("invalid budget: {e}")))
            })
            .transpose()
    }

    /// Parses the fallback budget used when probing fails.
    pub fn parse_fallback_budget(&self) -> Result<MemoryBudget, super::RuntimeError> {
        MemoryBudget::parse(&self.fallback_budget).map_err(|e| {
            super::RuntimeError::ConfigError(format!("invalid fallback budget: {e}"))
        })
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model_store: default_model_store(),
            manifest_path: default_manifest_path(),
            archive_root: default_archive_root(),
            memory_budget: None,
            scratch_bytes: DEFAULT_SCRATCH_BYTES,
            prefer_gpu: false,
            fallback_budget: default_fallback_budget(),
            budget_fraction: default_budget_fraction(),
            sampling: SamplingDefaults::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = RuntimeConfig::default();
        assert!(c.memory_budget.is_none());
        assert_eq!(c.sampling.max_tokens, 150);
        assert_eq!(c.sampling.top_k, 40);
        assert_eq!(c.sampling.seed, 12345);
        assert!(!c.prefer_gpu);
        c.validate().unwrap();
    }

    #[test]
    fn test_parse_budget() {
        let c = RuntimeConfig {
            memory_budget: Some("256M".into()),
            ..Default::default()
        };
        let b = c.parse_budget().unwrap().unwrap();
        assert_eq!(b.as_mb(), 256);
        assert_eq!(RuntimeConfig::default().parse_budget().unwrap(), None);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
model_store = "/tmp/models"
manifest_path = "/tmp/models.json"
memory_budget = "3G"
prefer_gpu = true

[sampling]
max_tokens = 32
temperature = 0.0
"#;
        let c = RuntimeConfig::from_toml(toml).unwrap();
        assert_eq!(c.model_store, PathBuf::from("/tmp/models"));
        assert_eq!(c.memory_budget.as_deref(), Some("3G"));
        assert!(c.prefer_gpu);
        assert_eq!(c.sampling.max_tokens, 32);
        assert_eq!(c.sampling.temperature, 0.0);
        // Unspecified sampling keys keep their defaults.
        assert_eq!(c.sampling.top_p, 0.9);
        assert_eq!(c.scratch_bytes, DEFAULT_SCRATCH_BYTES);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let c = RuntimeConfig::from_toml("").unwrap();
        assert_eq!(c.fallback_budget, "2G");
        assert_eq!(c.sampling, SamplingDefaults::default());
    }

    #[test]
    fn test_invalid_budget_rejected() {
        assert!(RuntimeConfig::from_toml(r#"memory_budget = "lots""#).is_err());
        assert!(RuntimeConfig::from_toml(r#"fallback_budget = "0""#).is_err());
    }

    #[test]
    fn test_budget_fraction_bounds() {
        assert_eq!(RuntimeConfig::default().budget_fraction, 0.75);
        assert_eq!(RuntimeConfig::from_toml("budget_fraction = 1.0").unwrap().budget_fraction, 1.0);
        assert!(RuntimeConfig::from_toml("budget_fraction = 0.0").is_err());
        assert!(RuntimeConfig::from_toml("budget_fraction = 1.5").is_err());
    }

    #[test]
    fn test_invalid_sampling_rejected() {
        let toml = "[sampling]\ntop_p = 0.0\n";
        assert!(RuntimeConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = RuntimeConfig {
            memory_budget: Some("1G".into()),
            ..Default::default()
        };
        let toml = c.to_toml().unwrap();
        let back = RuntimeConfig::from_toml(&toml).unwrap();
        assert_eq!(back.memory_budget, c.memory_budget);
        assert_eq!(back.sampling, c.sampling);
    }
}
