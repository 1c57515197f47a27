// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model descriptors: the immutable, per-model facts from the manifest.
//!
//! A [`ModelDescriptor`] carries enough metadata to (a) find and verify the
//! model's artifacts on disk and (b) estimate its memory footprint before
//! anything is loaded. Descriptors serialize back to exactly the manifest
//! entry they were parsed from.

use std::path::{Component, Path, PathBuf};

/// Placeholder substituted in [`ModelDescriptor::archive`].
pub const MODEL_ID_PLACEHOLDER: &str = "{model_id}";

/// Bytes per KV-cache element (the cache is kept in f16).
const KV_ELEMENT_BYTES: u64 = 2;

/// Weight quantization scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Quantization {
    /// 32-bit float weights.
    F32,
    /// 16-bit float weights.
    F16,
    /// 16-bit brain-float weights.
    Bf16,
    /// 8-bit integer weights.
    Q8,
    /// 4-bit integer weights (group-quantized).
    Q4,
}

impl Quantization {
    /// Parses a quantization label.
    ///
    /// Accepts the canonical names plus the common MLC/GGUF spellings
    /// (`"q4f16_1"`, `"q4_k_m"`, `"q8_0"`, `"int8"`, `"float16"`).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "f32" | "float32" | "q0f32" => Some(Self::F32),
            "f16" | "float16" | "q0f16" => Some(Self::F16),
            "bf16" | "bfloat16" => Some(Self::Bf16),
            "q8" | "int8" | "i8" => Some(Self::Q8),
            "q4" | "int4" | "i4" => Some(Self::Q4),
            _ if s.starts_with("q8") => Some(Self::Q8),
            _ if s.starts_with("q4") => Some(Self::Q4),
            _ => None,
        }
    }

    /// Canonical label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::Bf16 => "bf16",
            Self::Q8 => "q8",
            Self::Q4 => "q4",
        }
    }

    /// Storage width of one weight in bits.
    pub fn bits_per_weight(self) -> u64 {
        match self {
            Self::F32 => 32,
            Self::F16 | Self::Bf16 => 16,
            Self::Q8 => 8,
            Self::Q4 => 4,
        }
    }
}

impl std::fmt::Display for Quantization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Quantization {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str_loose(&value).ok_or_else(|| format!("unsupported quantization '{value}'"))
    }
}

impl From<Quantization> for String {
    fn from(q: Quantization) -> Self {
        q.as_str().to_string()
    }
}

/// What the model needs from the execution backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BackendRequirements {
    /// The model cannot run without GPU acceleration.
    #[serde(default)]
    pub requires_gpu: bool,
    /// The model runs on CPU but benefits from a GPU when one exists.
    #[serde(default)]
    pub prefers_gpu: bool,
}

impl BackendRequirements {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Files a model's extracted directory must contain.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModelFiles {
    /// Weight shards, relative to the model directory.
    pub weights: Vec<String>,
    /// Tokenizer file.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
    /// Backend runtime config file.
    #[serde(default = "default_config")]
    pub config: String,
}

fn default_tokenizer() -> String {
    "tokenizer.json".to_string()
}

fn default_config() -> String {
    "config.json".to_string()
}

impl ModelFiles {
    /// Every expected file, weights first.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.weights
            .iter()
            .map(String::as_str)
            .chain([self.tokenizer.as_str(), self.config.as_str()])
    }
}

/// One model's entry in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModelDescriptor {
    /// Unique id (also the on-disk directory name).
    pub model_id: String,
    /// Archive reference, relative to the archive root. May contain
    /// `{model_id}`.
    pub archive: String,
    /// Weight quantization.
    pub quantization: Quantization,
    /// Maximum sequence length in tokens.
    pub context_window: u32,
    /// Number of weights (drives the footprint estimate).
    pub parameter_count: u64,
    /// Transformer depth (drives the KV-cache estimate).
    pub num_layers: u32,
    /// Hidden width (drives the KV-cache estimate).
    pub hidden_size: u32,
    /// Backend requirements.
    #[serde(default, skip_serializing_if = "BackendRequirements::is_default")]
    pub backend: BackendRequirements,
    /// Expected artifact files.
    pub files: ModelFiles,
    /// Compiled model library name, for backends that need one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_lib: Option<String>,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ModelDescriptor {
    /// Checks the descriptor's internal consistency.
    ///
    /// Returns a human-readable reason on failure; the catalog turns it
    /// into a [`CatalogError::Config`](crate::CatalogError::Config).
    pub fn validate(&self) -> Result<(), String> {
        if self.model_id.trim().is_empty() {
            return Err("model_id is empty".into());
        }
        if !is_single_component(&self.model_id) {
            return Err(format!("model_id '{}' is not a plain directory name", self.model_id));
        }
        if self.archive.trim().is_empty() {
            return Err("archive reference is empty".into());
        }
        if self.context_window < 2 {
            return Err(format!("context_window {} is too small", self.context_window));
        }
        if self.parameter_count == 0 {
            return Err("parameter_count must be non-zero".into());
        }
        if self.num_layers == 0 || self.hidden_size == 0 {
            return Err("num_layers and hidden_size must be non-zero".into());
        }
        if self.files.weights.is_empty() {
            return Err("no weight shards listed".into());
        }
        let mut seen = std::collections::HashSet::new();
        for file in self.files.all() {
            if !is_relative_inside(file) {
                return Err(format!("artifact path '{file}' escapes the model directory"));
            }
            if !seen.insert(file) {
                return Err(format!("artifact '{file}' listed twice"));
            }
        }
        Ok(())
    }

    /// Archive path with `{model_id}` substituted, joined onto `archive_root`.
    pub fn archive_path(&self, archive_root: &Path) -> PathBuf {
        archive_root.join(self.archive.replace(MODEL_ID_PLACEHOLDER, &self.model_id))
    }

    /// Estimated resident bytes for the weights.
    pub fn weight_bytes(&self) -> u64 {
        self.parameter_count
            .saturating_mul(self.quantization.bits_per_weight())
            / 8
    }

    /// Estimated KV-cache bytes for a full context window (keys and values,
    /// every layer, f16 elements).
    pub fn kv_cache_bytes(&self) -> u64 {
        2u64.saturating_mul(self.num_layers as u64)
            .saturating_mul(self.hidden_size as u64)
            .saturating_mul(self.context_window as u64)
            .saturating_mul(KV_ELEMENT_BYTES)
    }

    /// Name to show in listings.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.model_id)
    }

    /// One-line summary for CLI output and logs.
    pub fn summary(&self) -> String {
        let gb = |b: u64| b as f64 / (1024.0 * 1024.0 * 1024.0);
        format!(
            "{} ({}, {:.2}B params, ctx {}, weights {:.2} GB, kv {:.2} GB{})",
            self.model_id,
            self.quantization,
            self.parameter_count as f64 / 1e9,
            self.context_window,
            gb(self.weight_bytes()),
            gb(self.kv_cache_bytes()),
            if self.backend.requires_gpu { ", gpu required" } else { "" },
        )
    }
}

fn is_single_component(s: &str) -> bool {
    let mut comps = Path::new(s).components();
    matches!((comps.next(), comps.next()), (Some(Component::Normal(_)), None))
}

fn is_relative_inside(s: &str) -> bool {
    !s.is_empty()
        && Path::new(s)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
