// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! CPU reference backend over SafeTensors weights.
//!
//! The model is a next-token transition table: a `[vocab, vocab]` f32
//! tensor named [`TRANSITION_TENSOR`] whose row `i` holds the logits that
//! follow token `i`. Weight shards are memory-mapped with `memmap2`; the
//! table is found in whichever shard carries it and copied out once.
//!
//! The KV cache is the token history, bounded by the context window.

use super::{ExecutionBackend, ModelExecutor};
use crate::RuntimeError;
use artifact_store::ArtifactSet;
use device_probe::BackendKind;
use model_catalog::ModelDescriptor;
use std::path::Path;

/// Name of the transition-logits tensor.
pub const TRANSITION_TENSOR: &str = "transition.logits";

/// Optional fields of the model's `config.json` that the backend checks.
#[derive(Debug, Default, serde::Deserialize)]
struct BackendConfig {
    #[serde(default)]
    vocab_size: Option<usize>,
}

/// CPU-only backend.
#[derive(Debug, Default)]
pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference-cpu"
    }

    fn supports(&self, kind: BackendKind) -> bool {
        kind == BackendKind::Cpu
    }

    fn load(
        &self,
        descriptor: &ModelDescriptor,
        artifacts: &ArtifactSet,
        kind: BackendKind,
    ) -> Result<Box<dyn ModelExecutor>, RuntimeError> {
        let model_id = descriptor.model_id.as_str();
        if !self.supports(kind) {
            return Err(RuntimeError::WeightLoadError {
                model_id: model_id.to_string(),
                detail: format!("{} cannot execute on {kind}", self.name()),
            });
        }

        let (vocab, table) = load_transition_table(model_id, artifacts.weight_shards())?;

        let config = read_config(model_id, artifacts.config())?;
        if let Some(expected) = config.vocab_size.filter(|&v| v != vocab) {
            return Err(RuntimeError::WeightLoadError {
                model_id: model_id.to_string(),
                detail: format!("config says vocab_size {expected}, weights have {vocab}"),
            });
        }

        tracing::info!(
            model_id,
            vocab,
            context_window = descriptor.context_window,
            "reference executor ready"
        );
        Ok(Box::new(ReferenceExecutor::from_table(
            vocab,
            table,
            descriptor.context_window as usize,
        )?))
    }
}

fn read_config(model_id: &str, path: &Path) -> Result<BackendConfig, RuntimeError> {
    let content = std::fs::read_to_string(path).map_err(|e| RuntimeError::WeightLoadError {
        model_id: model_id.to_string(),
        detail: format!("cannot read '{}': {e}", path.display()),
    })?;
    serde_json::from_str(&content).map_err(|e| RuntimeError::WeightLoadError {
        model_id: model_id.to_string(),
        detail: format!("invalid config '{}': {e}", path.display()),
    })
}

/// Memory-maps each shard and extracts the transition table.
fn load_transition_table(
    model_id: &str,
    shards: &[std::path::PathBuf],
) -> Result<(usize, Vec<f32>), RuntimeError> {
    let err = |detail: String| RuntimeError::WeightLoadError {
        model_id: model_id.to_string(),
        detail,
    };

    for shard in shards {
        let file = std::fs::File::open(shard)
            .map_err(|e| err(format!("cannot open '{}': {e}", shard.display())))?;
        // SAFETY: the install directory is owned by the artifact store and
        // never modified while a model is loaded.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| err(format!("mmap failed for '{}': {e}", shard.display())))?;
        tracing::debug!(
            shard = %shard.display(),
            mb = mmap.len() as f64 / (1024.0 * 1024.0),
            "mapped weight shard"
        );

        let st = safetensors::SafeTensors::deserialize(&mmap)
            .map_err(|e| err(format!("SafeTensors parse error in '{}': {e}", shard.display())))?;
        let view = match st.tensor(TRANSITION_TENSOR) {
            Ok(view) => view,
            Err(_) => continue,
        };

        if view.dtype() != safetensors::Dtype::F32 {
            return Err(err(format!(
                "'{TRANSITION_TENSOR}' must be F32, found {:?}",
                view.dtype()
            )));
        }
        let shape = view.shape();
        if shape.len() != 2 || shape[0] != shape[1] || shape[0] == 0 {
            return Err(err(format!(
                "'{TRANSITION_TENSOR}' must be a non-empty square matrix, found {shape:?}"
            )));
        }

        let table: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        return Ok((shape[0], table));
    }

    Err(err(format!("no shard contains '{TRANSITION_TENSOR}'")))
}

/// Transition-table executor.
#[derive(Debug)]
pub struct ReferenceExecutor {
    vocab: usize,
    table: Vec<f32>,
    context_window: usize,
    history: Vec<u32>,
}

impl ReferenceExecutor {
    /// Builds an executor from a row-major `[vocab, vocab]` table.
    pub fn from_table(vocab: usize, table: Vec<f32>, context_window: usize) -> Result<Self, RuntimeError> {
        if vocab == 0 || table.len() != vocab * vocab {
            return Err(RuntimeError::ExecutionError(format!(
                "transition table has {} entries, expected {vocab}x{vocab}",
                table.len()
            )));
        }
        Ok(Self {
            vocab,
            table,
            context_window,
            history: Vec::with_capacity(context_window),
        })
    }

    fn push(&mut self, token: u32) -> Result<(), RuntimeError> {
        if token as usize >= self.vocab {
            return Err(RuntimeError::ExecutionError(format!(
                "token {token} outside vocabulary of {}",
                self.vocab
            )));
        }
        if self.history.len() >= self.context_window {
            return Err(RuntimeError::ExecutionError(format!(
                "KV cache full at {} tokens",
                self.context_window
            )));
        }
        self.history.push(token);
        Ok(())
    }

    fn next_logits(&self) -> Vec<f32> {
        match self.history.last() {
            Some(&t) => {
                let row = t as usize * self.vocab;
                self.table[row..row + self.vocab].to_vec()
            }
            None => vec![0.0; self.vocab],
        }
    }
}

impl ModelExecutor for ReferenceExecutor {
    fn vocab_size(&self) -> usize {
        self.vocab
    }

    fn position(&self) -> usize {
        self.history.len()
    }

    fn reset(&mut self) {
        self.history.clear();
    }

    fn prefill(&mut self, tokens: &[u32]) -> Result<Vec<f32>, RuntimeError> {
        for &t in tokens {
            self.push(t)?;
        }
        Ok(self.next_logits())
    }

    fn decode(&mut self, token: u32) -> Result<Vec<f32>, RuntimeError> {
        self.push(token)?;
        Ok(self.next_logits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> ReferenceExecutor {
        // 3-token vocabulary: 0 → 1, 1 → 2, 2 → 0.
        let table = vec![
            0.0, 5.0, 0.0, //
            0.0, 0.0, 5.0, //
            5.0, 0.0, 0.0,
        ];
        ReferenceExecutor::from_table(3, table, 4).unwrap()
    }

    #[test]
    fn test_prefill_returns_last_row() {
        let mut e = executor();
        assert_eq!(e.prefill(&[0, 1]).unwrap(), vec![0.0, 0.0, 5.0]);
        assert_eq!(e.position(), 2);
    }

    #[test]
    fn test_empty_prefill_is_uniform() {
        let mut e = executor();
        assert_eq!(e.prefill(&[]).unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn test_decode_and_reset() {
        let mut e = executor();
        e.prefill(&[0]).unwrap();
        assert_eq!(e.decode(2).unwrap(), vec![5.0, 0.0, 0.0]);
        e.reset();
        assert_eq!(e.position(), 0);
    }

    #[test]
    fn test_cache_bound() {
        let mut e = executor();
        e.prefill(&[0, 1, 2, 0]).unwrap();
        assert!(matches!(e.decode(1), Err(RuntimeError::ExecutionError(_))));
    }

    #[test]
    fn test_out_of_vocab() {
        let mut e = executor();
        assert!(e.decode(3).is_err());
    }

    #[test]
    fn test_bad_table_shape() {
        assert!(ReferenceExecutor::from_table(2, vec![0.0; 3], 8).is_err());
        assert!(ReferenceExecutor::from_table(0, vec![], 8).is_err());
    }

    #[test]
    fn test_backend_supports_cpu_only() {
        let b = ReferenceBackend::new();
        assert!(b.supports(BackendKind::Cpu));
        assert!(!b.supports(BackendKind::Gpu));
    }

    #[test]
    fn test_load_table_from_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        let view = safetensors::tensor::TensorView::new(safetensors::Dtype::F32, vec![2, 2], &data).unwrap();
        let bytes = safetensors::serialize(vec![(TRANSITION_TENSOR, &view)], &None).unwrap();

        let other = dir.path().join("other.safetensors");
        let empty_view = safetensors::tensor::TensorView::new(safetensors::Dtype::F32, vec![1], &data[..4]).unwrap();
        std::fs::write(&other, safetensors::serialize(vec![("bias", &empty_view)], &None).unwrap()).unwrap();
        let shard = dir.path().join("model.safetensors");
        std::fs::write(&shard, bytes).unwrap();

        let (vocab, table) = load_transition_table("m", &[other, shard]).unwrap();
        assert_eq!(vocab, 2);
        assert_eq!(table, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_missing_tensor() {
        let dir = tempfile::tempdir().unwrap();
        let data = 1.0f32.to_le_bytes();
        let view = safetensors::tensor::TensorView::new(safetensors::Dtype::F32, vec![1], &data).unwrap();
        let shard = dir.path().join("model.safetensors");
        std::fs::write(&shard, safetensors::serialize(vec![("bias", &view)], &None).unwrap()).unwrap();

        assert!(matches!(
            load_transition_table("m", &[shard]),
            Err(RuntimeError::WeightLoadError { .. })
        ));
    }
}
