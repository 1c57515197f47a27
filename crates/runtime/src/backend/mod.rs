// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Execution backend abstraction.
//!
//! An [`ExecutionBackend`] is the process-level engine instance that the
//! [`RuntimeHandleManager`](crate::RuntimeHandleManager) creates once per
//! runtime. It turns a verified artifact set into a [`ModelExecutor`]: the
//! per-model weights plus KV cache that the generation engine steps.

mod reference;

pub use reference::{ReferenceBackend, ReferenceExecutor, TRANSITION_TENSOR};

use crate::RuntimeError;
use artifact_store::ArtifactSet;
use device_probe::BackendKind;
use model_catalog::ModelDescriptor;

/// Creates backends. Called once by [`RuntimeHandleManager::initialize`](crate::RuntimeHandleManager::initialize).
pub type BackendFactory = Box<dyn Fn() -> Result<Box<dyn ExecutionBackend>, RuntimeError> + Send>;

/// A process-level inference engine.
pub trait ExecutionBackend: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Whether this backend can execute on `kind`.
    fn supports(&self, kind: BackendKind) -> bool;

    /// Loads a model's weights and allocates its KV cache.
    fn load(
        &self,
        descriptor: &ModelDescriptor,
        artifacts: &ArtifactSet,
        kind: BackendKind,
    ) -> Result<Box<dyn ModelExecutor>, RuntimeError>;
}

/// One loaded model, ready to step.
///
/// Each call returns the next-token logits for the last position fed in.
pub trait ModelExecutor: Send {
    fn vocab_size(&self) -> usize;

    /// Tokens currently held in the KV cache.
    fn position(&self) -> usize;

    /// Clears the KV cache.
    fn reset(&mut self);

    /// Feeds a whole prompt. An empty prompt yields the unconditioned
    /// distribution.
    fn prefill(&mut self, tokens: &[u32]) -> Result<Vec<f32>, RuntimeError>;

    /// Feeds one generated token.
    fn decode(&mut self, token: u32) -> Result<Vec<f32>, RuntimeError>;
}
