// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model loading with budget pre-flight.
//!
//! At most one model is resident. [`ModelSlot::load`] runs in two phases:
//!
//! 1. **Pre-flight** (nothing changes on failure): check the handle,
//!    estimate the footprint, compare it with the effective budget, pick
//!    the backend kind, parse the tokenizer.
//! 2. **Commit**: unload the active model, reserve the footprint, load the
//!    executor. A failure here drops the fresh reservation
//!    and leaves the slot empty.
//!
//! A model that does not fit therefore never evicts the one that does.

use crate::backend::{ExecutionBackend, ModelExecutor};
use crate::handle::{RuntimeHandle, RuntimeHandleManager};
use crate::tokenizer::Tokenizer;
use crate::RuntimeError;
use artifact_store::ArtifactSet;
use device_probe::{BackendKind, DeviceProfile, ProbeError};
use memory_manager::{MemoryBudget, MemoryLedger, Reservation};
use model_catalog::ModelDescriptor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Caller options for a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LoadOptions {
    /// Ask for the GPU backend.
    #[serde(default)]
    pub use_gpu: bool,
    /// Additional budget ceiling; `0` means none.
    #[serde(default)]
    pub max_memory_bytes: u64,
}

/// Estimated resident bytes of a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Footprint {
    pub weights_bytes: u64,
    pub kv_cache_bytes: u64,
    pub scratch_bytes: u64,
}

impl Footprint {
    pub fn estimate(descriptor: &ModelDescriptor, scratch_bytes: u64) -> Self {
        Self {
            weights_bytes: descriptor.weight_bytes(),
            kv_cache_bytes: descriptor.kv_cache_bytes(),
            scratch_bytes,
        }
    }

    pub fn total(&self) -> u64 {
        self.weights_bytes
            .saturating_add(self.kv_cache_bytes)
            .saturating_add(self.scratch_bytes)
    }
}

/// Snapshot of the active model, for status reporting.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub display_name: Option<String>,
    pub backend: BackendKind,
    pub context_window: u32,
    pub vocab_size: usize,
    pub footprint: Footprint,
}

#[derive(Debug, Default)]
struct ResidencyCounts {
    live: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts models whose executors are alive.
#[derive(Debug, Clone, Default)]
struct Residency(Arc<ResidencyCounts>);

impl Residency {
    fn enter(&self) -> Resident {
        let live = self.0.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(live, Ordering::SeqCst);
        Resident(Arc::clone(&self.0))
    }

    fn live(&self) -> usize {
        self.0.live.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.0.peak.load(Ordering::SeqCst)
    }
}

/// Held by a model from before its executor is created until it is dropped.
#[derive(Debug)]
struct Resident(Arc<ResidencyCounts>);

impl Drop for Resident {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The resident model: executor, tokenizer and the memory it holds.
pub struct LoadedModel {
    descriptor: ModelDescriptor,
    artifacts: ArtifactSet,
    backend_kind: BackendKind,
    // Dropped before the reservation.
    executor: Box<dyn ModelExecutor>,
    _resident: Resident,
    tokenizer: Tokenizer,
    footprint: Footprint,
    reservation: Reservation,
    loaded_at: Instant,
}

impl LoadedModel {
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn model_id(&self) -> &str {
        &self.descriptor.model_id
    }

    pub fn artifacts(&self) -> &ArtifactSet {
        &self.artifacts
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn footprint(&self) -> Footprint {
        self.footprint
    }

    /// Bytes held in the ledger for this model.
    pub fn reserved_bytes(&self) -> u64 {
        self.reservation.bytes()
    }

    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            model_id: self.descriptor.model_id.clone(),
            display_name: self.descriptor.display_name.clone(),
            backend: self.backend_kind,
            context_window: self.descriptor.context_window,
            vocab_size: self.tokenizer.vocab_size(),
            footprint: self.footprint,
        }
    }

    /// Executor and tokenizer together, for the generation engine.
    pub(crate) fn parts_mut(&mut self) -> (&mut dyn ModelExecutor, &Tokenizer) {
        (self.executor.as_mut(), &self.tokenizer)
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("model_id", &self.descriptor.model_id)
            .field("backend", &self.backend_kind)
            .field("reserved_bytes", &self.reservation.bytes())
            .finish()
    }
}

/// Holds at most one [`LoadedModel`].
#[derive(Debug)]
pub struct ModelSlot {
    ledger: MemoryLedger,
    scratch_bytes: u64,
    budget_ceiling: Option<MemoryBudget>,
    prefer_gpu: bool,
    active: Option<LoadedModel>,
    loads: u64,
    residency: Residency,
}

impl ModelSlot {
    /// `budget_ceiling` caps every load on top of the device budget.
    pub fn new(
        ledger: MemoryLedger,
        scratch_bytes: u64,
        budget_ceiling: Option<MemoryBudget>,
        prefer_gpu: bool,
    ) -> Self {
        Self {
            ledger,
            scratch_bytes,
            budget_ceiling,
            prefer_gpu,
            active: None,
            loads: 0,
            residency: Residency::default(),
        }
    }

    pub fn active(&self) -> Option<&LoadedModel> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut LoadedModel> {
        self.active.as_mut()
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.active.as_ref().is_some_and(|m| m.model_id() == model_id)
    }

    /// Models currently resident.
    pub fn loaded_models(&self) -> usize {
        self.residency.live()
    }

    /// Most models ever resident at once.
    pub fn peak_loaded_models(&self) -> usize {
        self.residency.peak()
    }

    /// Successful loads so far.
    pub fn loads(&self) -> u64 {
        self.loads
    }

    /// Budget a load with `options` is checked against.
    pub fn effective_budget(&self, profile: &DeviceProfile, options: &LoadOptions) -> MemoryBudget {
        let budget = profile
            .memory_budget()
            .capped_by(Some(options.max_memory_bytes));
        match self.budget_ceiling {
            Some(ceiling) => budget.min(ceiling),
            None => budget,
        }
    }

    /// Loads `descriptor`, replacing the active model.
    ///
    /// Loading the model that is already active returns it unchanged.
    pub fn load(
        &mut self,
        handles: &RuntimeHandleManager,
        handle: &RuntimeHandle,
        descriptor: &ModelDescriptor,
        artifacts: ArtifactSet,
        profile: &DeviceProfile,
        options: &LoadOptions,
    ) -> Result<&LoadedModel, RuntimeError> {
        let backend = handles.backend(handle)?;
        let model_id = descriptor.model_id.as_str();

        if self.is_loaded(model_id) {
            tracing::debug!(model_id, "model already loaded");
            return self.loaded_ref(model_id);
        }

        // Pre-flight.
        let footprint = Footprint::estimate(descriptor, self.scratch_bytes);
        let budget = self.effective_budget(profile, options);
        if !budget.admits(footprint.total()) {
            tracing::warn!(
                model_id,
                required = footprint.total(),
                budget = budget.as_bytes(),
                "model does not fit the memory budget"
            );
            return Err(RuntimeError::InsufficientMemory {
                model_id: model_id.to_string(),
                required_bytes: footprint.total(),
                budget_bytes: budget.as_bytes(),
            });
        }
        let kind = self.select_kind(backend, descriptor, profile, options)?;
        let tokenizer = Tokenizer::from_file(artifacts.tokenizer())?;

        // Commit.
        self.unload();
        self.ledger.set_budget(budget);
        let reservation = self.ledger.reserve(model_id, footprint.total())?;
        let resident = self.residency.enter();
        let executor = backend.load(descriptor, &artifacts, kind)?;
        if executor.vocab_size() != tokenizer.vocab_size() {
            return Err(RuntimeError::WeightLoadError {
                model_id: model_id.to_string(),
                detail: format!(
                    "tokenizer has {} pieces, weights have {}",
                    tokenizer.vocab_size(),
                    executor.vocab_size()
                ),
            });
        }

        tracing::info!(
            model_id,
            backend = %kind,
            reserved_mb = footprint.total() / (1024 * 1024),
            "model loaded"
        );
        self.active = Some(LoadedModel {
            descriptor: descriptor.clone(),
            artifacts,
            backend_kind: kind,
            executor,
            _resident: resident,
            tokenizer,
            footprint,
            reservation,
            loaded_at: Instant::now(),
        });
        self.loads += 1;
        self.loaded_ref(model_id)
    }

    /// Releases the active model. Returns its id, or `None` if the slot was empty.
    pub fn unload(&mut self) -> Option<String> {
        let model = self.active.take()?;
        let model_id = model.descriptor.model_id.clone();
        let bytes = model.reservation.bytes();
        drop(model);
        tracing::info!(model_id = %model_id, released = bytes, "model unloaded");
        Some(model_id)
    }

    fn loaded_ref(&self, model_id: &str) -> Result<&LoadedModel, RuntimeError> {
        self.active
            .as_ref()
            .ok_or_else(|| RuntimeError::ModelNotLoaded(model_id.to_string()))
    }

    fn select_kind(
        &self,
        backend: &dyn ExecutionBackend,
        descriptor: &ModelDescriptor,
        profile: &DeviceProfile,
        options: &LoadOptions,
    ) -> Result<BackendKind, RuntimeError> {
        let model_id = descriptor.model_id.as_str();
        let wanted = profile.select_backend(
            model_id,
            &descriptor.backend,
            options.use_gpu || self.prefer_gpu,
        )?;
        if backend.supports(wanted) {
            return Ok(wanted);
        }
        if descriptor.backend.requires_gpu {
            return Err(ProbeError::BackendUnavailable {
                model_id: model_id.to_string(),
                detail: format!("{} has no {wanted} support", backend.name()),
            }
            .into());
        }
        tracing::warn!(model_id, backend = backend.name(), "{wanted} unsupported, using cpu");
        Ok(BackendKind::Cpu)
    }
}
