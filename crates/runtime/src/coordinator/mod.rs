// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The caller-facing runtime.
//!
//! [`Coordinator`] is the only type callers use directly. Commands that
//! touch the runtime (initialize, load, generate, unload, dispose) go
//! through a single FIFO lane; each one sees the effects of every command
//! submitted before it. Read-only queries run on the caller's task against
//! the snapshot the lane publishes after each command.
//!
//! ```text
//!  caller ──► Coordinator ──mpsc──► [ lane thread ]
//!                 │                   handles + slot + engine
//!                 │◄────oneshot / StreamEvent────┘
//!                 └── spawn_blocking: artifact extraction, device probe
//! ```
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), runtime::RuntimeError> {
//! use runtime::{Coordinator, GenerationRequest, LoadOptions, RuntimeConfig, SamplingParams};
//!
//! let rt = Coordinator::new(RuntimeConfig::default())?;
//! rt.initialize().await?;
//! rt.ensure_model_artifacts("tinyllama-q4", None).await?;
//! rt.load_model("tinyllama-q4", LoadOptions::default()).await?;
//! let out = rt
//!     .generate(GenerationRequest::new("Hello", SamplingParams::default()))
//!     .await?;
//! println!("{}", out.text);
//! rt.dispose().await?;
//! # Ok(())
//! # }
//! ```

mod lane;
mod session;

pub use session::{CancelOutcome, SessionId};

use crate::backend::{BackendFactory, ExecutionBackend, ReferenceBackend};
use crate::config::RuntimeConfig;
use crate::generation::{GenerationEngine, GenerationOutcome, GenerationRequest, TokenFragment};
use crate::handle::{HandleState, RuntimeHandleManager};
use crate::loader::{LoadOptions, ModelInfo, ModelSlot};
use crate::RuntimeError;
use artifact_store::ArtifactStore;
use device_probe::{DeviceProber, DeviceProfile, ProbePaths};
use lane::{Command, LaneSnapshot, LaneState, Responder};
use memory_manager::{MemoryLedger, MemoryStats};
use model_catalog::{ModelCatalog, ModelDescriptor};
use session::SessionTable;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tokio::sync::{mpsc, oneshot};

/// Reply to [`Coordinator::initialize`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InitializeResponse {
    pub success: bool,
    pub message: String,
}

/// Event on a generation stream. Exactly one terminal event ends it.
#[derive(Debug)]
pub enum StreamEvent {
    Token(TokenFragment),
    Finished(GenerationOutcome),
    Failed(RuntimeError),
}

/// A streaming generation in progress.
#[derive(Debug)]
pub struct GenerationStream {
    pub session_id: SessionId,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl GenerationStream {
    /// Next event; `None` after the terminal event.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Drains tokens and returns the terminal result.
    pub async fn finish(mut self) -> Result<GenerationOutcome, RuntimeError> {
        while let Some(event) = self.events.recv().await {
            match event {
                StreamEvent::Token(_) => continue,
                StreamEvent::Finished(outcome) => return Ok(outcome),
                StreamEvent::Failed(e) => return Err(e),
            }
        }
        Err(RuntimeError::LaneUnavailable(format!(
            "{} ended without a result",
            self.session_id
        )))
    }
}

/// A submitted blocking generation.
#[derive(Debug)]
pub struct GenerationTicket {
    pub session_id: SessionId,
    reply: oneshot::Receiver<Result<GenerationOutcome, RuntimeError>>,
}

impl GenerationTicket {
    pub async fn wait(self) -> Result<GenerationOutcome, RuntimeError> {
        self.reply.await.map_err(|_| lane_gone())?
    }
}

/// Ledger statistics plus model residency.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MemoryReport {
    #[serde(flatten)]
    pub ledger: MemoryStats,
    pub loaded_models: usize,
    pub peak_loaded_models: usize,
}

/// One catalog entry with its install and load state.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ModelListing {
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    pub installed: bool,
    pub loaded: bool,
}

/// Point-in-time view of the runtime.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CoordinatorStatus {
    pub state: HandleState,
    pub is_model_loaded: bool,
    pub model: Option<ModelInfo>,
    pub device: DeviceProfile,
    pub memory: MemoryReport,
    pub models_available: usize,
    /// Successful model loads since startup.
    pub model_loads: u64,
    pub queued_sessions: usize,
    pub running_sessions: usize,
}

enum ProfileSource {
    Probe(DeviceProber),
    Fixed,
}

/// State shared between the caller side and the lane.
pub(crate) struct Shared {
    config: RuntimeConfig,
    catalog: ModelCatalog,
    store: ArtifactStore,
    ledger: MemoryLedger,
    profile_source: ProfileSource,
    profile: RwLock<DeviceProfile>,
    snapshot: RwLock<LaneSnapshot>,
    sessions: SessionTable,
    disposed: AtomicBool,
}

impl Shared {
    fn profile(&self) -> DeviceProfile {
        self.profile
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn snapshot(&self) -> LaneSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn snapshot_mut(&self) -> RwLockWriteGuard<'_, LaneSnapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn reference_backend() -> BackendFactory {
    Box::new(|| Ok(Box::new(ReferenceBackend::new()) as Box<dyn ExecutionBackend>))
}

fn lane_gone() -> RuntimeError {
    RuntimeError::LaneUnavailable("runtime lane has stopped".to_string())
}

/// Configures a [`Coordinator`].
pub struct CoordinatorBuilder {
    config: RuntimeConfig,
    catalog: Option<ModelCatalog>,
    profile: Option<DeviceProfile>,
    probe_paths: ProbePaths,
    backend: Option<BackendFactory>,
}

impl CoordinatorBuilder {
    /// Uses `catalog` instead of reading `config.manifest_path`.
    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Uses a fixed device profile; refreshes return it unchanged.
    pub fn device_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn probe_paths(mut self, paths: ProbePaths) -> Self {
        self.probe_paths = paths;
        self
    }

    /// Replaces the reference backend.
    pub fn backend<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn ExecutionBackend>, RuntimeError> + Send + 'static,
    {
        let factory: BackendFactory = Box::new(factory);
        self.backend = Some(factory);
        self
    }

    pub fn build(self) -> Result<Coordinator, RuntimeError> {
        let config = self.config;
        config.validate()?;
        let ceiling = config.parse_budget()?;
        let fallback = config.parse_fallback_budget()?;

        let catalog = match self.catalog {
            Some(c) => c,
            None => ModelCatalog::from_file(&config.manifest_path)?,
        };
        for rejected in catalog.rejected() {
            tracing::warn!(
                index = rejected.index,
                model_id = rejected.model_id.as_deref().unwrap_or("?"),
                reason = %rejected.reason,
                "manifest entry rejected"
            );
        }
        let store = ArtifactStore::new(&config.model_store)?;

        let (profile_source, profile) = match self.profile {
            Some(p) => (ProfileSource::Fixed, p),
            None => {
                let prober = DeviceProber::with_paths(self.probe_paths, fallback)
                    .with_budget_fraction(config.budget_fraction);
                let p = prober.probe();
                (ProfileSource::Probe(prober), p)
            }
        };
        tracing::info!("{}", profile.summary());

        let ledger = MemoryLedger::new(profile.memory_budget());
        let slot = ModelSlot::new(ledger.clone(), config.scratch_bytes, ceiling, config.prefer_gpu);
        let engine = GenerationEngine::new(config.sampling.seed).with_default_params(config.sampling.params());
        let factory = self.backend.unwrap_or_else(reference_backend);

        tracing::info!(
            models = catalog.len(),
            store = %config.model_store.display(),
            "coordinator created"
        );
        let shared = Arc::new(Shared {
            config,
            catalog,
            store,
            ledger,
            profile_source,
            profile: RwLock::new(profile),
            snapshot: RwLock::new(LaneSnapshot::default()),
            sessions: SessionTable::default(),
            disposed: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let lane = LaneState {
            handles: RuntimeHandleManager::new(factory),
            slot,
            engine,
            shared: Arc::clone(&shared),
        };
        std::thread::Builder::new()
            .name("runtime-lane".to_string())
            .spawn(move || lane.run(rx))
            .map_err(|e| RuntimeError::LaneUnavailable(format!("cannot start lane: {e}")))?;

        Ok(Coordinator { shared, tx })
    }
}

/// Single entry point to the on-device runtime.
pub struct Coordinator {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Command>,
}

impl Coordinator {
    pub fn builder(config: RuntimeConfig) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            catalog: None,
            profile: None,
            probe_paths: ProbePaths::default(),
            backend: None,
        }
    }

    /// Coordinator with the reference backend and a probed device.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.shared.catalog
    }

    fn ensure_live(&self) -> Result<(), RuntimeError> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(RuntimeError::RuntimeDisposed);
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.tx.send(command).map_err(|_| lane_gone())
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, RuntimeError>>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| lane_gone())?
    }

    /// Creates the backend. Idempotent until disposed.
    pub async fn initialize(&self) -> Result<InitializeResponse, RuntimeError> {
        self.call(|reply| Command::Initialize { reply }).await
    }

    /// The device profile, re-probed first when `refresh` is set.
    pub async fn get_device_capabilities(&self, refresh: bool) -> DeviceProfile {
        if let (true, ProfileSource::Probe(prober)) = (refresh, &self.shared.profile_source) {
            let prober = prober.clone();
            match tokio::task::spawn_blocking(move || prober.probe()).await {
                Ok(profile) => {
                    tracing::debug!("{}", profile.summary());
                    *self.shared.profile.write().unwrap_or_else(PoisonError::into_inner) = profile;
                }
                Err(e) => tracing::warn!(error = %e, "device probe task failed, keeping last profile"),
            }
        }
        self.shared.profile()
    }

    /// Catalog entries in manifest order.
    pub fn list_models(&self) -> Vec<ModelListing> {
        let active = self.shared.snapshot().model.map(|m| m.model_id);
        self.shared
            .catalog
            .list()
            .iter()
            .map(|d| ModelListing {
                descriptor: d.clone(),
                installed: self.shared.store.is_ready(d),
                loaded: active.as_deref() == Some(d.model_id.as_str()),
            })
            .collect()
    }

    /// Installs a model's files, extracting its archive if needed.
    ///
    /// `archive_ref` defaults to the descriptor's `archive` under
    /// `config.archive_root`. Returns the install directory.
    pub async fn ensure_model_artifacts(
        &self,
        model_id: &str,
        archive_ref: Option<PathBuf>,
    ) -> Result<PathBuf, RuntimeError> {
        self.ensure_live()?;
        let descriptor = self.shared.catalog.resolve(model_id)?.clone();
        let archive = archive_ref.unwrap_or_else(|| descriptor.archive_path(&self.shared.config.archive_root));
        let shared = Arc::clone(&self.shared);
        let set = tokio::task::spawn_blocking(move || shared.store.ensure_ready(&descriptor, &archive))
            .await
            .map_err(|e| RuntimeError::ExecutionError(format!("extraction task failed: {e}")))??;
        Ok(set.root().to_path_buf())
    }

    /// Makes `model_id` the active model.
    pub async fn load_model(&self, model_id: &str, options: LoadOptions) -> Result<ModelInfo, RuntimeError> {
        self.ensure_live()?;
        let descriptor = self.shared.catalog.resolve(model_id)?.clone();
        self.call(|reply| Command::Load {
            descriptor,
            options,
            reply,
        })
        .await
    }

    /// Queues a blocking generation and returns its ticket.
    pub fn submit(&self, request: GenerationRequest) -> Result<GenerationTicket, RuntimeError> {
        self.ensure_live()?;
        let (tx, rx) = oneshot::channel();
        let session_id = self.shared.sessions.register(Responder::Blocking(tx));
        let command = Command::Generate {
            session: session_id,
            request,
        };
        if let Err(e) = self.send(command) {
            self.shared.sessions.finish(session_id);
            return Err(e);
        }
        tracing::debug!(session = %session_id, "generation queued");
        Ok(GenerationTicket { session_id, reply: rx })
    }

    /// Generates to completion.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome, RuntimeError> {
        self.submit(request)?.wait().await
    }

    /// Queues a streaming generation.
    pub fn generate_stream(&self, request: GenerationRequest) -> Result<GenerationStream, RuntimeError> {
        self.ensure_live()?;
        let (tx, events) = mpsc::unbounded_channel();
        let session_id = self.shared.sessions.register(Responder::Stream(tx));
        let command = Command::Generate {
            session: session_id,
            request,
        };
        if let Err(e) = self.send(command) {
            self.shared.sessions.finish(session_id);
            return Err(e);
        }
        tracing::debug!(session = %session_id, "streaming generation queued");
        Ok(GenerationStream { session_id, events })
    }

    pub fn cancel(&self, session_id: SessionId) -> CancelOutcome {
        let outcome = self.shared.sessions.cancel(session_id);
        tracing::debug!(session = %session_id, ?outcome, "cancel requested");
        outcome
    }

    /// Unloads `model_id` if it is the active model.
    pub async fn unload_model(&self, model_id: &str) -> Result<bool, RuntimeError> {
        let model_id = model_id.to_string();
        self.call(|reply| Command::Unload { model_id, reply }).await
    }

    pub fn get_memory_stats(&self) -> MemoryReport {
        self.memory_report(&self.shared.snapshot())
    }

    fn memory_report(&self, snapshot: &LaneSnapshot) -> MemoryReport {
        MemoryReport {
            ledger: self.shared.ledger.stats(),
            loaded_models: snapshot.loaded_models,
            peak_loaded_models: snapshot.peak_loaded_models,
        }
    }

    pub fn get_status(&self) -> CoordinatorStatus {
        let snapshot = self.shared.snapshot();
        let (queued, running) = self.shared.sessions.counts();
        CoordinatorStatus {
            state: snapshot.state,
            is_model_loaded: snapshot.model.is_some(),
            memory: self.memory_report(&snapshot),
            model_loads: snapshot.loads,
            model: snapshot.model,
            device: self.shared.profile(),
            models_available: self.shared.catalog.len(),
            queued_sessions: queued,
            running_sessions: running,
        }
    }

    /// Unloads everything and releases the backend. Terminal.
    ///
    /// Returns `false` if the runtime was already disposed.
    pub async fn dispose(&self) -> Result<bool, RuntimeError> {
        self.call(|reply| Command::Dispose { reply }).await
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.shared.snapshot().state)
            .field("models", &self.shared.catalog.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::SamplingParams;
    use crate::testing::{manifest, manifest_entry, FixtureModel};
    use crate::ErrorKind;
    use device_probe::{BackendKind, Capabilities};

    const GB: u64 = 1 << 30;

    fn profile(budget: u64) -> DeviceProfile {
        DeviceProfile {
            backend: BackendKind::Cpu,
            memory_budget_bytes: budget,
            total_memory_bytes: budget * 2,
            gpu_memory_bytes: 0,
            capabilities: Capabilities::default(),
            device_info: "test".into(),
            cpu_cores: 2,
            degraded: false,
        }
    }

    fn coordinator(tmp: &tempfile::TempDir) -> Coordinator {
        let archives = tmp.path().join("archives");
        std::fs::create_dir_all(&archives).unwrap();
        FixtureModel::cycle().write_tar_gz(&archives.join("m.tar.gz"));
        let config = RuntimeConfig {
            model_store: tmp.path().join("store"),
            archive_root: archives,
            scratch_bytes: 0,
            ..RuntimeConfig::default()
        };
        let catalog = ModelCatalog::from_json(&manifest(vec![manifest_entry("m", 1_000_000, 64)])).unwrap();
        Coordinator::builder(config)
            .catalog(catalog)
            .device_profile(profile(GB))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = coordinator(&tmp);
        assert_eq!(rt.get_status().state, HandleState::Uninitialized);

        let init = rt.initialize().await.unwrap();
        assert!(init.success);
        assert_eq!(rt.get_status().state, HandleState::Ready);

        let dir = rt.ensure_model_artifacts("m", None).await.unwrap();
        assert!(dir.join("model.safetensors").is_file());
        assert!(rt.list_models()[0].installed);

        let info = rt.load_model("m", LoadOptions::default()).await.unwrap();
        assert_eq!(info.model_id, "m");
        assert!(rt.get_status().is_model_loaded);
        assert!(rt.list_models()[0].loaded);
        rt.load_model("m", LoadOptions::default()).await.unwrap();
        assert_eq!(rt.get_status().model_loads, 1);

        let out = rt
            .generate(GenerationRequest::new("a", SamplingParams::greedy(4)))
            .await
            .unwrap();
        assert_eq!(out.text, "bcda");

        assert!(rt.unload_model("m").await.unwrap());
        assert!(!rt.unload_model("m").await.unwrap());
        assert_eq!(rt.get_memory_stats().ledger.in_use_bytes, 0);

        assert!(rt.dispose().await.unwrap());
        assert!(!rt.dispose().await.unwrap());
        assert_eq!(rt.get_status().state, HandleState::Disposed);
    }

    #[tokio::test]
    async fn test_operations_before_initialize() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = coordinator(&tmp);
        rt.ensure_model_artifacts("m", None).await.unwrap();
        let err = rt.load_model("m", LoadOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
    }

    #[tokio::test]
    async fn test_load_without_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = coordinator(&tmp);
        rt.initialize().await.unwrap();
        let err = rt.load_model("m", LoadOptions::default()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ArtifactsNotReady(_)));
    }

    #[tokio::test]
    async fn test_generate_without_model() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = coordinator(&tmp);
        rt.initialize().await.unwrap();
        let err = rt
            .generate(GenerationRequest::new("a", SamplingParams::greedy(1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelNotLoaded);
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = coordinator(&tmp);
        let err = rt.ensure_model_artifacts("nope", None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Catalog(_)));
    }

    #[tokio::test]
    async fn test_cancel_unknown_session() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = coordinator(&tmp);
        let ticket = rt
            .submit(GenerationRequest::new("a", SamplingParams::greedy(1)))
            .unwrap();
        let id = ticket.session_id;
        let _ = ticket.wait().await;
        assert_eq!(rt.cancel(id), CancelOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_config_sampling_defaults_apply() {
        let tmp = tempfile::tempdir().unwrap();
        let archives = tmp.path().join("archives");
        std::fs::create_dir_all(&archives).unwrap();
        FixtureModel::cycle().write_tar_gz(&archives.join("m.tar.gz"));
        let mut config = RuntimeConfig {
            model_store: tmp.path().join("store"),
            archive_root: archives,
            scratch_bytes: 0,
            ..RuntimeConfig::default()
        };
        config.sampling.temperature = 0.0;
        config.sampling.max_tokens = 2;
        let catalog = ModelCatalog::from_json(&manifest(vec![manifest_entry("m", 1_000_000, 64)])).unwrap();
        let rt = Coordinator::builder(config)
            .catalog(catalog)
            .device_profile(profile(GB))
            .build()
            .unwrap();
        rt.initialize().await.unwrap();
        rt.ensure_model_artifacts("m", None).await.unwrap();
        rt.load_model("m", LoadOptions::default()).await.unwrap();

        let out = rt.generate(GenerationRequest::with_defaults("a")).await.unwrap();
        assert_eq!(out.text, "bc");
    }

    #[tokio::test]
    async fn test_fixed_profile_survives_refresh() {
        let tmp = tempfile::tempdir().unwrap();
        let rt = coordinator(&tmp);
        let p = rt.get_device_capabilities(true).await;
        assert_eq!(p.memory_budget_bytes, GB);
        assert_eq!(p.device_info, "test");
    }
}
