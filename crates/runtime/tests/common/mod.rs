// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shared setup for the integration tests.

#![allow(dead_code)]

#[path = "../../src/testing.rs"]
mod fixtures;

pub use fixtures::*;

use artifact_store::ArtifactSet;
use device_probe::{BackendKind, Capabilities, DeviceProfile};
use model_catalog::{ModelCatalog, ModelDescriptor};
use runtime::{
    Coordinator, ExecutionBackend, ModelExecutor, ReferenceBackend, RuntimeConfig, RuntimeError,
};
use std::time::Duration;

pub const GB: u64 = 1 << 30;

/// Reference backend whose decode steps sleep, so tests can act on a
/// session while it is running.
pub struct SlowBackend {
    inner: ReferenceBackend,
    delay: Duration,
}

impl SlowBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: ReferenceBackend::new(),
            delay,
        }
    }
}

impl ExecutionBackend for SlowBackend {
    fn name(&self) -> &str {
        "slow-reference"
    }

    fn supports(&self, kind: BackendKind) -> bool {
        self.inner.supports(kind)
    }

    fn load(
        &self,
        descriptor: &ModelDescriptor,
        artifacts: &ArtifactSet,
        kind: BackendKind,
    ) -> Result<Box<dyn ModelExecutor>, RuntimeError> {
        Ok(Box::new(SlowExecutor {
            inner: self.inner.load(descriptor, artifacts, kind)?,
            delay: self.delay,
        }))
    }
}

struct SlowExecutor {
    inner: Box<dyn ModelExecutor>,
    delay: Duration,
}

impl ModelExecutor for SlowExecutor {
    fn vocab_size(&self) -> usize {
        self.inner.vocab_size()
    }

    fn position(&self) -> usize {
        self.inner.position()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn prefill(&mut self, tokens: &[u32]) -> Result<Vec<f32>, RuntimeError> {
        self.inner.prefill(tokens)
    }

    fn decode(&mut self, token: u32) -> Result<Vec<f32>, RuntimeError> {
        std::thread::sleep(self.delay);
        self.inner.decode(token)
    }
}

/// Reference backend whose decode steps panic.
pub struct PanickingBackend(ReferenceBackend);

impl PanickingBackend {
    pub fn new() -> Self {
        Self(ReferenceBackend::new())
    }
}

impl ExecutionBackend for PanickingBackend {
    fn name(&self) -> &str {
        "panicking-reference"
    }

    fn supports(&self, kind: BackendKind) -> bool {
        self.0.supports(kind)
    }

    fn load(
        &self,
        descriptor: &ModelDescriptor,
        artifacts: &ArtifactSet,
        kind: BackendKind,
    ) -> Result<Box<dyn ModelExecutor>, RuntimeError> {
        Ok(Box::new(PanickingExecutor(self.0.load(descriptor, artifacts, kind)?)))
    }
}

struct PanickingExecutor(Box<dyn ModelExecutor>);

impl ModelExecutor for PanickingExecutor {
    fn vocab_size(&self) -> usize {
        self.0.vocab_size()
    }

    fn position(&self) -> usize {
        self.0.position()
    }

    fn reset(&mut self) {
        self.0.reset()
    }

    fn prefill(&mut self, tokens: &[u32]) -> Result<Vec<f32>, RuntimeError> {
        self.0.prefill(tokens)
    }

    fn decode(&mut self, _token: u32) -> Result<Vec<f32>, RuntimeError> {
        panic!("decode kernel fault")
    }
}

/// A CPU-only profile with the given budget.
pub fn profile(budget_bytes: u64) -> DeviceProfile {
    DeviceProfile {
        backend: BackendKind::Cpu,
        memory_budget_bytes: budget_bytes,
        total_memory_bytes: budget_bytes * 2,
        gpu_memory_bytes: 0,
        capabilities: Capabilities::default(),
        device_info: "integration".into(),
        cpu_cores: 4,
        degraded: false,
    }
}

/// A coordinator over a scratch directory.
pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub rt: Coordinator,
}

impl Harness {
    pub fn archive(&self, model_id: &str) -> std::path::PathBuf {
        self.tmp.path().join("archives").join(format!("{model_id}.tar.gz"))
    }
}

/// Writes one archive per `(entry, model)` and builds a coordinator over
/// them. `decode_delay` swaps in [`SlowBackend`].
pub fn harness(
    models: Vec<(serde_json::Value, FixtureModel)>,
    budget_bytes: u64,
    decode_delay: Option<Duration>,
) -> Harness {
    match decode_delay {
        Some(delay) => harness_with_backend(models, budget_bytes, move || {
            Ok(Box::new(SlowBackend::new(delay)) as Box<dyn ExecutionBackend>)
        }),
        None => harness_with_backend(models, budget_bytes, || {
            Ok(Box::new(ReferenceBackend::new()) as Box<dyn ExecutionBackend>)
        }),
    }
}

/// Like [`harness`], over any backend.
pub fn harness_with_backend<F>(
    models: Vec<(serde_json::Value, FixtureModel)>,
    budget_bytes: u64,
    backend: F,
) -> Harness
where
    F: Fn() -> Result<Box<dyn ExecutionBackend>, RuntimeError> + Send + 'static,
{
    let tmp = tempfile::tempdir().expect("tempdir");
    let archives = tmp.path().join("archives");
    std::fs::create_dir_all(&archives).expect("archive dir");

    let mut entries = Vec::new();
    for (entry, model) in models {
        let id = entry["model_id"].as_str().expect("model_id").to_string();
        model.write_tar_gz(&archives.join(format!("{id}.tar.gz")));
        entries.push(entry);
    }

    let config = RuntimeConfig {
        model_store: tmp.path().join("store"),
        archive_root: archives,
        scratch_bytes: 0,
        ..RuntimeConfig::default()
    };
    let catalog = ModelCatalog::from_json(&manifest(entries)).expect("manifest");
    let rt = Coordinator::builder(config)
        .catalog(catalog)
        .device_profile(profile(budget_bytes))
        .backend(backend)
        .build()
        .expect("coordinator");
    Harness { tmp, rt }
}

/// Initializes, installs and loads `model_id`.
pub async fn ready(h: &Harness, model_id: &str) {
    h.rt.initialize().await.expect("initialize");
    h.rt.ensure_model_artifacts(model_id, None).await.expect("artifacts");
    h.rt.load_model(model_id, runtime::LoadOptions::default())
        .await
        .expect("load");
}
