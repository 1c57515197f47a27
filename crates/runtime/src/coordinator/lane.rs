// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The FIFO lane.
//!
//! A single OS thread owns the handle manager and the model slot and runs
//! commands one at a time in submission order. After every command it
//! publishes a [`LaneSnapshot`] for the read-only queries. A panic inside a
//! command is caught and answered as an execution error.

use super::session::SessionId;
use super::{InitializeResponse, Shared, StreamEvent};
use crate::generation::{
    CancelFlag, GenerationEngine, GenerationOutcome, GenerationRequest, NullSink, TokenFragment,
    TokenSink,
};
use crate::handle::{HandleState, RuntimeHandleManager};
use crate::loader::{LoadOptions, ModelInfo, ModelSlot};
use crate::RuntimeError;
use model_catalog::ModelDescriptor;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

pub(crate) enum Command {
    Initialize {
        reply: Reply<InitializeResponse>,
    },
    Load {
        descriptor: ModelDescriptor,
        options: LoadOptions,
        reply: Reply<ModelInfo>,
    },
    Generate {
        session: SessionId,
        request: GenerationRequest,
    },
    Unload {
        model_id: String,
        reply: Reply<bool>,
    },
    Dispose {
        reply: Reply<bool>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Initialize { .. } => "initialize",
            Command::Load { .. } => "load",
            Command::Generate { .. } => "generate",
            Command::Unload { .. } => "unload",
            Command::Dispose { .. } => "dispose",
        }
    }
}

/// Where a generation result goes.
pub(crate) enum Responder {
    Blocking(Reply<GenerationOutcome>),
    Stream(mpsc::UnboundedSender<StreamEvent>),
}

impl Responder {
    pub(crate) fn finish(self, result: Result<GenerationOutcome, RuntimeError>) {
        match self {
            Responder::Blocking(tx) => {
                let _ = tx.send(result);
            }
            Responder::Stream(tx) => {
                let event = match result {
                    Ok(outcome) => StreamEvent::Finished(outcome),
                    Err(e) => StreamEvent::Failed(e),
                };
                let _ = tx.send(event);
            }
        }
    }
}

/// Forwards tokens to a stream. A closed stream cancels the session.
struct ChannelSink<'a> {
    tx: &'a mpsc::UnboundedSender<StreamEvent>,
    cancel: CancelFlag,
}

impl TokenSink for ChannelSink<'_> {
    fn on_token(&mut self, fragment: &TokenFragment) {
        if self.tx.send(StreamEvent::Token(fragment.clone())).is_err() {
            self.cancel.cancel();
        }
    }
}

/// What the lane last published.
#[derive(Debug, Clone)]
pub(crate) struct LaneSnapshot {
    pub(crate) state: HandleState,
    pub(crate) model: Option<ModelInfo>,
    pub(crate) loaded_models: usize,
    pub(crate) peak_loaded_models: usize,
    pub(crate) loads: u64,
}

impl Default for LaneSnapshot {
    fn default() -> Self {
        Self {
            state: HandleState::Uninitialized,
            model: None,
            loaded_models: 0,
            peak_loaded_models: 0,
            loads: 0,
        }
    }
}

/// Everything the lane owns.
pub(crate) struct LaneState {
    pub(crate) handles: RuntimeHandleManager,
    pub(crate) slot: ModelSlot,
    pub(crate) engine: GenerationEngine,
    pub(crate) shared: Arc<Shared>,
}

impl LaneState {
    /// Serves commands until every sender is gone.
    pub(crate) fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        tracing::info!("runtime lane started");
        while let Some(command) = rx.blocking_recv() {
            tracing::debug!(command = command.name(), "lane command");
            self.dispatch(command);
            self.publish();
        }
        self.slot.unload();
        self.handles.dispose();
        tracing::info!("runtime lane stopped");
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Initialize { reply } => {
                let _ = reply.send(self.guarded("initialize", |lane| lane.initialize()));
            }
            Command::Load {
                descriptor,
                options,
                reply,
            } => {
                let _ = reply.send(self.guarded("load", |lane| lane.load(&descriptor, &options)));
            }
            Command::Generate { session, request } => self.generate(session, &request),
            Command::Unload { model_id, reply } => {
                let _ = reply.send(self.guarded("unload", |lane| lane.unload(&model_id)));
            }
            Command::Dispose { reply } => {
                let _ = reply.send(self.guarded("dispose", |lane| Ok(lane.dispose())));
            }
        }
    }

    /// Runs `f`, turning a panic into [`RuntimeError::ExecutionError`].
    fn guarded<T>(
        &mut self,
        command: &str,
        f: impl FnOnce(&mut Self) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        match catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(result) => result,
            Err(payload) => {
                let detail = panic_detail(payload.as_ref());
                tracing::error!(command, %detail, "lane command panicked");
                Err(RuntimeError::ExecutionError(format!("{command} panicked: {detail}")))
            }
        }
    }

    fn publish(&self) {
        let snapshot = LaneSnapshot {
            state: self.handles.state(),
            model: self.slot.active().map(|m| m.info()),
            loaded_models: self.slot.loaded_models(),
            peak_loaded_models: self.slot.peak_loaded_models(),
            loads: self.slot.loads(),
        };
        *self.shared.snapshot_mut() = snapshot;
    }

    fn initialize(&mut self) -> Result<InitializeResponse, RuntimeError> {
        let handle = self.handles.initialize()?;
        let backend = self.handles.backend(&handle)?;
        Ok(InitializeResponse {
            success: true,
            message: format!("runtime ready (handle {}, backend {})", handle.id(), backend.name()),
        })
    }

    fn load(&mut self, descriptor: &ModelDescriptor, options: &LoadOptions) -> Result<ModelInfo, RuntimeError> {
        let handle = self.handles.handle()?;
        let artifacts = self
            .shared
            .store
            .artifact_set(descriptor)
            .ok_or_else(|| RuntimeError::ArtifactsNotReady(descriptor.model_id.clone()))?;
        let profile = self.shared.profile();
        let model = self
            .slot
            .load(&self.handles, &handle, descriptor, artifacts, &profile, options)?;
        Ok(model.info())
    }

    fn generate(&mut self, session: SessionId, request: &GenerationRequest) {
        let Some((cancel, responder)) = self.shared.sessions.start(session) else {
            tracing::debug!(%session, "skipping session cancelled while queued");
            return;
        };
        let result = self.guarded("generate", |lane| lane.run_generation(request, &cancel, &responder));
        self.shared.sessions.finish(session);
        if let Err(e) = &result {
            tracing::warn!(%session, error = %e, "generation failed");
        }
        responder.finish(result);
    }

    fn run_generation(
        &mut self,
        request: &GenerationRequest,
        cancel: &CancelFlag,
        responder: &Responder,
    ) -> Result<GenerationOutcome, RuntimeError> {
        self.handles.handle()?;
        let model = self.slot.active_mut().ok_or_else(|| {
            RuntimeError::ModelNotLoaded(request.model_id.clone().unwrap_or_else(|| "<none>".into()))
        })?;
        if let Some(wanted) = request.model_id.as_deref() {
            if wanted != model.model_id() {
                return Err(RuntimeError::ModelNotLoaded(wanted.to_string()));
            }
        }

        match responder {
            Responder::Blocking(_) => self.engine.generate(model, request, cancel, &mut NullSink),
            Responder::Stream(tx) => {
                let mut sink = ChannelSink {
                    tx,
                    cancel: cancel.clone(),
                };
                self.engine.generate(model, request, cancel, &mut sink)
            }
        }
    }

    fn unload(&mut self, model_id: &str) -> Result<bool, RuntimeError> {
        self.handles.handle()?;
        if !self.slot.is_loaded(model_id) {
            tracing::debug!(model_id, "unload of inactive model ignored");
            return Ok(false);
        }
        Ok(self.slot.unload().is_some())
    }

    fn dispose(&mut self) -> bool {
        self.slot.unload();
        let disposed = self.handles.dispose();
        self.shared.disposed.store(true, Ordering::SeqCst);
        disposed
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
