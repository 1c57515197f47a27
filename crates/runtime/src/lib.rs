// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! On-device model loading and token generation.
//!
//! The runtime ties the leaf crates together:
//! - `model-catalog` resolves a model id to its [`ModelDescriptor`](model_catalog::ModelDescriptor).
//! - `artifact-store` installs the model's files.
//! - `device-probe` supplies the memory budget and backend choice.
//! - `memory-manager` accounts for the resident model.
//!
//! and adds the execution side: a backend behind [`ExecutionBackend`], the
//! handle lifecycle, a single-model [`ModelSlot`], and the decode loop in
//! [`GenerationEngine`].
//!
//! # Single FIFO Lane
//! Callers only talk to [`Coordinator`]. Every command that touches the
//! backend runs on one dedicated thread in submission order, so a load
//! never races a generation and a cancel always lands on a definite state:
//! ```text
//! initialize → ensure_model_artifacts → load_model → generate* → dispose
//! ```

pub mod backend;
mod config;
mod coordinator;
mod error;
mod generation;
mod handle;
mod loader;
mod metrics;
mod sampler;
mod tokenizer;

#[cfg(test)]
mod testing;

pub use backend::{BackendFactory, ExecutionBackend, ModelExecutor, ReferenceBackend};
pub use config::{RuntimeConfig, SamplingDefaults};
pub use coordinator::{
    CancelOutcome, Coordinator, CoordinatorBuilder, CoordinatorStatus, GenerationStream,
    GenerationTicket, InitializeResponse, MemoryReport, ModelListing, SessionId, StreamEvent,
};
pub use error::{ErrorKind, RuntimeError};
pub use generation::{
    CancelFlag, GenerationEngine, GenerationOutcome, GenerationRequest, GenerationSession,
    NullSink, StopReason, TokenFragment, TokenSink,
};
pub use handle::{HandleId, HandleState, RuntimeHandle, RuntimeHandleManager};
pub use loader::{Footprint, LoadOptions, LoadedModel, ModelInfo, ModelSlot};
pub use metrics::GenerationMetrics;
pub use sampler::{argmax, Sampler, SamplingParams};
pub use tokenizer::Tokenizer;
