// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the runtime.

use memory_manager::MemoryError;

/// Errors that can occur while loading models or generating tokens.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration or request parameters are invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Manifest or model lookup failed.
    #[error(transparent)]
    Catalog(#[from] model_catalog::CatalogError),

    /// Artifact extraction or verification failed.
    #[error(transparent)]
    Artifact(#[from] artifact_store::ArtifactError),

    /// The model's artifacts have not been installed yet.
    #[error("artifacts for '{0}' are not installed")]
    ArtifactsNotReady(String),

    /// The model's estimated footprint exceeds the effective budget.
    #[error(
        "insufficient memory to load '{model_id}': needs {required_bytes} bytes, budget is {budget_bytes} bytes"
    )]
    InsufficientMemory {
        model_id: String,
        required_bytes: u64,
        budget_bytes: u64,
    },

    /// The memory ledger refused a reservation.
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    /// No backend on this device can run the model.
    #[error(transparent)]
    BackendUnavailable(#[from] device_probe::ProbeError),

    /// The runtime has not been initialized.
    #[error("runtime not initialized")]
    NotInitialized,

    /// The runtime was disposed, or the handle belongs to a disposed runtime.
    #[error("runtime disposed")]
    RuntimeDisposed,

    /// No model is loaded, or a different one is.
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    /// Weight files could not be read or are malformed.
    #[error("weight loading failed for '{model_id}': {detail}")]
    WeightLoadError { model_id: String, detail: String },

    /// The tokenizer file could not be read or is malformed.
    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    /// The backend failed during a forward step.
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// The lane worker is gone.
    #[error("runtime lane unavailable: {0}")]
    LaneUnavailable(String),
}

/// Coarse error classification, for callers that branch on the failure
/// category rather than the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    ArtifactCorrupt,
    InsufficientMemory,
    NotInitialized,
    RuntimeDisposed,
    ModelNotLoaded,
    BackendUnavailable,
    Backend,
    Internal,
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigError(_) | Self::Catalog(_) | Self::TokenizerError(_) => ErrorKind::Config,
            Self::Artifact(_) | Self::ArtifactsNotReady(_) => ErrorKind::ArtifactCorrupt,
            Self::InsufficientMemory { .. } | Self::Memory(MemoryError::OverBudget { .. }) => {
                ErrorKind::InsufficientMemory
            }
            Self::Memory(_) => ErrorKind::Internal,
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::RuntimeDisposed => ErrorKind::RuntimeDisposed,
            Self::ModelNotLoaded(_) => ErrorKind::ModelNotLoaded,
            Self::WeightLoadError { .. } | Self::ExecutionError(_) => ErrorKind::Backend,
            Self::LaneUnavailable(_) => ErrorKind::Internal,
        }
    }
}
