// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for artifact extraction and verification.

/// Errors returned by the artifact store.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Extraction failed or the result is incomplete. Nothing was committed.
    #[error("artifacts for '{model_id}' are corrupt: {detail}")]
    Corrupt { model_id: String, detail: String },

    /// The archive reference does not exist.
    #[error("archive not found for '{model_id}': {path}")]
    ArchiveNotFound { model_id: String, path: String },

    /// Store-level I/O outside of any single extraction.
    #[error("artifact store I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    pub(crate) fn corrupt(model_id: &str, detail: impl Into<String>) -> Self {
        Self::Corrupt {
            model_id: model_id.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
