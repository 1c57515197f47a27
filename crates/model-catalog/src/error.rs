// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for manifest parsing and model resolution.

/// Errors returned by the model catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The manifest file could not be read.
    #[error("failed to read manifest '{path}': {source}")]
    ManifestRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The manifest as a whole, or one model entry in it, is unusable.
    ///
    /// `model_id` is `None` for document-level failures.
    #[error("configuration error{}: {detail}", model_id.as_ref().map(|id| format!(" for model '{id}'")).unwrap_or_default())]
    Config {
        model_id: Option<String>,
        detail: String,
    },

    /// No manifest entry carries this id.
    #[error("model not found in catalog: {0}")]
    NotFound(String),
}

impl CatalogError {
    pub(crate) fn document(detail: impl Into<String>) -> Self {
        Self::Config {
            model_id: None,
            detail: detail.into(),
        }
    }

    pub(crate) fn entry(model_id: &str, detail: impl Into<String>) -> Self {
        Self::Config {
            model_id: Some(model_id.to_string()),
            detail: detail.into(),
        }
    }
}
