// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The parsed, immutable model catalog.

use crate::manifest::{self, RejectedEntry};
use crate::{CatalogError, ModelDescriptor};
use std::collections::HashMap;
use std::path::Path;

/// Immutable view of a parsed manifest.
///
/// Built once at startup; every lookup afterwards is a pure read, so the
/// catalog can be shared freely across threads.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    by_id: HashMap<String, usize>,
    rejected: Vec<RejectedEntry>,
    /// Ids that resolve to a configuration error rather than `NotFound`.
    poisoned: HashMap<String, String>,
}

impl ModelCatalog {
    /// Reads and parses a manifest file.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::ManifestRead {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_json(&content)?;
        tracing::info!(
            path = %path.display(),
            models = catalog.len(),
            rejected = catalog.rejected.len(),
            "model catalog loaded"
        );
        Ok(catalog)
    }

    /// Parses a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let parsed = manifest::parse(json)?;

        let mut poisoned = HashMap::new();
        for r in &parsed.rejected {
            if let Some(id) = &r.model_id {
                poisoned
                    .entry(id.clone())
                    .or_insert_with(|| r.reason.clone());
            }
        }

        // A valid entry sharing an id with a rejected one is withheld too.
        let models: Vec<ModelDescriptor> = parsed
            .accepted
            .into_iter()
            .filter(|d| {
                let keep = !poisoned.contains_key(&d.model_id);
                if !keep {
                    tracing::warn!(model_id = %d.model_id, "withholding entry whose id is also rejected");
                }
                keep
            })
            .collect();
        let by_id = models
            .iter()
            .enumerate()
            .map(|(i, d)| (d.model_id.clone(), i))
            .collect();

        Ok(Self {
            models,
            by_id,
            rejected: parsed.rejected,
            poisoned,
        })
    }

    /// Looks up a model by id.
    ///
    /// An id that appeared only in rejected entries resolves to
    /// [`CatalogError::Config`]; an id that never appeared resolves to
    /// [`CatalogError::NotFound`].
    pub fn resolve(&self, model_id: &str) -> Result<&ModelDescriptor, CatalogError> {
        if let Some(reason) = self.poisoned.get(model_id) {
            return Err(CatalogError::entry(model_id, reason.clone()));
        }
        self.by_id
            .get(model_id)
            .map(|&i| &self.models[i])
            .ok_or_else(|| CatalogError::NotFound(model_id.to_string()))
    }

    /// Usable descriptors, in manifest order.
    pub fn list(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Entries that failed to parse or validate.
    pub fn rejected(&self) -> &[RejectedEntry] {
        &self.rejected
    }

    /// Number of usable descriptors.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
