// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON manifest parsing.
//!
//! The manifest (`models.json`) lists every model the device may run.
//!
//! # Format
//! ```json
//! {
//!   "model_list": [
//!     {
//!       "model_id": "tinyllama-q4",
//!       "archive": "archives/{model_id}.tar.gz",
//!       "quantization": "q4",
//!       "context_window": 2048,
//!       "parameter_count": 1100000000,
//!       "num_layers": 22,
//!       "hidden_size": 2048,
//!       "backend": { "requires_gpu": false, "prefers_gpu": true },
//!       "files": {
//!         "weights": ["model.safetensors"],
//!         "tokenizer": "tokenizer.json",
//!         "config": "config.json"
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! Parsing is two-level. A document that is not JSON, or has no
//! `model_list` array, fails as a whole. Each entry is then parsed on its
//! own: a bad entry is rejected and recorded, the rest stay usable.

use crate::{CatalogError, ModelDescriptor};
use std::collections::HashMap;

/// Key holding the model array.
pub const MODEL_LIST_KEY: &str = "model_list";

/// An entry that did not make it into the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    /// Position in `model_list`.
    pub index: usize,
    /// The entry's `model_id`, when one was readable.
    pub model_id: Option<String>,
    /// Why it was rejected.
    pub reason: String,
}

/// Result of parsing a manifest document.
#[derive(Debug, Default)]
pub(crate) struct ParsedManifest {
    pub accepted: Vec<ModelDescriptor>,
    pub rejected: Vec<RejectedEntry>,
}

/// Parses a manifest document into accepted descriptors and rejections.
pub(crate) fn parse(json: &str) -> Result<ParsedManifest, CatalogError> {
    let doc: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| CatalogError::document(format!("manifest is not valid JSON: {e}")))?;

    let entries = doc
        .get(MODEL_LIST_KEY)
        .ok_or_else(|| CatalogError::document(format!("manifest has no '{MODEL_LIST_KEY}'")))?
        .as_array()
        .ok_or_else(|| CatalogError::document(format!("'{MODEL_LIST_KEY}' is not an array")))?;

    let mut parsed = ParsedManifest::default();
    for (index, raw) in entries.iter().enumerate() {
        let model_id = raw
            .get("model_id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        let result = serde_json::from_value::<ModelDescriptor>(raw.clone())
            .map_err(|e| e.to_string())
            .and_then(|d| d.validate().map(|_| d));

        match result {
            Ok(descriptor) => parsed.accepted.push(descriptor),
            Err(reason) => {
                tracing::warn!(index, model_id = ?model_id, %reason, "rejecting manifest entry");
                parsed.rejected.push(RejectedEntry {
                    index,
                    model_id,
                    reason,
                });
            }
        }
    }

    reject_duplicates(&mut parsed);
    Ok(parsed)
}

/// Moves every descriptor whose id appears more than once into `rejected`.
fn reject_duplicates(parsed: &mut ParsedManifest) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for d in &parsed.accepted {
        *counts.entry(d.model_id.as_str()).or_default() += 1;
    }
    let duplicated: Vec<String> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id.to_string())
        .collect();
    if duplicated.is_empty() {
        return;
    }

    // Indices are positions among the accepted entries; recover the
    // original manifest positions by skipping the ones already rejected.
    let mut rejected_idx: Vec<usize> = parsed.rejected.iter().map(|r| r.index).collect();
    rejected_idx.sort_unstable();
    let mut manifest_index = 0usize;
    let mut next_manifest_index = || {
        while rejected_idx.binary_search(&manifest_index).is_ok() {
            manifest_index += 1;
        }
        let i = manifest_index;
        manifest_index += 1;
        i
    };

    let mut kept = Vec::with_capacity(parsed.accepted.len());
    let mut dups = Vec::new();
    for d in parsed.accepted.drain(..) {
        let index = next_manifest_index();
        if duplicated.contains(&d.model_id) {
            tracing::warn!(model_id = %d.model_id, index, "duplicate model_id in manifest");
            dups.push(RejectedEntry {
                index,
                model_id: Some(d.model_id),
                reason: "duplicate model_id".to_string(),
            });
        } else {
            kept.push(d);
        }
    }
    parsed.accepted = kept;
    parsed.rejected.extend(dups);
    parsed.rejected.sort_by_key(|r| r.index);
}
