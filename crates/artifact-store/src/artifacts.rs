// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Verified on-disk artifact sets.

use model_catalog::ModelDescriptor;
use std::path::{Path, PathBuf};

/// Absolute paths to every file a model needs, all known to exist with
/// non-zero size at construction time.
///
/// There is no public constructor: an `ArtifactSet` only comes out of
/// [`verify`], so holding one means the install was complete when it was
/// checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    model_id: String,
    root: PathBuf,
    weight_shards: Vec<PathBuf>,
    tokenizer: PathBuf,
    config: PathBuf,
}

impl ArtifactSet {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// The model's install directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Weight shard paths, in manifest order.
    pub fn weight_shards(&self) -> &[PathBuf] {
        &self.weight_shards
    }

    pub fn tokenizer(&self) -> &Path {
        &self.tokenizer
    }

    pub fn config(&self) -> &Path {
        &self.config
    }

    /// Total size of the weight shards on disk.
    pub fn weight_bytes_on_disk(&self) -> u64 {
        self.weight_shards
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

/// Checks that `dir` holds every file `descriptor` lists, each non-empty.
///
/// Returns the first problem found as a human-readable string.
pub(crate) fn verify(descriptor: &ModelDescriptor, dir: &Path) -> Result<ArtifactSet, String> {
    if !dir.is_dir() {
        return Err(format!("{} is not a directory", dir.display()));
    }

    let check = |name: &str| -> Result<PathBuf, String> {
        let path = dir.join(name);
        let meta = std::fs::metadata(&path).map_err(|_| format!("missing file '{name}'"))?;
        if !meta.is_file() {
            return Err(format!("'{name}' is not a regular file"));
        }
        if meta.len() == 0 {
            return Err(format!("'{name}' is empty"));
        }
        Ok(path)
    };

    let weight_shards = descriptor
        .files
        .weights
        .iter()
        .map(|w| check(w))
        .collect::<Result<Vec<_>, _>>()?;
    let tokenizer = check(&descriptor.files.tokenizer)?;
    let config = check(&descriptor.files.config)?;

    Ok(ArtifactSet {
        model_id: descriptor.model_id.clone(),
        root: dir.to_path_buf(),
        weight_shards,
        tokenizer,
        config,
    })
}
