// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! GPU presence detection from device nodes.
//!
//! Mobile GPUs expose a character device per vendor driver: Adreno via
//! `kgsl`, Mali via `mali0`, and anything with a DRM render node via
//! `renderD128`. Presence of any of them is taken as "a GPU backend can
//! be initialized". Mobile GPUs share host memory.

use std::path::{Path, PathBuf};

/// Device nodes checked by default, in order.
pub const DEFAULT_GPU_NODES: &[&str] = &["/dev/kgsl-3d0", "/dev/mali0", "/dev/dri/renderD128"];

/// A detected GPU.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GpuInfo {
    /// The node that was found.
    pub node: PathBuf,
    /// Driver family inferred from the node name.
    pub family: String,
}

/// Returns the first GPU node that exists, if any.
pub(crate) fn detect(nodes: &[PathBuf]) -> Option<GpuInfo> {
    nodes.iter().find(|p| p.exists()).map(|node| GpuInfo {
        family: family_of(node).to_string(),
        node: node.clone(),
    })
}

fn family_of(node: &Path) -> &'static str {
    let name = node
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if name.starts_with("kgsl") {
        "adreno"
    } else if name.starts_with("mali") {
        "mali"
    } else if name.starts_with("renderD") {
        "drm"
    } else {
        "unknown"
    }
}
