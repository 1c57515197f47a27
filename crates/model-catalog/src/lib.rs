// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-catalog
//!
//! Static model manifest parsing and model id resolution.
//!
//! The catalog is read once from a JSON manifest and is immutable
//! afterwards. Each entry becomes a [`ModelDescriptor`] that tells the rest
//! of the runtime where the model's archive lives, which files must exist
//! after extraction, and how much memory the model needs when loaded.
//!
//! Entries fail closed: a malformed or duplicated entry is never usable,
//! and resolving its id reports a configuration error instead of
//! silently picking one.

mod catalog;
mod descriptor;
mod error;
pub mod manifest;

pub use catalog::ModelCatalog;
pub use descriptor::{BackendRequirements, ModelDescriptor, ModelFiles, Quantization};
pub use error::CatalogError;
pub use manifest::RejectedEntry;
