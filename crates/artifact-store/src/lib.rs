// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # artifact-store
//!
//! Turns a model archive into a verified install directory.
//!
//! # Guarantees
//! - **Idempotent.** A verified install is returned as-is, with no extraction.
//! - **Atomic.** Files are unpacked into a staging directory and committed
//!   by a single `rename`. A half-extracted model is never visible.
//! - **Fail-closed.** Any error discards staging and returns
//!   [`ArtifactError::Corrupt`]. A previous good install is never touched.
//!
//! # Example
//! ```no_run
//! use artifact_store::ArtifactStore;
//! # fn demo(d: &model_catalog::ModelDescriptor) -> Result<(), artifact_store::ArtifactError> {
//! let store = ArtifactStore::new("/data/models")?;
//! let set = store.ensure_ready(d, std::path::Path::new("/sdcard/tiny.tar.gz"))?;
//! println!("tokenizer at {}", set.tokenizer().display());
//! # Ok(()) }
//! ```

mod archive;
mod artifacts;
mod error;
mod store;

pub use archive::ArchiveKind;
pub use artifacts::ArtifactSet;
pub use error::ArtifactError;
pub use store::{ArtifactStore, STAGING_DIR};
