// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for device probing and backend selection.

/// Errors that can occur while probing the device or choosing a backend.
///
/// Probe errors never escape [`DeviceProber::probe`](crate::DeviceProber::probe);
/// they are logged and replaced by defaults. Only backend selection
/// reports an error to callers.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Failed to read a procfs or sysfs file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A system file did not have the expected format.
    #[error("failed to parse value from {path}: {detail}")]
    ParseError { path: String, detail: String },

    /// The model needs a backend this device does not have.
    #[error("backend unavailable for '{model_id}': {detail}")]
    BackendUnavailable { model_id: String, detail: String },
}
