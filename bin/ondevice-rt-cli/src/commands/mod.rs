// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

pub mod fetch;
pub mod generate;
pub mod models;
pub mod status;

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Installs the log subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity >= 2)
        .init();
}

/// Reads the config file, or returns defaults when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<runtime::RuntimeConfig> {
    match path {
        Some(p) => {
            let config = runtime::RuntimeConfig::from_file(p)?;
            tracing::info!(path = %p.display(), "configuration loaded");
            Ok(config)
        }
        None => Ok(runtime::RuntimeConfig::default()),
    }
}

/// Creates a visual usage bar (0.0-1.0 scale).
pub fn usage_bar(ratio: f64) -> String {
    let filled = (ratio * 20.0).round().clamp(0.0, 20.0) as usize;
    let symbol = if ratio >= 0.9 {
        "#"
    } else if ratio >= 0.7 {
        "="
    } else {
        "-"
    };
    format!("[{}{}]", symbol.repeat(filled), ".".repeat(20 - filled))
}

pub fn mb(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}
