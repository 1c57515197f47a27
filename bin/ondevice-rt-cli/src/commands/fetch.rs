// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `ondevice-rt fetch`: extract a model archive into the store.

use std::path::PathBuf;
use std::time::Instant;

pub async fn execute(
    config: runtime::RuntimeConfig,
    model: String,
    archive: Option<PathBuf>,
) -> anyhow::Result<()> {
    let rt = runtime::Coordinator::new(config)?;
    let start = Instant::now();
    let dir = rt.ensure_model_artifacts(&model, archive).await?;
    println!(
        "  {model} ready at {} ({:.1}s)",
        dir.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
