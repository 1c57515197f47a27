// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `ondevice-rt models`: list the manifest with install state and
//! footprint estimates.

use super::mb;

pub fn execute(config: runtime::RuntimeConfig, json: bool) -> anyhow::Result<()> {
    let rt = runtime::Coordinator::new(config)?;
    let listings = rt.list_models();

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    println!(
        "  {:<24} {:>6} {:>8} {:>10} {:>10}  {}",
        "MODEL", "QUANT", "CONTEXT", "WEIGHTS", "KV CACHE", "STATE"
    );
    for l in &listings {
        let d = &l.descriptor;
        println!(
            "  {:<24} {:>6} {:>8} {:>7} MB {:>7} MB  {}",
            d.label(),
            d.quantization.as_str(),
            d.context_window,
            mb(d.weight_bytes()),
            mb(d.kv_cache_bytes()),
            if l.installed { "installed" } else { "-" },
        );
    }

    let rejected = rt.catalog().rejected();
    if !rejected.is_empty() {
        println!();
        println!("  Rejected entries:");
        for r in rejected {
            println!(
                "   #{} {}: {}",
                r.index,
                r.model_id.as_deref().unwrap_or("<no id>"),
                r.reason
            );
        }
    }
    Ok(())
}
