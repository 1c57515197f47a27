// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `ondevice-rt status`: probe the device and print its profile.
//!
//! Works without a manifest. Unreadable probes show their fallbacks; an
//! unreadable memory probe marks the profile degraded.

use super::{mb, usage_bar};
use device_probe::DeviceProber;

pub async fn execute(config: runtime::RuntimeConfig, json: bool) -> anyhow::Result<()> {
    let fallback = config.parse_fallback_budget()?;
    let prober = DeviceProber::new(fallback).with_budget_fraction(config.budget_fraction);
    let profile = tokio::task::spawn_blocking(move || prober.probe()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             ondevice-rt · Device Profile             ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    println!("  Device");
    println!("   Model:        {}", profile.device_info);
    println!("   CPU cores:    {}", profile.cpu_cores);
    println!();

    println!("  Memory");
    let total = mb(profile.total_memory_bytes);
    let budget = mb(profile.memory_budget_bytes);
    println!("   Total:        {total} MB");
    println!("   Budget:       {budget} MB");
    if total > 0 {
        let ratio = budget as f64 / total as f64;
        println!("   Share:        {:.1}%  {}", ratio * 100.0, usage_bar(ratio));
    }
    if let Some(ceiling) = config.parse_budget()? {
        println!("   Config cap:   {ceiling}");
    }
    println!();

    println!("  Backend");
    println!("   Selected:     {}", profile.backend);
    println!(
        "   GPU:          {}",
        if profile.capabilities.supports_gpu {
            if profile.capabilities.unified_memory {
                "yes (unified memory)"
            } else {
                "yes"
            }
        } else {
            "no"
        }
    );
    if profile.degraded {
        println!("   WARNING: memory probe failed, fallback budget in use");
    }
    println!();
    println!("{}", profile.summary());

    Ok(())
}
