// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `ondevice-rt generate`: install, load and generate.
//!
//! ```text
//! initialize → ensure_model_artifacts → load_model → generate → dispose
//! ```
//!
//! Ctrl-C cancels the running session; the partial output is still printed.

use memory_manager::MemoryBudget;
use runtime::{
    Coordinator, GenerationOutcome, GenerationRequest, LoadOptions, RuntimeConfig, StreamEvent,
};
use std::io::Write;

#[derive(clap::Args)]
pub struct GenerateArgs {
    /// Model id from the manifest.
    model: String,

    /// Input prompt.
    #[arg(short, long)]
    prompt: String,

    /// Maximum number of tokens to generate.
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature (0 = greedy).
    #[arg(long)]
    temperature: Option<f32>,

    /// Nucleus mass.
    #[arg(long)]
    top_p: Option<f32>,

    /// Candidate cap (0 = off).
    #[arg(long)]
    top_k: Option<u32>,

    /// RNG seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Print tokens as they are generated.
    #[arg(short, long)]
    stream: bool,

    /// Ask for the GPU backend.
    #[arg(long)]
    gpu: bool,

    /// Memory ceiling for this load (e.g., "1G").
    #[arg(long)]
    max_memory: Option<String>,
}

impl GenerateArgs {
    fn request(&self, config: &RuntimeConfig) -> GenerationRequest {
        let mut params = config.sampling.params();
        if let Some(v) = self.max_tokens {
            params.max_tokens = v;
        }
        if let Some(v) = self.temperature {
            params.temperature = v;
        }
        if let Some(v) = self.top_p {
            params.top_p = v;
        }
        if let Some(v) = self.top_k {
            params.top_k = v;
        }
        params.seed = self.seed;
        GenerationRequest::new(self.prompt.clone(), params).for_model(self.model.clone())
    }
}

pub async fn execute(config: RuntimeConfig, args: GenerateArgs) -> anyhow::Result<()> {
    let max_memory_bytes = match args.max_memory.as_deref() {
        Some(s) => MemoryBudget::parse(s)
            .map_err(|e| anyhow::anyhow!("invalid --max-memory: {e}"))?
            .as_bytes(),
        None => 0,
    };
    let request = args.request(&config);
    let rt = Coordinator::new(config)?;

    let init = rt.initialize().await?;
    tracing::info!("{}", init.message);
    rt.ensure_model_artifacts(&args.model, None).await?;
    let info = rt
        .load_model(
            &args.model,
            LoadOptions {
                use_gpu: args.gpu,
                max_memory_bytes,
            },
        )
        .await?;
    eprintln!(
        "  loaded {} on {} ({} MB reserved)",
        info.model_id,
        info.backend,
        info.footprint.total() / (1024 * 1024)
    );

    let outcome = if args.stream {
        stream(&rt, request).await?
    } else {
        blocking(&rt, request).await?
    };

    eprintln!();
    eprintln!("  stop: {}", outcome.stop_reason);
    if outcome.prompt_truncated {
        eprintln!("  prompt truncated to {} tokens", outcome.prompt_tokens);
    }
    eprintln!("  {}", outcome.metrics.summary());

    rt.dispose().await?;
    Ok(())
}

async fn stream(rt: &Coordinator, request: GenerationRequest) -> anyhow::Result<GenerationOutcome> {
    let mut stream = rt.generate_stream(request)?;
    let session = stream.session_id;
    let mut stdout = std::io::stdout();
    let mut cancelled = false;

    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(StreamEvent::Token(fragment)) => {
                    write!(stdout, "{}", fragment.text)?;
                    stdout.flush()?;
                }
                Some(StreamEvent::Finished(outcome)) => {
                    writeln!(stdout)?;
                    return Ok(outcome);
                }
                Some(StreamEvent::Failed(e)) => return Err(e.into()),
                None => anyhow::bail!("{session} ended without a result"),
            },
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = true;
                tracing::info!(%session, "interrupt received, cancelling");
                rt.cancel(session);
            }
        }
    }
}

async fn blocking(rt: &Coordinator, request: GenerationRequest) -> anyhow::Result<GenerationOutcome> {
    let ticket = rt.submit(request)?;
    let session = ticket.session_id;
    let wait = ticket.wait();
    tokio::pin!(wait);

    let outcome = tokio::select! {
        result = &mut wait => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(%session, "interrupt received, cancelling");
            rt.cancel(session);
            wait.await?
        }
    };
    println!("{}", outcome.text);
    Ok(outcome)
}
