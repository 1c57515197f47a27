// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Token generation loop.
//!
//! One request runs as: encode → left-truncate to `context_window - 1` →
//! reset cache → prefill → decode steps. Stop conditions are checked at
//! every step boundary, including before the first one, in this order:
//!
//! 1. cancellation requested
//! 2. `max_tokens` generated
//! 3. EOS sampled (never delivered)
//! 4. context window exhausted
//!
//! Each delivered token is pushed to a [`TokenSink`] as it is produced.

use crate::backend::ModelExecutor;
use crate::loader::LoadedModel;
use crate::metrics::GenerationMetrics;
use crate::sampler::{Sampler, SamplingParams};
use crate::tokenizer::Tokenizer;
use crate::RuntimeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A prompt plus sampling parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    /// `None` uses the engine's configured defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<SamplingParams>,
    /// Model that must be active; `None` means whichever is loaded.
    #[serde(default)]
    pub model_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, params: SamplingParams) -> Self {
        Self {
            prompt: prompt.into(),
            params: Some(params),
            model_id: None,
        }
    }

    /// A request that samples with the runtime's `[sampling]` defaults.
    pub fn with_defaults(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: None,
            model_id: None,
        }
    }

    pub fn for_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }
}

/// Why generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxTokens,
    Eos,
    ContextExhausted,
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::MaxTokens => "max_tokens",
            StopReason::Eos => "eos",
            StopReason::ContextExhausted => "context_exhausted",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One delivered token.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TokenFragment {
    /// 0-based position among generated tokens.
    pub index: usize,
    pub token_id: u32,
    pub text: String,
}

/// Receives tokens as they are generated.
pub trait TokenSink {
    fn on_token(&mut self, fragment: &TokenFragment);
}

impl<F: FnMut(&TokenFragment)> TokenSink for F {
    fn on_token(&mut self, fragment: &TokenFragment) {
        self(fragment)
    }
}

/// Discards tokens; the blocking path reads the outcome instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TokenSink for NullSink {
    fn on_token(&mut self, _fragment: &TokenFragment) {}
}

/// Shared cancellation flag for one session.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerationOutcome {
    pub text: String,
    pub token_ids: Vec<u32>,
    pub tokens_generated: usize,
    pub stop_reason: StopReason,
    /// Prompt length after truncation.
    pub prompt_tokens: usize,
    pub prompt_truncated: bool,
    pub metrics: GenerationMetrics,
}

impl GenerationOutcome {
    /// Outcome for a session cancelled while still queued.
    pub fn cancelled_before_start() -> Self {
        let mut metrics = GenerationMetrics::start(0);
        metrics.finalise();
        Self {
            text: String::new(),
            token_ids: Vec::new(),
            tokens_generated: 0,
            stop_reason: StopReason::Cancelled,
            prompt_tokens: 0,
            prompt_truncated: false,
            metrics,
        }
    }
}

/// Per-request state.
#[derive(Debug)]
pub struct GenerationSession {
    prompt_tokens: Vec<u32>,
    prompt_truncated: bool,
    generated: Vec<u32>,
    text: String,
    cancel: CancelFlag,
}

impl GenerationSession {
    /// Encodes `prompt`, keeping at most `context_window - 1` trailing tokens.
    pub fn new(tokenizer: &Tokenizer, prompt: &str, context_window: usize, cancel: CancelFlag) -> Self {
        let mut tokens = tokenizer.encode(prompt);
        let limit = context_window.saturating_sub(1);
        let truncated = tokens.len() > limit;
        if truncated {
            tracing::warn!(
                prompt_tokens = tokens.len(),
                kept = limit,
                "prompt exceeds context window, keeping the most recent tokens"
            );
            tokens.drain(..tokens.len() - limit);
        }
        Self {
            prompt_tokens: tokens,
            prompt_truncated: truncated,
            generated: Vec::new(),
            text: String::new(),
            cancel,
        }
    }

    pub fn prompt_tokens(&self) -> &[u32] {
        &self.prompt_tokens
    }

    pub fn generated(&self) -> &[u32] {
        &self.generated
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Tokens in the sequence so far.
    pub fn position(&self) -> usize {
        self.prompt_tokens.len() + self.generated.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn push(&mut self, token_id: u32, piece: &str) -> TokenFragment {
        let fragment = TokenFragment {
            index: self.generated.len(),
            token_id,
            text: piece.to_string(),
        };
        self.generated.push(token_id);
        self.text.push_str(piece);
        fragment
    }

    fn finish(self, stop_reason: StopReason, metrics: GenerationMetrics) -> GenerationOutcome {
        GenerationOutcome {
            tokens_generated: self.generated.len(),
            text: self.text,
            token_ids: self.generated,
            stop_reason,
            prompt_tokens: self.prompt_tokens.len(),
            prompt_truncated: self.prompt_truncated,
            metrics,
        }
    }
}

/// Runs requests against a loaded model.
#[derive(Debug, Clone)]
pub struct GenerationEngine {
    default_seed: u64,
    default_params: SamplingParams,
}

impl GenerationEngine {
    /// `default_seed` seeds requests that carry no seed of their own.
    pub fn new(default_seed: u64) -> Self {
        Self {
            default_seed,
            default_params: SamplingParams::default(),
        }
    }

    /// Parameters for requests that carry none.
    pub fn with_default_params(mut self, params: SamplingParams) -> Self {
        self.default_params = params;
        self
    }

    /// The parameters `request` will run with.
    pub fn params_for<'a>(&'a self, request: &'a GenerationRequest) -> &'a SamplingParams {
        request.params.as_ref().unwrap_or(&self.default_params)
    }

    pub fn generate(
        &self,
        model: &mut LoadedModel,
        request: &GenerationRequest,
        cancel: &CancelFlag,
        sink: &mut dyn TokenSink,
    ) -> Result<GenerationOutcome, RuntimeError> {
        let context_window = model.descriptor().context_window as usize;
        let model_id = model.model_id().to_string();
        let (executor, tokenizer) = model.parts_mut();
        tracing::debug!(model_id = %model_id, max_tokens = self.params_for(request).max_tokens, "generation started");
        self.run(executor, tokenizer, context_window, request, cancel, sink)
    }

    /// The decode loop over a bare executor and tokenizer.
    pub fn run(
        &self,
        executor: &mut dyn ModelExecutor,
        tokenizer: &Tokenizer,
        context_window: usize,
        request: &GenerationRequest,
        cancel: &CancelFlag,
        sink: &mut dyn TokenSink,
    ) -> Result<GenerationOutcome, RuntimeError> {
        let params = self.params_for(request);
        params.validate().map_err(RuntimeError::ConfigError)?;

        let mut session = GenerationSession::new(tokenizer, &request.prompt, context_window, cancel.clone());
        let mut metrics = GenerationMetrics::start(session.prompt_tokens().len());
        let mut sampler = Sampler::new(params, self.default_seed);
        let max_tokens = params.max_tokens as usize;
        let eos = tokenizer.eos_token_id();

        executor.reset();
        let t = Instant::now();
        let mut logits = executor.prefill(session.prompt_tokens())?;
        metrics.record_prefill(t.elapsed());

        let mut pending: Option<u32> = None;
        let stop = loop {
            if session.is_cancelled() {
                break StopReason::Cancelled;
            }
            if session.generated().len() >= max_tokens {
                break StopReason::MaxTokens;
            }
            if let Some(token) = pending.take() {
                let t = Instant::now();
                logits = executor.decode(token)?;
                metrics.record_decode(t.elapsed());
                if session.is_cancelled() {
                    break StopReason::Cancelled;
                }
            }

            let token = sampler.sample(&logits);
            if token == eos {
                break StopReason::Eos;
            }
            if session.position() >= context_window {
                break StopReason::ContextExhausted;
            }

            let fragment = session.push(token, tokenizer.decode_token(token));
            metrics.record_token();
            sink.on_token(&fragment);
            pending = Some(token);
        };

        metrics.finalise();
        tracing::debug!(
            stop = %stop,
            tokens = session.generated().len(),
            "generation finished"
        );
        Ok(session.finish(stop, metrics))
    }
}
