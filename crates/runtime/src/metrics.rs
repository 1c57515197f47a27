// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-request generation metrics.
//!
//! [`GenerationMetrics`] splits a request into prefill (prompt ingestion)
//! and decode (one step per generated token), and records the wall-clock
//! instants the lane started and finished it.

use std::time::{Duration, Instant};

/// Timing and throughput for one generation request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerationMetrics {
    /// Prompt length after truncation.
    pub prompt_tokens: usize,
    /// Tokens delivered (EOS excluded).
    pub tokens_generated: usize,
    /// Time spent ingesting the prompt.
    pub prefill_duration: Duration,
    /// Time spent in decode steps.
    pub decode_duration: Duration,
    /// Time from start to the first delivered token.
    pub time_to_first_token: Option<Duration>,
    /// Wall-clock time for the whole request.
    pub total_duration: Duration,
    /// When the lane started the request.
    #[serde(skip)]
    pub started_at: Instant,
    /// When the lane finished it.
    #[serde(skip)]
    pub finished_at: Instant,
}

impl GenerationMetrics {
    /// Starts a metrics record at `now`.
    pub fn start(prompt_tokens: usize) -> Self {
        let now = Instant::now();
        Self {
            prompt_tokens,
            tokens_generated: 0,
            prefill_duration: Duration::ZERO,
            decode_duration: Duration::ZERO,
            time_to_first_token: None,
            total_duration: Duration::ZERO,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn record_prefill(&mut self, d: Duration) {
        self.prefill_duration += d;
    }

    pub fn record_decode(&mut self, d: Duration) {
        self.decode_duration += d;
    }

    /// Counts a delivered token, stamping time-to-first-token on the first.
    pub fn record_token(&mut self) {
        if self.time_to_first_token.is_none() {
            self.time_to_first_token = Some(self.started_at.elapsed());
        }
        self.tokens_generated += 1;
    }

    /// Stamps the finish instant and total duration.
    pub fn finalise(&mut self) {
        self.finished_at = Instant::now();
        self.total_duration = self.finished_at.duration_since(self.started_at);
    }

    /// Decode throughput in tokens per second.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs <= 0.0 || self.tokens_generated == 0 {
            return 0.0;
        }
        self.tokens_generated as f64 / secs
    }

    /// Human-readable summary for CLI output.
    pub fn summary(&self) -> String {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        format!(
            "Generation: {} prompt tokens, {} generated in {:.2}ms \
             (prefill {:.2}ms, decode {:.2}ms, ttft {}), {:.1} tok/s",
            self.prompt_tokens,
            self.tokens_generated,
            ms(self.total_duration),
            ms(self.prefill_duration),
            ms(self.decode_duration),
            self.time_to_first_token
                .map(|d| format!("{:.2}ms", ms(d)))
                .unwrap_or_else(|| "-".into()),
            self.tokens_per_second(),
        )
    }
}
