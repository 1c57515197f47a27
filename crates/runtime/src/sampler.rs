// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Next-token sampling.
//!
//! The pipeline is fixed:
//!
//! ```text
//! logits ─► ÷ temperature ─► softmax ─► top-k ─► renormalise ─► top-p ─► renormalise ─► draw
//! ```
//!
//! `temperature <= 0` skips all of it and takes the argmax (lowest id on
//! ties). `top_k == 0` and `top_p >= 1` disable their stages. At least one
//! candidate always survives filtering.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Per-request sampling parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SamplingParams {
    /// Upper bound on generated tokens (EOS excluded).
    pub max_tokens: u32,
    /// Softmax temperature. `<= 0` means greedy.
    pub temperature: f32,
    /// Nucleus mass. `>= 1` disables nucleus filtering.
    pub top_p: f32,
    /// Candidate cap. `0` disables top-k.
    pub top_k: u32,
    /// RNG seed; the runtime default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 150,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            seed: None,
        }
    }
}

impl SamplingParams {
    /// Greedy decoding with the given token cap.
    pub fn greedy(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            temperature: 0.0,
            top_p: 1.0,
            top_k: 0,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.temperature.is_finite() {
            return Err(format!("temperature must be finite, got {}", self.temperature));
        }
        if !(self.top_p.is_finite() && self.top_p > 0.0) {
            return Err(format!("top_p must be in (0, 1], got {}", self.top_p));
        }
        Ok(())
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }
}

/// Index of the largest logit; the lowest index wins ties.
pub fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0usize;
    for (i, &l) in logits.iter().enumerate().skip(1) {
        if l > logits[best] || (logits[best].is_nan() && !l.is_nan()) {
            best = i;
        }
    }
    best as u32
}

/// Seeded sampler for one request.
#[derive(Debug)]
pub struct Sampler {
    params: SamplingParams,
    rng: StdRng,
}

impl Sampler {
    /// Creates a sampler seeded from `params.seed`, or `default_seed`.
    pub fn new(params: &SamplingParams, default_seed: u64) -> Self {
        Self {
            params: params.clone(),
            rng: StdRng::seed_from_u64(params.seed.unwrap_or(default_seed)),
        }
    }

    /// Draws the next token id.
    pub fn sample(&mut self, logits: &[f32]) -> u32 {
        if self.params.is_greedy() || logits.len() <= 1 {
            return argmax(logits);
        }
        let candidates = self.distribution(logits);
        if candidates.is_empty() {
            return argmax(logits);
        }

        let r: f32 = self.rng.gen();
        let mut cumulative = 0.0f32;
        for &(id, p) in &candidates {
            cumulative += p;
            if r < cumulative {
                return id;
            }
        }
        // Rounding left the total just under `r`.
        candidates[candidates.len() - 1].0
    }

    /// The filtered, renormalised distribution `sample` draws from, in
    /// descending probability order.
    pub fn distribution(&self, logits: &[f32]) -> Vec<(u32, f32)> {
        let t = self.params.temperature;
        let max = logits
            .iter()
            .copied()
            .filter(|l| l.is_finite())
            .fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            return Vec::new();
        }

        let mut candidates: Vec<(u32, f32)> = logits
            .iter()
            .enumerate()
            .map(|(i, &l)| {
                let p = if l.is_finite() { ((l - max) / t).exp() } else { 0.0 };
                (i as u32, p)
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        renormalise(&mut candidates);

        let k = self.params.top_k as usize;
        if k > 0 && k < candidates.len() {
            candidates.truncate(k);
            renormalise(&mut candidates);
        }

        if self.params.top_p < 1.0 {
            let mut mass = 0.0f32;
            let mut keep = candidates.len();
            for (i, &(_, p)) in candidates.iter().enumerate() {
                mass += p;
                if mass >= self.params.top_p {
                    keep = i + 1;
                    break;
                }
            }
            candidates.truncate(keep.max(1));
            renormalise(&mut candidates);
        }

        candidates.retain(|&(_, p)| p > 0.0);
        candidates
    }
}

fn renormalise(candidates: &mut [(u32, f32)]) {
    let total: f32 = candidates.iter().map(|&(_, p)| p).sum();
    if total > 0.0 {
        for c in candidates.iter_mut() {
            c.1 /= total;
        }
    }
}
