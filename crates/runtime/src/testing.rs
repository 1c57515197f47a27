// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixture models for tests.
//!
//! A fixture is a real install directory for the reference backend: an
//! 8-piece tokenizer, a `config.json`, and a SafeTensors transition table.
//! Greedy decoding from any token walks `a → b → c → d → a …`.
//!
//! Shared by the unit tests and `tests/` (included there by path), so it
//! only names external crates.

#![allow(dead_code)]

use std::path::Path;

pub const VOCAB: &[&str] = &["<s>", "</s>", "<unk>", " ", "a", "b", "c", "d"];
pub const BOS: u32 = 0;
pub const EOS: u32 = 1;
pub const TRANSITION_TENSOR: &str = "transition.logits";

const PREFERRED: f32 = 4.0;
const MASKED: f32 = -1.0e9;

/// A transition table over [`VOCAB`].
#[derive(Debug, Clone)]
pub struct FixtureModel {
    pub table: Vec<f32>,
}

impl FixtureModel {
    /// `a → b → c → d → a`; every other token leads to `a`; EOS is never
    /// sampled.
    pub fn cycle() -> Self {
        let n = VOCAB.len();
        let mut table = vec![0.0f32; n * n];
        for from in 0..n {
            let to = match VOCAB[from] {
                "a" => 5,
                "b" => 6,
                "c" => 7,
                _ => 4,
            };
            table[from * n + to] = PREFERRED;
            table[from * n + EOS as usize] = MASKED;
        }
        Self { table }
    }

    /// Like [`cycle`](Self::cycle), but `piece` is followed by EOS.
    pub fn ending_after(piece: &str) -> Self {
        let mut model = Self::cycle();
        let n = VOCAB.len();
        if let Some(from) = VOCAB.iter().position(|p| *p == piece) {
            model.table[from * n + EOS as usize] = PREFERRED * 4.0;
        }
        model
    }

    pub fn tokenizer_json() -> String {
        serde_json::json!({
            "vocab": VOCAB,
            "bos_token_id": BOS,
            "eos_token_id": EOS,
            "unk_token_id": 2,
        })
        .to_string()
    }

    pub fn safetensors_bytes(&self) -> Vec<u8> {
        let n = VOCAB.len();
        let data: Vec<u8> = self.table.iter().flat_map(|f| f.to_le_bytes()).collect();
        let view = safetensors::tensor::TensorView::new(safetensors::Dtype::F32, vec![n, n], &data)
            .expect("fixture tensor view");
        safetensors::serialize(vec![(TRANSITION_TENSOR, &view)], &None).expect("fixture serialize")
    }

    /// Writes `model.safetensors`, `tokenizer.json` and `config.json` into `dir`.
    pub fn write_files(&self, dir: &Path) {
        std::fs::create_dir_all(dir).expect("fixture dir");
        std::fs::write(dir.join("model.safetensors"), self.safetensors_bytes()).expect("weights");
        std::fs::write(dir.join("tokenizer.json"), Self::tokenizer_json()).expect("tokenizer");
        std::fs::write(
            dir.join("config.json"),
            serde_json::json!({ "vocab_size": VOCAB.len() }).to_string(),
        )
        .expect("config");
    }

    /// Writes the same three files as a `.tar.gz` archive.
    pub fn write_tar_gz(&self, path: &Path) {
        let file = std::fs::File::create(path).expect("archive file");
        let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(enc);
        let config = serde_json::json!({ "vocab_size": VOCAB.len() }).to_string();
        let entries: [(&str, Vec<u8>); 3] = [
            ("model.safetensors", self.safetensors_bytes()),
            ("tokenizer.json", Self::tokenizer_json().into_bytes()),
            ("config.json", config.into_bytes()),
        ];
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, data.as_slice())
                .expect("append");
        }
        builder
            .into_inner()
            .and_then(|enc| enc.finish())
            .expect("finish archive");
    }
}

/// One manifest entry for a fixture model.
///
/// `parameter_count` at f16 sets the weight estimate to `2 × parameter_count`
/// bytes; the KV cache of a fixture is a few KiB.
pub fn manifest_entry(model_id: &str, parameter_count: u64, context_window: u32) -> serde_json::Value {
    serde_json::json!({
        "model_id": model_id,
        "archive": "{model_id}.tar.gz",
        "quantization": "f16",
        "context_window": context_window,
        "parameter_count": parameter_count,
        "num_layers": 1,
        "hidden_size": 8,
        "files": {
            "weights": ["model.safetensors"],
            "tokenizer": "tokenizer.json",
            "config": "config.json"
        }
    })
}

/// A manifest document listing `entries`.
pub fn manifest(entries: Vec<serde_json::Value>) -> String {
    serde_json::json!({ "model_list": entries }).to_string()
}
