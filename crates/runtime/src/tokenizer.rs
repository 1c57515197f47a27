// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Vocabulary tokenizer.
//!
//! # Format
//! ```json
//! {
//!   "vocab": ["<s>", "</s>", "<unk>", " ", "he", "llo", "hello"],
//!   "bos_token_id": 0,
//!   "eos_token_id": 1,
//!   "unk_token_id": 2
//! }
//! ```
//!
//! Encoding is greedy longest-match over the vocabulary pieces. A character
//! no piece starts with becomes `unk_token_id`. Special tokens (BOS, EOS,
//! UNK) decode to the empty string.

use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, serde::Deserialize)]
struct TokenizerFile {
    vocab: Vec<String>,
    #[serde(default)]
    bos_token_id: Option<u32>,
    eos_token_id: u32,
    #[serde(default)]
    unk_token_id: Option<u32>,
}

/// A loaded vocabulary.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    pieces: Vec<String>,
    index: HashMap<String, u32>,
    max_piece_chars: usize,
    bos: Option<u32>,
    eos: u32,
    unk: Option<u32>,
}

impl Tokenizer {
    /// Loads a tokenizer from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, super::RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            super::RuntimeError::TokenizerError(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Parses a tokenizer from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, super::RuntimeError> {
        let file: TokenizerFile = serde_json::from_str(json)
            .map_err(|e| super::RuntimeError::TokenizerError(format!("JSON parse error: {e}")))?;

        let n = file.vocab.len();
        if n == 0 {
            return Err(super::RuntimeError::TokenizerError("empty vocabulary".into()));
        }
        let in_range = |id: u32| (id as usize) < n;
        for (name, id) in [
            ("bos_token_id", file.bos_token_id),
            ("eos_token_id", Some(file.eos_token_id)),
            ("unk_token_id", file.unk_token_id),
        ] {
            if let Some(id) = id.filter(|&id| !in_range(id)) {
                return Err(super::RuntimeError::TokenizerError(format!(
                    "{name} {id} outside vocabulary of {n}"
                )));
            }
        }

        let mut index = HashMap::with_capacity(n);
        for (i, piece) in file.vocab.iter().enumerate() {
            // First occurrence wins for duplicated pieces.
            index.entry(piece.clone()).or_insert(i as u32);
        }
        let max_piece_chars = file.vocab.iter().map(|p| p.chars().count()).max().unwrap_or(1);

        Ok(Self {
            pieces: file.vocab,
            index,
            max_piece_chars,
            bos: file.bos_token_id,
            eos: file.eos_token_id,
            unk: file.unk_token_id,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    pub fn eos_token_id(&self) -> u32 {
        self.eos
    }

    pub fn bos_token_id(&self) -> Option<u32> {
        self.bos
    }

    fn is_special(&self, id: u32) -> bool {
        id == self.eos || Some(id) == self.bos || Some(id) == self.unk
    }

    /// Encodes `text`, prefixed with BOS when the vocabulary has one.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut ids = Vec::with_capacity(chars.len() + 1);
        ids.extend(self.bos);

        let mut i = 0;
        while i < chars.len() {
            let start = chars[i].0;
            let longest = (1..=self.max_piece_chars.min(chars.len() - i))
                .rev()
                .find_map(|len| {
                    let end = chars.get(i + len).map_or(text.len(), |c| c.0);
                    self.index
                        .get(&text[start..end])
                        .filter(|&&id| !self.is_special(id))
                        .map(|&id| (id, len))
                });
            match longest {
                Some((id, len)) => {
                    ids.push(id);
                    i += len;
                }
                None => {
                    if let Some(unk) = self.unk {
                        ids.push(unk);
                    } else {
                        tracing::debug!(ch = %chars[i].1, "dropping character with no vocabulary piece");
                    }
                    i += 1;
                }
            }
        }
        ids
    }

    /// Text for a single token. Special and out-of-range ids decode to `""`.
    pub fn decode_token(&self, id: u32) -> &str {
        if self.is_special(id) {
            return "";
        }
        self.pieces.get(id as usize).map_or("", String::as_str)
    }

    /// Concatenated text for a token sequence.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter().map(|&id| self.decode_token(id)).collect()
    }
}
