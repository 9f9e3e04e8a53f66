//! Test fixtures

use anyhow::Result;

use crate::tokenizer::{SpecialTokens, TextEncoder};

const WORDS: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "the", "cat", "a", "dog", "runs", "one", "two", "three", "four",
    "five", "six", "seven", "eight", "good", "bad", "movie", "is", "was",
];

pub struct WordVocab {
    words: Vec<String>,
}

impl WordVocab {
    pub fn new() -> Self {
        Self {
            words: WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl TextEncoder for WordVocab {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text
            .split_whitespace()
            .map(|w| {
                let w = w.to_lowercase();
                self.words.iter().position(|v| *v == w).unwrap_or(1) as u32
            })
            .collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        Ok(ids
            .iter()
            .map(|&id| self.words.get(id as usize).map(String::as_str).unwrap_or("[UNK]"))
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens { cls: 2, sep: 3, pad: 0 }
    }
}
