//! Text to token ids

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::error::DataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub cls: u32,
    pub sep: u32,
    pub pad: u32,
}

/// Word-piece encoding without special tokens; the transform adds those
pub trait TextEncoder {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
    fn decode(&self, ids: &[u32]) -> Result<String>;
    fn special_tokens(&self) -> SpecialTokens;
}

/// [`TextEncoder`] over a Hugging Face `tokenizer.json`
pub struct HfTextEncoder {
    tokenizer: Tokenizer,
    lowercase: bool,
    special: SpecialTokens,
}

impl HfTextEncoder {
    pub fn new(tokenizer: Tokenizer, lowercase: bool) -> Result<Self> {
        let lookup = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| DataError::Tokenizer(format!("vocabulary has no {} token", token)))
        };
        let special = SpecialTokens {
            cls: lookup("[CLS]")?,
            sep: lookup("[SEP]")?,
            pad: lookup("[PAD]")?,
        };

        Ok(Self {
            tokenizer,
            lowercase,
            special,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn lowercase(&self) -> bool {
        self.lowercase
    }
}

impl TextEncoder for HfTextEncoder {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = if self.lowercase {
            self.tokenizer.encode(text.to_lowercase(), false)
        } else {
            self.tokenizer.encode(text, false)
        }
        .map_err(|e| DataError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(ids, false)
            .map_err(|e| DataError::Tokenizer(e.to_string()))?;
        Ok(text)
    }

    fn special_tokens(&self) -> SpecialTokens {
        self.special
    }
}

/// Casing follows the model name unless overridden
pub fn lowercase_for_model(model: &str) -> bool {
    model.contains("uncased")
}
