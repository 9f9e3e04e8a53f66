//! BERT encoder configuration
//!
//! Field names follow the Hugging Face `config.json` so a downloaded
//! checkpoint configuration deserializes directly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BertConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob: f64,
    #[serde(default = "default_dropout")]
    pub attention_probs_dropout_prob: f64,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

fn default_dropout() -> f64 {
    0.1
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl Default for BertConfig {
    fn default() -> Self {
        Self::base()
    }
}

impl BertConfig {
    /// BERT-base, uncased vocabulary (12 layers, 768 hidden, 12 heads)
    pub fn base() -> Self {
        Self {
            vocab_size: 30522,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            hidden_dropout_prob: 0.1,
            attention_probs_dropout_prob: 0.1,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        }
    }

    /// BERT-large (24 layers, 1024 hidden, 16 heads)
    pub fn large() -> Self {
        Self {
            hidden_size: 1024,
            num_hidden_layers: 24,
            num_attention_heads: 16,
            intermediate_size: 4096,
            ..Self::base()
        }
    }

    /// Toy-sized encoder for tests and smoke runs. Dropout is off so
    /// forward passes are deterministic.
    pub fn tiny() -> Self {
        Self {
            vocab_size: 64,
            hidden_size: 16,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            intermediate_size: 32,
            hidden_dropout_prob: 0.0,
            attention_probs_dropout_prob: 0.0,
            max_position_embeddings: 64,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        }
    }

    /// Read a Hugging Face `config.json`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse model config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builder: set vocab_size (must match tokenizer)
    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Approximate parameter count of the encoder (without task head)
    pub fn total_params(&self) -> usize {
        let h = self.hidden_size;
        let embeddings =
            (self.vocab_size + self.max_position_embeddings + self.type_vocab_size) * h + 2 * h;
        let attention = 4 * (h * h + h) + 2 * h;
        let ffn = h * self.intermediate_size
            + self.intermediate_size
            + self.intermediate_size * h
            + h
            + 2 * h;
        let pooler = h * h + h;
        embeddings + self.num_hidden_layers * (attention + ffn) + pooler
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            anyhow::bail!(
                "hidden_size ({}) must be divisible by num_attention_heads ({})",
                self.hidden_size,
                self.num_attention_heads
            );
        }
        for (name, p) in [
            ("hidden_dropout_prob", self.hidden_dropout_prob),
            ("attention_probs_dropout_prob", self.attention_probs_dropout_prob),
        ] {
            if !(0.0..1.0).contains(&p) {
                anyhow::bail!("{} must be in [0, 1), got {}", name, p);
            }
        }
        if self.type_vocab_size < 2 {
            anyhow::bail!("type_vocab_size must be at least 2 for sentence pairs");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_sizes() {
        let tiny = BertConfig::tiny();
        let base = BertConfig::base();
        let large = BertConfig::large();

        assert!(tiny.total_params() < base.total_params());
        assert!(base.total_params() < large.total_params());
        // BERT-base is ~110M parameters
        let base_m = base.total_params() / 1_000_000;
        assert!((105..=112).contains(&base_m), "got {}M", base_m);
    }

    #[test]
    fn test_validation() {
        assert!(BertConfig::base().validate().is_ok());

        let mut invalid = BertConfig::base();
        invalid.hidden_size = 770;
        assert!(invalid.validate().is_err());

        let mut invalid = BertConfig::tiny();
        invalid.hidden_dropout_prob = 1.0;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_parse_hf_config() -> Result<()> {
        let raw = r#"{
            "architectures": ["BertForMaskedLM"],
            "attention_probs_dropout_prob": 0.1,
            "hidden_act": "gelu",
            "hidden_dropout_prob": 0.1,
            "hidden_size": 768,
            "initializer_range": 0.02,
            "intermediate_size": 3072,
            "layer_norm_eps": 1e-12,
            "max_position_embeddings": 512,
            "model_type": "bert",
            "num_attention_heads": 12,
            "num_hidden_layers": 12,
            "pad_token_id": 0,
            "type_vocab_size": 2,
            "vocab_size": 30522
        }"#;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, raw)?;

        let config = BertConfig::from_file(&path)?;
        assert_eq!(config, BertConfig::base());
        Ok(())
    }
}
