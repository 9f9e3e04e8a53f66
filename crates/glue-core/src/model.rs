//! BERT encoder and task heads
//!
//! Parameter names mirror the Hugging Face layout (`bert.embeddings.*`,
//! `bert.encoder.layer.N.*`, `bert.pooler.*`) so pretrained safetensors load
//! without renaming.

use anyhow::Result;
use candle_core::{DType, Module, Tensor};
use candle_nn::{Dropout, Embedding, LayerNorm, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

use crate::attention::{attention_bias, BertAttention};
use crate::config::BertConfig;
use crate::params::{self, ParamTags};

/// Prefix of every pretrained encoder parameter
pub const ENCODER_PREFIX: &str = "bert";

/// Standard deviation used to initialize a fresh task head
pub const HEAD_INIT_STDEV: f64 = 0.02;

struct BertEmbeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    norm: LayerNorm,
    dropout: Dropout,
}

impl BertEmbeddings {
    fn new(config: &BertConfig, vb: VarBuilder, tags: &mut ParamTags) -> Result<Self> {
        let word_embeddings =
            params::embedding(config.vocab_size, config.hidden_size, vb.pp("word_embeddings"), tags)?;
        let position_embeddings = params::embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
            tags,
        )?;
        let token_type_embeddings = params::embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
            tags,
        )?;
        let norm = params::layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"), tags)?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            norm,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
        })
    }

    fn forward(&self, input_ids: &Tensor, segment_ids: &Tensor, train: bool) -> Result<Tensor> {
        let (_batch, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?.unsqueeze(0)?;

        let words = self.word_embeddings.forward(input_ids)?;
        let segments = self.token_type_embeddings.forward(segment_ids)?;
        let positions = self.position_embeddings.forward(&positions)?;

        let embedded = (words + segments)?.broadcast_add(&positions)?;
        let embedded = self.norm.forward(&embedded)?;
        Ok(self.dropout.forward(&embedded, train)?)
    }
}

struct BertLayer {
    attention: BertAttention,
    intermediate: Linear,
    output: Linear,
    output_norm: LayerNorm,
    dropout: Dropout,
}

impl BertLayer {
    fn new(config: &BertConfig, vb: VarBuilder, tags: &mut ParamTags) -> Result<Self> {
        let attention = BertAttention::new(config, vb.pp("attention"), tags)?;
        let intermediate = params::linear(
            config.hidden_size,
            config.intermediate_size,
            vb.pp("intermediate").pp("dense"),
            tags,
        )?;
        let out_vb = vb.pp("output");
        let output = params::linear(config.intermediate_size, config.hidden_size, out_vb.pp("dense"), tags)?;
        let output_norm =
            params::layer_norm(config.hidden_size, config.layer_norm_eps, out_vb.pp("LayerNorm"), tags)?;

        Ok(Self {
            attention,
            intermediate,
            output,
            output_norm,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
        })
    }

    fn forward(&self, hidden_states: &Tensor, bias: &Tensor, train: bool) -> Result<Tensor> {
        let attended = self.attention.forward(hidden_states, bias, train)?;

        let ffn = self.intermediate.forward(&attended)?.gelu_erf()?;
        let ffn = self.output.forward(&ffn)?;
        let ffn = self.dropout.forward(&ffn, train)?;

        Ok(self.output_norm.forward(&(ffn + attended)?)?)
    }
}

/// Pretrained encoder: embeddings, stacked layers and the `[CLS]` pooler
pub struct BertEncoder {
    config: BertConfig,
    embeddings: BertEmbeddings,
    layers: Vec<BertLayer>,
    pooler: Linear,
}

impl BertEncoder {
    pub fn new(config: BertConfig, vb: VarBuilder, tags: &mut ParamTags) -> Result<Self> {
        config.validate()?;

        let embeddings = BertEmbeddings::new(&config, vb.pp("embeddings"), tags)?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        let layer_vb = vb.pp("encoder").pp("layer");
        for layer_idx in 0..config.num_hidden_layers {
            layers.push(BertLayer::new(&config, layer_vb.pp(layer_idx.to_string()), tags)?);
        }

        let pooler = params::linear(config.hidden_size, config.hidden_size, vb.pp("pooler").pp("dense"), tags)?;

        Ok(Self {
            config,
            embeddings,
            layers,
            pooler,
        })
    }

    /// Returns (sequence_output, pooled_output)
    pub fn forward(
        &self,
        input_ids: &Tensor,
        segment_ids: &Tensor,
        valid_length: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (_batch, seq_len) = input_ids.dims2()?;
        if seq_len > self.config.max_position_embeddings {
            anyhow::bail!(
                "Sequence length {} exceeds max_position_embeddings {}",
                seq_len,
                self.config.max_position_embeddings
            );
        }

        let mut hidden_states = self.embeddings.forward(input_ids, segment_ids, train)?;
        let bias = attention_bias(valid_length, seq_len, hidden_states.dtype())?;

        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, &bias, train)?;
        }

        let cls = hidden_states.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;

        Ok((hidden_states, pooled))
    }

    pub fn config(&self) -> &BertConfig {
        &self.config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadKind {
    Classifier { num_classes: usize },
    Regression,
}

impl HeadKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            HeadKind::Classifier { .. } => "classifier",
            HeadKind::Regression => "regression",
        }
    }

    pub fn output_dim(&self) -> usize {
        match self {
            HeadKind::Classifier { num_classes } => *num_classes,
            HeadKind::Regression => 1,
        }
    }
}

/// Encoder plus a freshly initialized task head
pub struct BertForTask {
    encoder: BertEncoder,
    head_kind: HeadKind,
    head_dropout: Dropout,
    head: Linear,
    tags: ParamTags,
}

impl BertForTask {
    pub fn new(config: BertConfig, head_kind: HeadKind, vb: VarBuilder) -> Result<Self> {
        if head_kind.output_dim() == 0 {
            anyhow::bail!("Classifier head needs at least one class");
        }

        let mut tags = ParamTags::new();
        let encoder = BertEncoder::new(config, vb.pp(ENCODER_PREFIX), &mut tags)?;
        let hidden = encoder.config().hidden_size;
        let head = params::linear(hidden, head_kind.output_dim(), vb.pp(head_kind.prefix()), &mut tags)?;

        Ok(Self {
            head_dropout: Dropout::new(encoder.config().hidden_dropout_prob as f32),
            encoder,
            head_kind,
            head,
            tags,
        })
    }

    /// Draw the head weights from N(0, 0.02) with an explicit seed
    pub fn init_head(&self, varmap: &VarMap, seed: u64) -> Result<()> {
        let n = params::init_normal(varmap, self.head_kind.prefix(), HEAD_INIT_STDEV, seed)?;
        tracing::debug!("Initialized {} head parameters (seed {})", n, seed);
        Ok(())
    }

    /// Scores of shape (batch, num_classes), or (batch,) for regression
    pub fn forward(
        &self,
        input_ids: &Tensor,
        segment_ids: &Tensor,
        valid_length: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (_, pooled) = self.encoder.forward(input_ids, segment_ids, valid_length, train)?;
        let pooled = self.head_dropout.forward(&pooled, train)?;
        let out = self.head.forward(&pooled)?;

        match self.head_kind {
            HeadKind::Classifier { .. } => Ok(out),
            HeadKind::Regression => Ok(out.squeeze(1)?),
        }
    }

    pub fn head_kind(&self) -> HeadKind {
        self.head_kind
    }

    pub fn encoder(&self) -> &BertEncoder {
        &self.encoder
    }

    pub fn config(&self) -> &BertConfig {
        self.encoder.config()
    }

    /// Decay-group tags of every parameter created by this model
    pub fn param_tags(&self) -> &ParamTags {
        &self.tags
    }
}

/// Build a model whose vars live in `varmap`, with a seeded head
pub fn build_model(
    config: BertConfig,
    head_kind: HeadKind,
    varmap: &VarMap,
    dtype: DType,
    device: &candle_core::Device,
    seed: u64,
) -> Result<BertForTask> {
    let vb = VarBuilder::from_varmap(varmap, dtype, device);
    let model = BertForTask::new(config, head_kind, vb)?;
    model.init_head(varmap, seed)?;
    Ok(model)
}
