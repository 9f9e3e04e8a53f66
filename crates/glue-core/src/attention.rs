//! Bidirectional multi-head self-attention with padding mask
//!
//! Post-norm BERT block: `LayerNorm(x + Dropout(Wo · Attn(x)))`.

use anyhow::Result;
use candle_core::{DType, Module, Tensor};
use candle_nn::{Dropout, LayerNorm, Linear, VarBuilder};

use crate::config::BertConfig;
use crate::params::{self, ParamTags};

pub struct BertAttention {
    num_heads: usize,
    head_dim: usize,
    hidden_size: usize,

    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    output_norm: LayerNorm,

    attention_dropout: Dropout,
    hidden_dropout: Dropout,
}

impl BertAttention {
    pub fn new(config: &BertConfig, vb: VarBuilder, tags: &mut ParamTags) -> Result<Self> {
        config.validate()?;
        let hidden_size = config.hidden_size;
        let head_dim = config.head_dim();

        let self_vb = vb.pp("self");
        let query = params::linear(hidden_size, hidden_size, self_vb.pp("query"), tags)?;
        let key = params::linear(hidden_size, hidden_size, self_vb.pp("key"), tags)?;
        let value = params::linear(hidden_size, hidden_size, self_vb.pp("value"), tags)?;

        let out_vb = vb.pp("output");
        let output = params::linear(hidden_size, hidden_size, out_vb.pp("dense"), tags)?;
        let output_norm =
            params::layer_norm(hidden_size, config.layer_norm_eps, out_vb.pp("LayerNorm"), tags)?;

        Ok(Self {
            num_heads: config.num_attention_heads,
            head_dim,
            hidden_size,
            query,
            key,
            value,
            output,
            output_norm,
            attention_dropout: Dropout::new(config.attention_probs_dropout_prob as f32),
            hidden_dropout: Dropout::new(config.hidden_dropout_prob as f32),
        })
    }

    /// `attention_bias` is the additive (batch, 1, 1, seq) mask from
    /// [`attention_bias`].
    pub fn forward(&self, hidden_states: &Tensor, attention_bias: &Tensor, train: bool) -> Result<Tensor> {
        let q = self.reshape_for_heads(&self.query.forward(hidden_states)?)?;
        let k = self.reshape_for_heads(&self.key.forward(hidden_states)?)?;
        let v = self.reshape_for_heads(&self.value.forward(hidden_states)?)?;

        // Scaled dot-product attention
        let scale = (self.head_dim as f64).sqrt();
        let k_t = k.transpose(2, 3)?.contiguous()?;
        let scores = (q.matmul(&k_t)? / scale)?;
        let scores = scores.broadcast_add(attention_bias)?;

        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        let probs = self.attention_dropout.forward(&probs, train)?;

        let context = self.reshape_from_heads(&probs.matmul(&v)?)?;
        let projected = self.output.forward(&context)?;
        let projected = self.hidden_dropout.forward(&projected, train)?;

        Ok(self.output_norm.forward(&(projected + hidden_states)?)?)
    }

    fn reshape_for_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = x.dims3()?;
        Ok(x.reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn reshape_from_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch_size, _, seq_len, _) = x.dims4()?;
        Ok(x.transpose(1, 2)?
            .contiguous()?
            .reshape((batch_size, seq_len, self.hidden_size))?)
    }
}

/// Additive attention mask from per-example valid lengths.
///
/// Returns (batch, 1, 1, seq_len): 0 where position < valid_length,
/// -10000 on padding.
pub fn attention_bias(valid_length: &Tensor, seq_len: usize, dtype: DType) -> Result<Tensor> {
    let device = valid_length.device();
    let positions = Tensor::arange(0u32, seq_len as u32, device)?.unsqueeze(0)?;
    let valid = valid_length.to_dtype(DType::U32)?.unsqueeze(1)?;
    let keep = positions.broadcast_lt(&valid)?.to_dtype(dtype)?;
    let bias = keep.affine(10_000.0, -10_000.0)?;
    Ok(bias.unsqueeze(1)?.unsqueeze(1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_attention_forward() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = BertConfig::tiny();
        let mut tags = ParamTags::new();

        let attn = BertAttention::new(&config, vb.pp("attention"), &mut tags)?;
        assert_eq!(tags.len(), 10);

        let hidden = Tensor::randn(0f32, 1.0, (2, 5, config.hidden_size), &device)?;
        let valid = Tensor::new(&[5u32, 3], &device)?;
        let bias = attention_bias(&valid, 5, DType::F32)?;
        let output = attn.forward(&hidden, &bias, false)?;

        assert_eq!(output.dims(), &[2, 5, config.hidden_size]);
        Ok(())
    }

    #[test]
    fn test_attention_bias_masks_padding() -> Result<()> {
        let device = Device::Cpu;
        let valid = Tensor::new(&[2u32, 4], &device)?;
        let bias = attention_bias(&valid, 4, DType::F32)?;

        assert_eq!(bias.dims(), &[2, 1, 1, 4]);
        let rows = bias.squeeze(1)?.squeeze(1)?.to_vec2::<f32>()?;
        assert_eq!(rows[0], vec![0.0, 0.0, -10_000.0, -10_000.0]);
        assert_eq!(rows[1], vec![0.0, 0.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_padding_does_not_change_valid_positions() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = BertConfig::tiny();
        let attn = BertAttention::new(&config, vb, &mut ParamTags::new())?;

        let short = Tensor::randn(0f32, 1.0, (1, 3, config.hidden_size), &device)?;
        let pad = Tensor::randn(0f32, 1.0, (1, 2, config.hidden_size), &device)?;
        let padded = Tensor::cat(&[&short, &pad], 1)?;

        let out_short = attn.forward(&short, &attention_bias(&Tensor::new(&[3u32], &device)?, 3, DType::F32)?, false)?;
        let out_padded = attn.forward(&padded, &attention_bias(&Tensor::new(&[3u32], &device)?, 5, DType::F32)?, false)?;

        let diff = (out_short - out_padded.narrow(1, 0, 3)?)?.abs()?.max_keepdim(2)?.flatten_all()?.max(0)?;
        assert!(diff.to_scalar::<f32>()? < 1e-4);
        Ok(())
    }
}
