//! Loading pretrained encoder weights from safetensors
//!
//! The checkpoint only covers the encoder; the task head stays as
//! initialized. Checkpoints exported from `BertModel` lack the `bert.`
//! prefix and older TF conversions name LayerNorm parameters
//! `gamma`/`beta`, so keys are normalized before lookup.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use std::collections::HashMap;
use std::path::Path;

use crate::model::ENCODER_PREFIX;

/// Map a checkpoint key onto the var map naming
pub fn normalize_key(key: &str) -> String {
    let key = if key.starts_with(&format!("{}.", ENCODER_PREFIX)) {
        key.to_string()
    } else {
        format!("{}.{}", ENCODER_PREFIX, key)
    };

    if let Some(stem) = key.strip_suffix(".gamma") {
        format!("{}.weight", stem)
    } else if let Some(stem) = key.strip_suffix(".beta") {
        format!("{}.bias", stem)
    } else {
        key
    }
}

/// Copy every `bert.*` var from `tensors`. Returns the number of vars set.
///
/// Extra checkpoint entries (pretraining heads) are ignored; a missing
/// encoder parameter or a shape mismatch is an error.
pub fn load_encoder_tensors(varmap: &VarMap, tensors: HashMap<String, Tensor>) -> Result<usize> {
    let tensors: HashMap<String, Tensor> = tensors
        .into_iter()
        .map(|(k, v)| (normalize_key(&k), v))
        .collect();

    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("VarMap lock poisoned"))?;

    let mut missing = Vec::new();
    let mut loaded = 0;
    let mut names: Vec<&String> = data
        .keys()
        .filter(|n| n.starts_with(&format!("{}.", ENCODER_PREFIX)))
        .collect();
    names.sort();

    for name in names {
        let var = &data[name];
        match tensors.get(name) {
            Some(tensor) => {
                if tensor.shape() != var.shape() {
                    anyhow::bail!(
                        "Shape mismatch for {}: checkpoint {:?}, model {:?}",
                        name,
                        tensor.shape(),
                        var.shape()
                    );
                }
                var.set(&tensor.to_dtype(var.dtype())?.to_device(var.device())?)?;
                loaded += 1;
            }
            None => missing.push(name.as_str()),
        }
    }

    if !missing.is_empty() {
        anyhow::bail!(
            "Pretrained checkpoint is missing {} encoder parameters (first: {})",
            missing.len(),
            missing[0]
        );
    }

    Ok(loaded)
}

/// Load encoder weights from a safetensors file
pub fn load_encoder_weights(varmap: &VarMap, path: impl AsRef<Path>, device: &Device) -> Result<usize> {
    let path = path.as_ref();
    let tensors = candle_core::safetensors::load(path, device)
        .with_context(|| format!("Failed to read pretrained weights {}", path.display()))?;
    let loaded = load_encoder_tensors(varmap, tensors)?;
    tracing::info!("Loaded {} pretrained encoder tensors from {}", loaded, path.display());
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BertConfig;
    use crate::model::{build_model, HeadKind};
    use candle_core::DType;

    #[test]
    fn test_normalize_key() {
        assert_eq!(
            normalize_key("bert.embeddings.LayerNorm.gamma"),
            "bert.embeddings.LayerNorm.weight"
        );
        assert_eq!(
            normalize_key("encoder.layer.0.output.LayerNorm.beta"),
            "bert.encoder.layer.0.output.LayerNorm.bias"
        );
        assert_eq!(normalize_key("bert.pooler.dense.weight"), "bert.pooler.dense.weight");
    }

    #[test]
    fn test_round_trip_through_safetensors() -> Result<()> {
        let device = Device::Cpu;
        let head = HeadKind::Classifier { num_classes: 2 };

        let source = VarMap::new();
        build_model(BertConfig::tiny(), head, &source, DType::F32, &device, 1)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.safetensors");
        source.save(&path)?;

        let target = VarMap::new();
        build_model(BertConfig::tiny(), head, &target, DType::F32, &device, 2)?;
        let loaded = load_encoder_weights(&target, &path, &device)?;

        let encoder_vars = target
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("lock"))?
            .keys()
            .filter(|k| k.starts_with("bert."))
            .count();
        assert_eq!(loaded, encoder_vars);

        let src = source.data().lock().map_err(|_| anyhow::anyhow!("lock"))?;
        let dst = target.data().lock().map_err(|_| anyhow::anyhow!("lock"))?;
        let pooler = "bert.pooler.dense.weight";
        assert_eq!(
            src[pooler].as_tensor().flatten_all()?.to_vec1::<f32>()?,
            dst[pooler].as_tensor().flatten_all()?.to_vec1::<f32>()?
        );
        // Head keeps its own initialization
        assert_ne!(
            src["classifier.weight"].as_tensor().flatten_all()?.to_vec1::<f32>()?,
            dst["classifier.weight"].as_tensor().flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn test_missing_encoder_weights_fail() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        build_model(BertConfig::tiny(), HeadKind::Regression, &varmap, DType::F32, &device, 0)?;

        let mut partial = HashMap::new();
        partial.insert(
            "bert.pooler.dense.bias".to_string(),
            Tensor::zeros(16, DType::F32, &device)?,
        );
        assert!(load_encoder_tensors(&varmap, partial).is_err());
        Ok(())
    }
}
