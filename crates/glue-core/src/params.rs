//! Parameter tagging for weight-decay groups
//!
//! Every variable is tagged with its [`DecayGroup`] at the moment the layer
//! that owns it is built, so the optimizer partition never depends on
//! matching parameter names after the fact.

use anyhow::Result;
use candle_core::{DType, Tensor, Var};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecayGroup {
    /// Weight matrices and embedding tables
    Decay,
    /// Biases and normalization gains/offsets
    NoDecay,
}

#[derive(Debug, Clone, Default)]
pub struct ParamTags {
    tags: BTreeMap<String, DecayGroup>,
}

/// Variables split by decay group, each sorted by parameter name.
pub struct PartitionedVars {
    pub decay: Vec<(String, Var)>,
    pub no_decay: Vec<(String, Var)>,
}

impl PartitionedVars {
    pub fn decay_vars(&self) -> Vec<Var> {
        self.decay.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn no_decay_vars(&self) -> Vec<Var> {
        self.no_decay.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn all_vars(&self) -> Vec<Var> {
        self.decay
            .iter()
            .chain(self.no_decay.iter())
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl ParamTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag `name` under the builder's current prefix
    pub fn tag(&mut self, vb: &VarBuilder, name: &str, group: DecayGroup) {
        let prefix = vb.prefix();
        let full = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", prefix, name)
        };
        self.tags.insert(full, group);
    }

    pub fn group_of(&self, name: &str) -> Option<DecayGroup> {
        self.tags.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DecayGroup)> {
        self.tags.iter().map(|(n, g)| (n.as_str(), *g))
    }

    /// Split the vars of `varmap` into the two decay groups.
    ///
    /// Fails if a var has no tag or a tag has no var: the partition must be
    /// exhaustive and disjoint.
    pub fn partition(&self, varmap: &VarMap) -> Result<PartitionedVars> {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("VarMap lock poisoned"))?;

        let mut untagged: Vec<&str> = data
            .keys()
            .filter(|name| !self.tags.contains_key(name.as_str()))
            .map(|s| s.as_str())
            .collect();
        if !untagged.is_empty() {
            untagged.sort_unstable();
            anyhow::bail!("Parameters without a decay group: {}", untagged.join(", "));
        }

        let mut decay = Vec::new();
        let mut no_decay = Vec::new();
        for (name, group) in &self.tags {
            let var = data
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("Tagged parameter {} is not in the var map", name))?;
            match group {
                DecayGroup::Decay => decay.push((name.clone(), var.clone())),
                DecayGroup::NoDecay => no_decay.push((name.clone(), var.clone())),
            }
        }

        Ok(PartitionedVars { decay, no_decay })
    }
}

/// `candle_nn::linear` that records its weight/bias groups
pub fn linear(in_dim: usize, out_dim: usize, vb: VarBuilder, tags: &mut ParamTags) -> Result<Linear> {
    tags.tag(&vb, "weight", DecayGroup::Decay);
    tags.tag(&vb, "bias", DecayGroup::NoDecay);
    Ok(candle_nn::linear(in_dim, out_dim, vb)?)
}

/// `candle_nn::layer_norm`; gain and offset are both excluded from decay
pub fn layer_norm(size: usize, eps: f64, vb: VarBuilder, tags: &mut ParamTags) -> Result<LayerNorm> {
    tags.tag(&vb, "weight", DecayGroup::NoDecay);
    tags.tag(&vb, "bias", DecayGroup::NoDecay);
    Ok(candle_nn::layer_norm(size, eps, vb)?)
}

pub fn embedding(vocab: usize, hidden: usize, vb: VarBuilder, tags: &mut ParamTags) -> Result<Embedding> {
    tags.tag(&vb, "weight", DecayGroup::Decay);
    Ok(candle_nn::embedding(vocab, hidden, vb)?)
}

/// Re-initialize every var under `prefix`: weights from N(0, stdev) using a
/// seeded generator, biases to zero.
pub fn init_normal(varmap: &VarMap, prefix: &str, stdev: f64, seed: u64) -> Result<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, stdev as f32)
        .map_err(|e| anyhow::anyhow!("Invalid init stdev {}: {}", stdev, e))?;

    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("VarMap lock poisoned"))?;
    let mut names: Vec<&String> = data
        .keys()
        .filter(|n| n.starts_with(&format!("{}.", prefix)))
        .collect();
    names.sort();

    for name in &names {
        let var = &data[*name];
        let shape = var.shape().clone();
        let fresh = if name.ends_with(".bias") {
            Tensor::zeros(shape, DType::F32, var.device())?
        } else {
            let values: Vec<f32> = (0..shape.elem_count()).map(|_| normal.sample(&mut rng)).collect();
            Tensor::from_vec(values, shape, var.device())?
        };
        var.set(&fresh.to_dtype(var.dtype())?)?;
    }

    Ok(names.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_partition_is_exhaustive() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut tags = ParamTags::new();

        linear(4, 3, vb.pp("dense"), &mut tags)?;
        layer_norm(3, 1e-12, vb.pp("LayerNorm"), &mut tags)?;
        embedding(10, 4, vb.pp("word_embeddings"), &mut tags)?;

        let parts = tags.partition(&varmap)?;
        let decay: Vec<&str> = parts.decay.iter().map(|(n, _)| n.as_str()).collect();
        let no_decay: Vec<&str> = parts.no_decay.iter().map(|(n, _)| n.as_str()).collect();

        assert_eq!(decay, vec!["dense.weight", "word_embeddings.weight"]);
        assert_eq!(no_decay, vec!["LayerNorm.bias", "LayerNorm.weight", "dense.bias"]);
        assert_eq!(parts.all_vars().len(), 5);
        Ok(())
    }

    #[test]
    fn test_untagged_var_is_rejected() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut tags = ParamTags::new();

        linear(2, 2, vb.pp("tagged"), &mut tags)?;
        // Created without going through a tagging helper
        candle_nn::linear(2, 2, vb.pp("rogue"))?;

        let err = tags.partition(&varmap).err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("rogue.weight"), "unexpected error: {}", err);
        Ok(())
    }

    #[test]
    fn test_init_normal_is_seeded() -> Result<()> {
        let build = || -> Result<VarMap> {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let mut tags = ParamTags::new();
            linear(8, 2, vb.pp("classifier"), &mut tags)?;
            init_normal(&varmap, "classifier", 0.02, 7)?;
            Ok(varmap)
        };

        let a = build()?;
        let b = build()?;
        let get = |vm: &VarMap, n: &str| -> Result<Vec<f32>> {
            let data = vm.data().lock().map_err(|_| anyhow::anyhow!("lock"))?;
            Ok(data[n].as_tensor().flatten_all()?.to_vec1::<f32>()?)
        };

        assert_eq!(get(&a, "classifier.weight")?, get(&b, "classifier.weight")?);
        assert!(get(&a, "classifier.bias")?.iter().all(|&x| x == 0.0));
        let w = get(&a, "classifier.weight")?;
        assert!(w.iter().all(|x| x.abs() < 0.2));
        Ok(())
    }
}
