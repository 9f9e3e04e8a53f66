//! Parameter gradients: extraction, accumulation and global-norm clipping

use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Tensor, TensorId, Var};
use std::collections::HashMap;

/// Gradients of trainable parameters, keyed by the parameter tensor id.
///
/// Unlike a [`GradStore`], only parameter gradients are kept, so the
/// intermediate activation gradients of a backward pass can be dropped
/// right after extraction.
#[derive(Default, Clone)]
pub struct Gradients {
    grads: HashMap<TensorId, Tensor>,
}

impl Gradients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the gradients of `vars` from a backward pass
    pub fn from_backward(store: &GradStore, vars: &[Var]) -> Self {
        let grads = vars
            .iter()
            .filter_map(|var| {
                store
                    .get(var.as_tensor())
                    .map(|grad| (var.as_tensor().id(), grad.detach()))
            })
            .collect();
        Self { grads }
    }

    pub fn insert(&mut self, var: &Var, grad: Tensor) {
        self.grads.insert(var.as_tensor().id(), grad);
    }

    pub fn get(&self, var: &Var) -> Option<&Tensor> {
        self.grads.get(&var.as_tensor().id())
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    /// Start a new accumulation window
    pub fn clear(&mut self) {
        self.grads.clear();
    }

    /// Elementwise sum with `other` (no averaging)
    pub fn accumulate(&mut self, other: Gradients) -> Result<()> {
        for (id, grad) in other.grads {
            let summed = match self.grads.remove(&id) {
                Some(existing) => (existing + grad)?,
                None => grad,
            };
            self.grads.insert(id, summed);
        }
        Ok(())
    }

    /// L2 norm over all parameters jointly
    pub fn global_norm(&self) -> Result<f64> {
        let mut total_sq = 0.0f64;
        for grad in self.grads.values() {
            let sq = grad.to_dtype(DType::F32)?.sqr()?.sum_all()?.to_scalar::<f32>()?;
            total_sq += sq as f64;
        }
        Ok(total_sq.sqrt())
    }

    /// Rescale so the global norm is at most `max_norm`.
    ///
    /// Returns the norm before clipping; gradients under the threshold are
    /// left untouched.
    pub fn clip_global_norm(&mut self, max_norm: f64) -> Result<f64> {
        let total_norm = self.global_norm()?;
        if total_norm > max_norm {
            let scale = max_norm / (total_norm + 1e-6);
            for grad in self.grads.values_mut() {
                *grad = grad.affine(scale, 0.0)?;
            }
        }
        Ok(total_norm)
    }
}
