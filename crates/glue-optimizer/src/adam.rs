//! Adam with decoupled or L2-coupled weight decay
//!
//! Per-parameter first/second moment estimates with bias correction.
//! Operates on explicit [`Gradients`] since candle tensors carry no `.grad`.

use candle_core::{Result, Tensor, TensorId, Var};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::gradients::Gradients;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeightDecay {
    /// AdamW: θ ← θ·(1 − lr·λ) applied outside the adaptive update
    Decoupled(f64),
    /// Classic L2: λ·θ is added to the gradient before the moments
    Coupled(f64),
}

impl WeightDecay {
    pub fn rate(&self) -> f64 {
        match self {
            WeightDecay::Decoupled(wd) | WeightDecay::Coupled(wd) => *wd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: WeightDecay,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-9,
            weight_decay: WeightDecay::Decoupled(0.01),
        }
    }
}

struct MomentState {
    m: Tensor,
    v: Tensor,
}

pub struct Adam {
    config: AdamConfig,
    lr: f64,
    vars: Vec<Var>,
    step: usize,
    state: HashMap<TensorId, MomentState>,
}

impl Adam {
    pub fn new(vars: Vec<Var>, config: AdamConfig, lr: f64) -> Self {
        Self {
            config,
            lr,
            vars,
            step: 0,
            state: HashMap::new(),
        }
    }

    /// One update of every var that has a gradient in `grads`
    pub fn step(&mut self, grads: &Gradients) -> Result<()> {
        self.step += 1;

        let bias_correction1 = 1.0 - self.config.beta1.powi(self.step as i32);
        let bias_correction2 = 1.0 - self.config.beta2.powi(self.step as i32);

        for var in &self.vars {
            let Some(grad) = grads.get(var) else {
                continue;
            };
            let param = var.as_tensor();
            let grad = grad.to_dtype(param.dtype())?;

            let grad = match self.config.weight_decay {
                WeightDecay::Coupled(wd) if wd > 0.0 => (grad + param.affine(wd, 0.0)?)?,
                _ => grad,
            };

            let id = param.id();
            if !self.state.contains_key(&id) {
                self.state.insert(
                    id,
                    MomentState {
                        m: param.zeros_like()?,
                        v: param.zeros_like()?,
                    },
                );
            }
            let Some(state) = self.state.get_mut(&id) else {
                continue;
            };

            // Update moments
            state.m = (state.m.affine(self.config.beta1, 0.0)? + grad.affine(1.0 - self.config.beta1, 0.0)?)?;
            state.v = (state.v.affine(self.config.beta2, 0.0)?
                + grad.sqr()?.affine(1.0 - self.config.beta2, 0.0)?)?;

            // Bias-corrected moments
            let m_hat = state.m.affine(1.0 / bias_correction1, 0.0)?;
            let v_hat = state.v.affine(1.0 / bias_correction2, 0.0)?;
            let update = m_hat.div(&v_hat.sqrt()?.affine(1.0, self.config.eps)?)?;

            let decayed = match self.config.weight_decay {
                WeightDecay::Decoupled(wd) if wd > 0.0 => param.affine(1.0 - self.lr * wd, 0.0)?,
                _ => param.clone(),
            };
            var.set(&(decayed - update.affine(self.lr, 0.0)?)?)?;
        }

        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        self.lr
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    pub fn num_steps(&self) -> usize {
        self.step
    }

    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }
}
