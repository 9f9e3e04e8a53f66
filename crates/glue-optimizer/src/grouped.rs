//! Two-group optimizer with decay/no-decay partition
//!
//! Weights of dense and embedding layers decay; biases and LayerNorm
//! parameters do not. Whether the two groups can be honored depends on the
//! optimizer: only the decoupled variant carries a per-group decay rate.
//! That capability is checked once, when the plan is resolved.

use candle_core::{Result, Var};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::adam::{Adam, AdamConfig, WeightDecay};
use crate::gradients::Gradients;

/// Decay rate for the decaying group (and for the combined fallback)
pub const DEFAULT_WEIGHT_DECAY: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Adam with decoupled weight decay (BERT-style)
    AdamW,
    /// Adam with L2 decay folded into the gradient
    Adam,
}

impl OptimizerKind {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerKind::AdamW => "adamw",
            OptimizerKind::Adam => "adam",
        }
    }

    pub fn supports_decoupled_decay(&self) -> bool {
        matches!(self, OptimizerKind::AdamW)
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adamw" | "bertadam" => Ok(OptimizerKind::AdamW),
            "adam" => Ok(OptimizerKind::Adam),
            other => Err(format!("unknown optimizer '{}' (expected adamw or adam)", other)),
        }
    }
}

/// How the parameter groups map onto optimizer instances
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerPlan {
    /// Separate instances: decay group at `decay`, no-decay group at 0
    TwoGroup { decay: f64 },
    /// One instance over all parameters with a single L2 rate
    Combined { weight_decay: f64 },
}

impl OptimizerPlan {
    pub fn resolve(kind: OptimizerKind) -> Self {
        if kind.supports_decoupled_decay() {
            OptimizerPlan::TwoGroup {
                decay: DEFAULT_WEIGHT_DECAY,
            }
        } else {
            tracing::warn!(
                "Optimizer '{}' has no decoupled weight decay; using one group with L2 decay {} on all parameters",
                kind,
                DEFAULT_WEIGHT_DECAY
            );
            OptimizerPlan::Combined {
                weight_decay: DEFAULT_WEIGHT_DECAY,
            }
        }
    }
}

/// Drives one [`Adam`] per parameter group with a shared learning rate
pub struct GroupedOptimizer {
    kind: OptimizerKind,
    plan: OptimizerPlan,
    groups: Vec<Adam>,
    updates: usize,
}

impl GroupedOptimizer {
    pub fn new(kind: OptimizerKind, lr: f64, decay_vars: Vec<Var>, no_decay_vars: Vec<Var>) -> Self {
        let plan = OptimizerPlan::resolve(kind);
        let groups = match plan {
            OptimizerPlan::TwoGroup { decay } => vec![
                Adam::new(
                    decay_vars,
                    AdamConfig {
                        weight_decay: WeightDecay::Decoupled(decay),
                        ..AdamConfig::default()
                    },
                    lr,
                ),
                Adam::new(
                    no_decay_vars,
                    AdamConfig {
                        weight_decay: WeightDecay::Decoupled(0.0),
                        ..AdamConfig::default()
                    },
                    lr,
                ),
            ],
            OptimizerPlan::Combined { weight_decay } => {
                let mut all = decay_vars;
                all.extend(no_decay_vars);
                vec![Adam::new(
                    all,
                    AdamConfig {
                        weight_decay: WeightDecay::Coupled(weight_decay),
                        ..AdamConfig::default()
                    },
                    lr,
                )]
            }
        };

        tracing::debug!(
            "Optimizer {} with {} group(s): {:?}",
            kind,
            groups.len(),
            groups.iter().map(|g| g.vars().len()).collect::<Vec<_>>()
        );

        Self {
            kind,
            plan,
            groups,
            updates: 0,
        }
    }

    /// Set the same rate on every group
    pub fn set_learning_rate(&mut self, lr: f64) {
        for group in &mut self.groups {
            group.set_learning_rate(lr);
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.groups.first().map(|g| g.learning_rate()).unwrap_or(0.0)
    }

    pub fn step(&mut self, grads: &Gradients) -> Result<()> {
        for group in &mut self.groups {
            group.step(grads)?;
        }
        self.updates += 1;
        Ok(())
    }

    pub fn num_updates(&self) -> usize {
        self.updates
    }

    pub fn group_sizes(&self) -> Vec<usize> {
        self.groups.iter().map(|g| g.vars().len()).collect()
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn plan(&self) -> OptimizerPlan {
        self.plan
    }
}
