//! Optimization for BERT fine-tuning
//!
//! Adam with decoupled or L2 weight decay, a decay/no-decay grouped driver,
//! gradient accumulation with global-norm clipping, and the linear
//! warmup/decay learning-rate schedule.

pub mod adam;
pub mod gradients;
pub mod grouped;
pub mod schedule;

pub use adam::{Adam, AdamConfig, WeightDecay};
pub use gradients::Gradients;
pub use grouped::{GroupedOptimizer, OptimizerKind, OptimizerPlan, DEFAULT_WEIGHT_DECAY};
pub use schedule::LinearWarmupDecay;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
