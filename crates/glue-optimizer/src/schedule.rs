//! Linear warmup followed by linear decay
//!
//! rate(s) = base · s / warmup                          for s < warmup
//! rate(s) = base · (1 − (s − warmup) / (total − warmup)) otherwise
//!
//! Clamped at zero past `total_steps`; when the decay span is empty the rate
//! stays at `base_lr` instead of dividing by zero.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearWarmupDecay {
    pub base_lr: f64,
    pub warmup_steps: usize,
    pub total_steps: usize,
}

impl LinearWarmupDecay {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
        }
    }

    /// Derive the step budget of a run.
    ///
    /// total = floor(num_examples / (batch_size · accumulate) · epochs),
    /// warmup = floor(total · warmup_ratio).
    pub fn from_run(
        base_lr: f64,
        num_examples: usize,
        batch_size: usize,
        accumulate: usize,
        epochs: usize,
        warmup_ratio: f64,
    ) -> Self {
        let effective_batch = (batch_size * accumulate.max(1)).max(1) as f64;
        let total_steps = (num_examples as f64 / effective_batch * epochs as f64).floor() as usize;
        let warmup_steps = (total_steps as f64 * warmup_ratio.clamp(0.0, 1.0)).floor() as usize;
        Self::new(base_lr, warmup_steps, total_steps)
    }

    pub fn rate(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps as f64;
        }
        if self.total_steps <= self.warmup_steps {
            return self.base_lr;
        }

        let span = (self.total_steps - self.warmup_steps) as f64;
        let progress = (step - self.warmup_steps) as f64 / span;
        self.base_lr * (1.0 - progress).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_run_counts_steps() {
        let sched = LinearWarmupDecay::from_run(5e-5, 3668, 32, 1, 3, 0.1);
        // 3668 / 32 * 3 = 343.875
        assert_eq!(sched.total_steps, 343);
        assert_eq!(sched.warmup_steps, 34);

        let accumulated = LinearWarmupDecay::from_run(5e-5, 3668, 8, 4, 3, 0.1);
        assert_eq!(accumulated.total_steps, 343);
    }

    #[test]
    fn test_warmup_is_linear_and_non_decreasing() {
        let sched = LinearWarmupDecay::new(1e-3, 10, 100);
        let mut prev = -1.0;
        for s in 0..10 {
            let r = sched.rate(s);
            assert_relative_eq!(r, 1e-3 * s as f64 / 10.0, epsilon = 1e-15);
            assert!(r >= prev);
            prev = r;
        }
        assert_relative_eq!(sched.rate(10), 1e-3);
    }

    #[test]
    fn test_decay_is_non_increasing_and_ends_at_zero() {
        let sched = LinearWarmupDecay::new(2e-5, 7, 50);
        let mut prev = f64::INFINITY;
        for s in 7..=50 {
            let r = sched.rate(s);
            assert!(r <= prev, "rate increased at step {}", s);
            prev = r;
        }
        assert!(sched.rate(50).abs() < 1e-12);
        assert_eq!(sched.rate(80), 0.0);
    }

    #[test]
    fn test_zero_warmup_decays_from_first_step() {
        let sched = LinearWarmupDecay::from_run(1.0, 4, 2, 1, 1, 0.0);
        assert_eq!(sched.warmup_steps, 0);
        assert_eq!(sched.total_steps, 2);
        assert_relative_eq!(sched.rate(1), 0.5);
        assert_relative_eq!(sched.rate(2), 0.0);
    }

    #[test]
    fn test_empty_decay_span_is_constant() {
        // warmup_ratio 1.0 makes warmup == total
        let sched = LinearWarmupDecay::from_run(3e-5, 10, 5, 1, 1, 1.0);
        assert_eq!(sched.warmup_steps, sched.total_steps);
        assert_relative_eq!(sched.rate(2), 3e-5);
        assert_relative_eq!(sched.rate(5), 3e-5);

        let empty = LinearWarmupDecay::new(1e-4, 0, 0);
        assert_relative_eq!(empty.rate(0), 1e-4);
        assert_relative_eq!(empty.rate(3), 1e-4);
    }
}
