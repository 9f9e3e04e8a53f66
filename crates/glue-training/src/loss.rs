//! Task losses

use anyhow::Result;
use candle_core::{DType, Tensor};
use candle_nn::loss;
use glue_core::HeadKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLoss {
    /// Softmax cross entropy over class scores, mean over the batch
    CrossEntropy,
    /// Mean squared error over scalar outputs
    MeanSquared,
}

impl TaskLoss {
    pub fn for_head(head: HeadKind) -> Self {
        match head {
            HeadKind::Classifier { .. } => TaskLoss::CrossEntropy,
            HeadKind::Regression => TaskLoss::MeanSquared,
        }
    }

    /// Scalar loss of `outputs` against `labels`
    pub fn compute(&self, outputs: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let loss = match self {
            TaskLoss::CrossEntropy => loss::cross_entropy(outputs, labels)?,
            TaskLoss::MeanSquared => loss::mse(outputs, &labels.to_dtype(outputs.dtype())?)?,
        };
        Ok(loss)
    }

    /// Predictions fed to the metric: argmax class or raw score
    pub fn predictions(&self, outputs: &Tensor) -> Result<Vec<f32>> {
        let preds = match self {
            TaskLoss::CrossEntropy => outputs.argmax_keepdim(1)?.squeeze(1)?.to_dtype(DType::F32)?,
            TaskLoss::MeanSquared => outputs.to_dtype(DType::F32)?,
        };
        Ok(preds.to_vec1::<f32>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    #[test]
    fn test_mse_hand_computed() -> Result<()> {
        let dev = Device::Cpu;
        let preds = Tensor::new(&[0.5f32, 1.5], &dev)?;
        let labels = Tensor::new(&[1.0f32, 1.0], &dev)?;

        let loss = TaskLoss::MeanSquared.compute(&preds, &labels)?.to_scalar::<f32>()?;
        // ((0.5)^2 + (0.5)^2) / 2
        assert_relative_eq!(loss, 0.25, epsilon = 1e-7);
        Ok(())
    }

    #[test]
    fn test_cross_entropy_uniform() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[0.0f32, 0.0], [0.0, 0.0]], &dev)?;
        let labels = Tensor::new(&[0u32, 1], &dev)?;

        let loss = TaskLoss::CrossEntropy.compute(&logits, &labels)?.to_scalar::<f32>()?;
        assert_relative_eq!(loss, std::f32::consts::LN_2, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_predictions() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[0.1f32, 2.0], [3.0, -1.0]], &dev)?;
        assert_eq!(TaskLoss::CrossEntropy.predictions(&logits)?, vec![1.0, 0.0]);

        let scores = Tensor::new(&[2.5f32, 0.25], &dev)?;
        assert_eq!(TaskLoss::MeanSquared.predictions(&scores)?, vec![2.5, 0.25]);
        assert_eq!(TaskLoss::for_head(HeadKind::Regression), TaskLoss::MeanSquared);
        Ok(())
    }
}
