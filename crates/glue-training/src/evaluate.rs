//! Forward-only evaluation over a dev split

use anyhow::{Context, Result};
use candle_core::Device;
use glue_core::BertForTask;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::batch::{collate, Sampler};
use crate::loss::TaskLoss;
use crate::metrics::{format_values, Metric};
use crate::tasks::Task;
use crate::transform::TransformedDataset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    /// Mean batch loss, informational
    pub loss: f64,
    pub metrics: Vec<(String, f64)>,
    pub num_examples: usize,
}

impl EvalReport {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

pub struct Evaluator {
    task: Task,
    batch_size: usize,
    device: Device,
}

impl Evaluator {
    pub fn new(task: Task, batch_size: usize, device: Device) -> Self {
        Self {
            task,
            batch_size,
            device,
        }
    }

    /// Run the whole split in dataset order; parameters are only read
    pub fn evaluate(&self, model: &BertForTask, data: &TransformedDataset) -> Result<EvalReport> {
        let loss_fn = TaskLoss::for_head(model.head_kind());
        let mut metric = self.task.metric();

        // Sequential sampling never draws from the rng
        let mut rng = StdRng::seed_from_u64(0);
        let batches = Sampler::Sequential.batches(data.len(), None, self.batch_size, &mut rng)?;

        let mut total_loss = 0.0f64;
        let mut num_batches = 0usize;
        let mut num_examples = 0usize;

        for indices in &batches {
            let examples = indices
                .iter()
                .map(|&i| data.get(i))
                .collect::<Result<Vec<_>>>()?;
            let batch = collate(&examples, &self.device)?;

            let outputs = model
                .forward(&batch.input_ids, &batch.segment_ids, &batch.valid_length, false)
                .context("Evaluation forward pass failed")?
                .detach();
            let loss = loss_fn.compute(&outputs, &batch.labels)?;
            total_loss += loss.to_scalar::<f32>()? as f64;
            num_batches += 1;
            num_examples += batch.size();

            metric.update(&batch.label_values, &loss_fn.predictions(&outputs)?);
        }

        let report = EvalReport {
            loss: total_loss / num_batches.max(1) as f64,
            metrics: metric.values(),
            num_examples,
        };
        tracing::info!("validation metrics:{}", format_values(&report.metrics));
        Ok(report)
    }
}
