//! Fine-tuning loop
//!
//! Per batch: forward, loss, backward, gradient accumulation. A window of
//! `accumulate` batches (or the tail of an epoch) ends in one update: the
//! schedule advances, the summed gradient is clipped to a global norm and
//! both parameter groups step. Every epoch ends with a dev evaluation.

use anyhow::{Context, Result};
use candle_core::Device;
use candle_nn::VarMap;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use glue_core::BertForTask;
use glue_optimizer::{Gradients, GroupedOptimizer, LinearWarmupDecay, OptimizerKind};

use crate::batch::{collate, Sampler};
use crate::evaluate::{EvalReport, Evaluator};
use crate::loss::TaskLoss;
use crate::metrics::{format_values, Metric};
use crate::tasks::Task;
use crate::transform::TransformedDataset;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub dev_batch_size: usize,
    pub learning_rate: f64,
    pub warmup_ratio: f64,
    pub log_interval: usize,
    /// Batches per optimizer update
    pub accumulate: usize,
    pub max_grad_norm: f64,
    pub optimizer: OptimizerKind,
    /// Length buckets for train batches, 0 for plain shuffling
    pub num_buckets: usize,
    pub seed: u64,
    pub output_dir: Option<PathBuf>,
    pub show_progress: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            batch_size: 32,
            dev_batch_size: 8,
            learning_rate: 5e-5,
            warmup_ratio: 0.1,
            log_interval: 10,
            accumulate: 1,
            max_grad_norm: 1.0,
            optimizer: OptimizerKind::AdamW,
            num_buckets: 0,
            seed: 2,
            output_dir: None,
            show_progress: true,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.dev_batch_size == 0 {
            anyhow::bail!("Batch sizes must be positive");
        }
        if self.accumulate == 0 {
            anyhow::bail!("accumulate must be at least 1");
        }
        if self.log_interval == 0 {
            anyhow::bail!("log_interval must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.warmup_ratio) {
            anyhow::bail!("warmup_ratio must be in [0, 1], got {}", self.warmup_ratio);
        }
        if self.learning_rate <= 0.0 {
            anyhow::bail!("learning rate must be positive");
        }
        Ok(())
    }

    fn sampler(&self) -> Sampler {
        if self.num_buckets > 0 {
            Sampler::Bucketed {
                num_buckets: self.num_buckets,
            }
        } else {
            Sampler::Shuffled
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainPhase {
    Idle,
    Forward,
    Backward,
    Accumulating,
    Updating,
    Logging,
    Evaluating,
    EpochDone,
    Terminal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    /// Mean batch loss over the epoch
    pub train_loss: f64,
    pub train_metrics: Vec<(String, f64)>,
    pub eval: EvalReport,
    pub updates: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub task: Task,
    pub schedule: LinearWarmupDecay,
    pub epochs: Vec<EpochReport>,
    pub num_updates: usize,
    /// Learning rate applied at each update, in order
    pub lr_history: Vec<f64>,
}

impl TrainingReport {
    pub fn final_eval(&self) -> Option<&EvalReport> {
        self.epochs.last().map(|e| &e.eval)
    }
}

pub struct Trainer {
    config: TrainerConfig,
    device: Device,
    phase: TrainPhase,
}

impl Trainer {
    pub fn new(config: TrainerConfig, device: Device) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            phase: TrainPhase::Idle,
        })
    }

    pub fn phase(&self) -> TrainPhase {
        self.phase
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    fn enter(&mut self, next: TrainPhase) {
        tracing::trace!("{:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    pub fn train(
        &mut self,
        task: Task,
        model: &BertForTask,
        varmap: &VarMap,
        train_data: &TransformedDataset,
        dev_data: &TransformedDataset,
    ) -> Result<TrainingReport> {
        let cfg = self.config.clone();
        if train_data.is_empty() {
            anyhow::bail!("Training split of {} is empty", task);
        }

        let schedule = LinearWarmupDecay::from_run(
            cfg.learning_rate,
            train_data.len(),
            cfg.batch_size,
            cfg.accumulate,
            cfg.epochs,
            cfg.warmup_ratio,
        );

        let params = model.param_tags().partition(varmap)?;
        let all_vars = params.all_vars();
        let mut optimizer = GroupedOptimizer::new(
            cfg.optimizer,
            cfg.learning_rate,
            params.decay_vars(),
            params.no_decay_vars(),
        );

        tracing::info!(
            "Training {} on {} examples: {} epochs, batch {} x {} accumulated, {} updates ({} warmup)",
            task,
            train_data.len(),
            cfg.epochs,
            cfg.batch_size,
            cfg.accumulate,
            schedule.total_steps,
            schedule.warmup_steps
        );
        tracing::info!(
            "Parameter groups: {} decay, {} no-decay; optimizer {}",
            params.decay.len(),
            params.no_decay.len(),
            optimizer.kind()
        );

        if let Some(dir) = &cfg.output_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        }

        let sampler = cfg.sampler();
        let lengths = match sampler {
            Sampler::Bucketed { .. } => Some(train_data.valid_lengths()?),
            _ => None,
        };
        let loss_fn = TaskLoss::for_head(model.head_kind());
        let evaluator = Evaluator::new(task, cfg.dev_batch_size, self.device.clone());

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut step: usize = 0;
        let mut lr_history = Vec::new();
        let mut epochs = Vec::with_capacity(cfg.epochs);
        let mut window = Gradients::new();

        for epoch in 0..cfg.epochs {
            let batches = sampler.batches(train_data.len(), lengths.as_deref(), cfg.batch_size, &mut rng)?;
            let num_batches = batches.len();
            let mut metric = task.metric();

            let pb = if cfg.show_progress {
                ProgressBar::new(num_batches as u64)
            } else {
                ProgressBar::hidden()
            };
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}] {msg}")?,
            );

            let mut epoch_loss = 0.0f64;
            let mut step_loss = 0.0f64;
            let mut batches_since_log = 0usize;
            let mut in_window = 0usize;
            let updates_before = optimizer.num_updates();
            window.clear();

            for (batch_idx, indices) in batches.iter().enumerate() {
                self.enter(TrainPhase::Forward);
                let examples = indices
                    .iter()
                    .map(|&i| train_data.get(i))
                    .collect::<Result<Vec<_>>>()?;
                let batch = collate(&examples, &self.device)?;
                let outputs = model.forward(&batch.input_ids, &batch.segment_ids, &batch.valid_length, true)?;
                let loss = loss_fn.compute(&outputs, &batch.labels)?;

                self.enter(TrainPhase::Backward);
                let store = loss.backward()?;
                window.accumulate(Gradients::from_backward(&store, &all_vars))?;
                drop(store);
                in_window += 1;

                let loss_val = loss.to_scalar::<f32>()? as f64;
                step_loss += loss_val;
                epoch_loss += loss_val;
                batches_since_log += 1;
                metric.update(&batch.label_values, &loss_fn.predictions(&outputs.detach())?);

                let last_batch = batch_idx + 1 == num_batches;
                if in_window == cfg.accumulate || last_batch {
                    self.enter(TrainPhase::Updating);
                    step += 1;
                    let lr = schedule.rate(step);
                    optimizer.set_learning_rate(lr);
                    let norm = window.clip_global_norm(cfg.max_grad_norm)?;
                    optimizer.step(&window)?;
                    tracing::debug!("update {} lr={:.3e} grad_norm={:.4}", step, lr, norm);
                    lr_history.push(lr);
                    window.clear();
                    in_window = 0;
                } else {
                    self.enter(TrainPhase::Accumulating);
                }

                if (batch_idx + 1) % cfg.log_interval == 0 {
                    self.enter(TrainPhase::Logging);
                    let line = format!(
                        "[Epoch {} Batch {}/{}] loss={:.4}, lr={:.7}, metrics={}",
                        epoch,
                        batch_idx + 1,
                        num_batches,
                        step_loss / batches_since_log as f64,
                        optimizer.learning_rate(),
                        format_values(&metric.values())
                    );
                    if cfg.show_progress {
                        pb.set_message(format!("loss: {:.4}", step_loss / batches_since_log as f64));
                    }
                    tracing::info!("{}", line);
                    step_loss = 0.0;
                    batches_since_log = 0;
                }

                pb.inc(1);
                self.enter(TrainPhase::Idle);
            }
            pb.finish_and_clear();

            self.enter(TrainPhase::Evaluating);
            let eval = evaluator.evaluate(model, dev_data)?;

            self.enter(TrainPhase::EpochDone);
            let report = EpochReport {
                epoch,
                train_loss: epoch_loss / num_batches.max(1) as f64,
                train_metrics: metric.values(),
                eval,
                updates: optimizer.num_updates() - updates_before,
            };
            tracing::info!(
                "Epoch {} done: train loss {:.4}, {} updates",
                epoch,
                report.train_loss,
                report.updates
            );
            epochs.push(report);

            if let Some(dir) = &cfg.output_dir {
                save_checkpoint(varmap, dir, epoch)?;
            }

            if epoch + 1 < cfg.epochs {
                self.enter(TrainPhase::Idle);
            }
        }
        self.enter(TrainPhase::Terminal);

        let report = TrainingReport {
            task,
            schedule,
            epochs,
            num_updates: optimizer.num_updates(),
            lr_history,
        };
        if let Some(dir) = &cfg.output_dir {
            save_training_log(&report, dir)?;
        }
        Ok(report)
    }
}

fn save_checkpoint(varmap: &VarMap, dir: &Path, epoch: usize) -> Result<PathBuf> {
    let path = dir.join(format!("model_epoch{}.safetensors", epoch));
    varmap
        .save(&path)
        .with_context(|| format!("Failed to save checkpoint {}", path.display()))?;
    tracing::info!("Checkpoint saved: {}", path.display());
    Ok(path)
}

fn save_training_log(report: &TrainingReport, dir: &Path) -> Result<()> {
    let path = dir.join("training_log.json");
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
