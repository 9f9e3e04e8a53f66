//! Train subcommand - fine-tune, evaluate per epoch, optionally checkpoint

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use glue_core::{build_model, load_encoder_weights, BertConfig};
use glue_training::{
    GlueDataset, HfTextEncoder, Task, TextEncoder, Trainer, TrainerConfig, Transform, TransformedDataset,
};

use crate::hub;
use crate::TrainArgs;

/// Advisory memory-pool hint for the tensor backend
pub const MEM_POOL_ENV: &str = "GLUE_MEM_POOL_TYPE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub task: Task,
    pub model: String,
    pub data_dir: PathBuf,
    pub max_len: usize,
    pub lowercase: bool,
    pub gpu: bool,
    pub trainer: TrainerConfig,
}

impl RunConfig {
    pub fn from_args(args: &TrainArgs) -> Self {
        Self {
            task: args.task_name,
            model: args.model.clone(),
            data_dir: args.data_dir.clone(),
            max_len: args.max_len,
            lowercase: crate::lowercase(args.do_lower_case, args.cased, &args.model),
            gpu: args.gpu,
            trainer: TrainerConfig {
                epochs: args.epochs,
                batch_size: args.batch_size,
                dev_batch_size: args.test_batch_size,
                learning_rate: args.lr,
                warmup_ratio: args.warmup_ratio,
                log_interval: args.log_interval,
                accumulate: args.accumulate,
                optimizer: args.optimizer,
                num_buckets: args.bucket,
                seed: args.seed,
                output_dir: args.output_dir.clone(),
                show_progress: !args.no_progress,
                ..TrainerConfig::default()
            },
        }
    }
}

pub fn select_device(gpu: bool) -> Result<Device> {
    if gpu {
        let device = Device::new_cuda(0).context("--gpu given but CUDA device 0 is unavailable")?;
        tracing::info!("Using CUDA device 0");
        Ok(device)
    } else {
        tracing::info!("Using CPU");
        Ok(Device::Cpu)
    }
}

pub fn log_mem_pool_hint() {
    if let Ok(value) = std::env::var(MEM_POOL_ENV) {
        tracing::info!("{}={} (advisory)", MEM_POOL_ENV, value);
    }
}

/// Load config, tokenizer and encoder for `model`, returning an encoder
/// ready to build transforms with
pub fn load_pretrained(model: &str, lowercase: bool) -> Result<(hub::ModelFiles, BertConfig, Arc<dyn TextEncoder + Send + Sync>)> {
    let files = hub::resolve_model(model)?;
    let config = BertConfig::from_file(&files.config)?;
    config.validate()?;
    let tokenizer = hub::load_tokenizer(&files.tokenizer)?;
    let encoder = HfTextEncoder::new(tokenizer, lowercase)?;
    if encoder.vocab_size() > config.vocab_size {
        anyhow::bail!(
            "Tokenizer vocabulary ({}) is larger than the model's ({})",
            encoder.vocab_size(),
            config.vocab_size
        );
    }
    Ok((files, config, Arc::new(encoder)))
}

pub fn run(args: TrainArgs) -> Result<()> {
    let run_config = RunConfig::from_args(&args);
    run_config.trainer.validate()?;
    let task = run_config.task;

    log_mem_pool_hint();
    tracing::info!("Run configuration: {}", serde_json::to_string(&run_config)?);

    // 1. Device
    let device = select_device(run_config.gpu)?;

    // 2. Pretrained model and tokenizer
    let (files, bert_config, encoder) = load_pretrained(&run_config.model, run_config.lowercase)?;
    if run_config.max_len > bert_config.max_position_embeddings {
        anyhow::bail!(
            "--max-len {} exceeds the model's max_position_embeddings {}",
            run_config.max_len,
            bert_config.max_position_embeddings
        );
    }
    tracing::info!(
        "Model {}: {} layers, hidden {}, {} params",
        run_config.model,
        bert_config.num_hidden_layers,
        bert_config.hidden_size,
        format_params(bert_config.total_params())
    );

    // 3. Data
    let train_data = TransformedDataset::new(
        GlueDataset::load(task, &run_config.data_dir, task.train_split())?,
        Transform::new(encoder.clone(), task.label_kind(), run_config.max_len, task.is_pair(), false)?,
    );
    let dev_data = TransformedDataset::new(
        GlueDataset::load(task, &run_config.data_dir, task.dev_split())?,
        Transform::new(encoder, task.label_kind(), run_config.max_len, task.is_pair(), true)?,
    );

    // 4. Model: fresh head, pretrained encoder
    let varmap = VarMap::new();
    let model = build_model(
        bert_config,
        task.head_kind(),
        &varmap,
        DType::F32,
        &device,
        run_config.trainer.seed,
    )?;
    load_encoder_weights(&varmap, &files.weights, &device)?;

    if let Some(dir) = &run_config.trainer.output_dir {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("run_config.json");
        std::fs::write(&path, serde_json::to_string_pretty(&run_config)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    // 5. Train
    let mut trainer = Trainer::new(run_config.trainer.clone(), device)?;
    let report = trainer.train(task, &model, &varmap, &train_data, &dev_data)?;

    if let Some(eval) = report.final_eval() {
        println!(
            "\n  {} finished after {} updates. Dev metrics: {}",
            task,
            report.num_updates,
            eval.metrics
                .iter()
                .map(|(name, v)| format!("{}={:.4}", name, v))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(())
}

fn format_params(n: usize) -> String {
    if n >= 1_000_000_000 {
        format!("{:.1}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.0}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.0}K", n as f64 / 1_000.0)
    } else {
        format!("{}", n)
    }
}
