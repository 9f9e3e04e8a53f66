//! glue-finetune - Fine-tune a pretrained BERT encoder on GLUE tasks
//!
//! Usage:
//!   glue-finetune train --task-name MRPC --data-dir glue_data --model bert-base-uncased
//!   glue-finetune train --task-name STS-B --optimizer adam --accumulate 4 --batch-size 8
//!   glue-finetune evaluate --task-name MRPC --checkpoint out/model_epoch2.safetensors

mod evaluate;
mod hub;
mod train;

use clap::{Args, Parser, Subcommand};
use glue_optimizer::OptimizerKind;
use glue_training::Task;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "glue-finetune",
    about = "Fine-tune pretrained BERT on GLUE sentence classification and regression tasks",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fine-tune on a task's train split, evaluating on dev after every epoch
    Train(TrainArgs),

    /// Evaluate a fine-tuned checkpoint on a task's dev split
    Evaluate(EvalArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Number of epochs
    #[arg(long, default_value = "3")]
    pub epochs: usize,

    /// Batch size for training
    #[arg(long, default_value = "32")]
    pub batch_size: usize,

    /// Batch size for evaluation
    #[arg(long, default_value = "8", alias = "dev-batch-size")]
    pub test_batch_size: usize,

    /// Optimizer: adamw (decoupled weight decay, two groups) or adam
    #[arg(long, default_value = "adamw")]
    pub optimizer: OptimizerKind,

    /// GLUE task: MRPC, QQP, QNLI, RTE, STS-B, CoLA, MNLI, WNLI, SST
    #[arg(long, default_value = "MRPC")]
    pub task_name: Task,

    /// Base learning rate
    #[arg(long, default_value = "5e-5")]
    pub lr: f64,

    /// Fraction of updates spent warming up the learning rate
    #[arg(long, default_value = "0.1")]
    pub warmup_ratio: f64,

    /// Report training progress every N batches
    #[arg(long, default_value = "10")]
    pub log_interval: usize,

    /// Maximum sequence length including special tokens
    #[arg(long, default_value = "128")]
    pub max_len: usize,

    /// Run on CUDA device 0
    #[arg(long)]
    pub gpu: bool,

    /// Seed for head initialization and batch shuffling
    #[arg(long, default_value = "2")]
    pub seed: u64,

    /// Batches per optimizer update (gradients are summed)
    #[arg(long, default_value = "1")]
    pub accumulate: usize,

    /// Hugging Face model id or local directory with config.json,
    /// model.safetensors and tokenizer.json
    #[arg(long, default_value = "bert-base-uncased")]
    pub model: String,

    /// Directory holding one sub-directory of TSV files per task
    #[arg(long, default_value = "glue_data")]
    pub data_dir: PathBuf,

    /// Group train batches into N length buckets (0 = plain shuffling)
    #[arg(long, default_value = "0")]
    pub bucket: usize,

    /// Where to write per-epoch checkpoints and the training log
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Lower-case input text (default: when the model name contains "uncased")
    #[arg(long, conflicts_with = "cased")]
    pub do_lower_case: bool,

    /// Keep input casing
    #[arg(long)]
    pub cased: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EvalArgs {
    /// GLUE task of the checkpoint
    #[arg(long)]
    pub task_name: Task,

    /// Fine-tuned weights (.safetensors written by `train`)
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// Model the checkpoint was fine-tuned from (config and tokenizer)
    #[arg(long, default_value = "bert-base-uncased")]
    pub model: String,

    #[arg(long, default_value = "glue_data")]
    pub data_dir: PathBuf,

    #[arg(long, default_value = "128")]
    pub max_len: usize,

    #[arg(long, default_value = "8", alias = "dev-batch-size")]
    pub test_batch_size: usize,

    /// Run on CUDA device 0
    #[arg(long)]
    pub gpu: bool,

    /// Lower-case input text (default: when the model name contains "uncased")
    #[arg(long, conflicts_with = "cased")]
    pub do_lower_case: bool,

    /// Keep input casing
    #[arg(long)]
    pub cased: bool,
}

/// Resolve the casing flag pair against the model name
pub fn lowercase(do_lower_case: bool, cased: bool, model: &str) -> bool {
    if do_lower_case {
        true
    } else if cased {
        false
    } else {
        glue_training::lowercase_for_model(model)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => {
            train::run(args)?;
        }
        Commands::Evaluate(args) => {
            evaluate::run(args)?;
        }
    }

    Ok(())
}
