//! GLUE fine-tuning pipeline
//!
//! Task registry, TSV loading, text transform, batching, losses, metrics,
//! and the training and evaluation loops.

pub mod batch;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod loss;
pub mod metrics;
pub mod tasks;
pub mod tokenizer;
pub mod trainer;
pub mod transform;

#[cfg(test)]
mod testing;

pub use batch::{collate, Batch, Sampler};
pub use dataset::{GlueDataset, RawExample};
pub use error::DataError;
pub use evaluate::{EvalReport, Evaluator};
pub use loss::TaskLoss;
pub use metrics::{
    Accuracy, CompositeMetric, MatthewsCorrelation, Metric, PearsonCorrelation, SpearmanCorrelation, F1,
};
pub use tasks::Task;
pub use tokenizer::{lowercase_for_model, HfTextEncoder, SpecialTokens, TextEncoder};
pub use trainer::{EpochReport, TrainPhase, Trainer, TrainerConfig, TrainingReport};
pub use transform::{EncodedExample, Label, LabelKind, Transform, TransformedDataset};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
