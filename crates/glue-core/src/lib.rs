//! glue-core - Candle-based BERT encoder for GLUE fine-tuning
//!
//! Pretrained encoder, task heads, and the decay-group tags the optimizer
//! uses to split parameters.

pub mod attention;
pub mod config;
pub mod model;
pub mod params;
pub mod pretrained;

pub use config::BertConfig;
pub use model::{build_model, BertEncoder, BertForTask, HeadKind, ENCODER_PREFIX};
pub use params::{DecayGroup, ParamTags, PartitionedVars};
pub use pretrained::{load_encoder_tensors, load_encoder_weights};

/// glue-core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
