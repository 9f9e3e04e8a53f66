//! Evaluate subcommand

use anyhow::{Context, Result};
use candle_core::DType;
use candle_nn::VarMap;

use glue_core::build_model;
use glue_training::{Evaluator, GlueDataset, Transform, TransformedDataset};

use crate::train::{load_pretrained, log_mem_pool_hint, select_device};
use crate::EvalArgs;

pub fn run(args: EvalArgs) -> Result<()> {
    let task = args.task_name;
    log_mem_pool_hint();
    let device = select_device(args.gpu)?;

    let lowercase = crate::lowercase(args.do_lower_case, args.cased, &args.model);
    let (_, bert_config, encoder) = load_pretrained(&args.model, lowercase)?;

    let dev_data = TransformedDataset::new(
        GlueDataset::load(task, &args.data_dir, task.dev_split())?,
        Transform::new(encoder, task.label_kind(), args.max_len, task.is_pair(), true)?,
    );

    let mut varmap = VarMap::new();
    let model = build_model(bert_config, task.head_kind(), &varmap, DType::F32, &device, 0)?;
    varmap
        .load(&args.checkpoint)
        .with_context(|| format!("Failed to load checkpoint {}", args.checkpoint.display()))?;

    let report = Evaluator::new(task, args.test_batch_size, device).evaluate(&model, &dev_data)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
