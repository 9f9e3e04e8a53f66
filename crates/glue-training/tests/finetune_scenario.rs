//! End-to-end fine-tuning of a tiny encoder on small GLUE-shaped splits

use anyhow::Result;
use approx::assert_relative_eq;
use candle_core::{DType, Device};
use candle_nn::VarMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use glue_core::{build_model, BertConfig};
use glue_training::{
    GlueDataset, SpecialTokens, Task, TextEncoder, Trainer, TrainerConfig, Transform, TransformedDataset,
};

/// Characters map to ids past the special tokens
struct CharEncoder;

impl TextEncoder for CharEncoder {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| 4 + (c.to_ascii_lowercase() as u32 - 'a' as u32))
            .collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        Ok(ids
            .iter()
            .map(|&id| match id {
                2 => '^',
                3 => '|',
                id if id >= 4 => char::from(b'a' + (id - 4) as u8),
                _ => '_',
            })
            .collect())
    }

    fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens { cls: 2, sep: 3, pad: 0 }
    }
}

fn write_task(dir: &Path, task: Task, train: &str, dev: &str) -> Result<()> {
    let task_dir = dir.join(task.dir_name());
    fs::create_dir_all(&task_dir)?;
    fs::write(task_dir.join("train.tsv"), train)?;
    fs::write(task_dir.join(format!("{}.tsv", task.dev_split())), dev)?;
    Ok(())
}

fn splits(task: Task, data_dir: &Path, max_len: usize) -> Result<(TransformedDataset, TransformedDataset)> {
    let encoder: Arc<dyn TextEncoder + Send + Sync> = Arc::new(CharEncoder);
    let train = TransformedDataset::new(
        GlueDataset::load(task, data_dir, task.train_split())?,
        Transform::new(encoder.clone(), task.label_kind(), max_len, task.is_pair(), false)?,
    );
    let dev = TransformedDataset::new(
        GlueDataset::load(task, data_dir, task.dev_split())?,
        Transform::new(encoder, task.label_kind(), max_len, task.is_pair(), true)?,
    );
    Ok((train, dev))
}

#[test]
fn test_two_label_single_epoch() -> Result<()> {
    let data = tempfile::tempdir()?;
    write_task(
        data.path(),
        Task::Rte,
        "index\tsentence1\tsentence2\tlabel\n\
         0\tcats purr\tcats are animals\tentailment\n\
         1\tdogs bark\tdogs are fish\tnot_entailment\n\
         2\tbirds fly\tbirds have wings\tentailment\n\
         3\tfish swim\tfish can walk\tnot_entailment\n",
        "index\tsentence1\tsentence2\tlabel\n\
         0\tcows moo\tcows are animals\tentailment\n\
         1\tsnow is cold\tsnow is hot\tnot_entailment\n",
    )?;

    let device = Device::Cpu;
    let varmap = VarMap::new();
    let model = build_model(BertConfig::tiny(), Task::Rte.head_kind(), &varmap, DType::F32, &device, 2)?;
    let (train, dev) = splits(Task::Rte, data.path(), 32)?;
    assert_eq!(train.len(), 4);

    let config = TrainerConfig {
        epochs: 1,
        batch_size: 2,
        warmup_ratio: 0.0,
        learning_rate: 5e-5,
        show_progress: false,
        ..TrainerConfig::default()
    };
    let report = Trainer::new(config, device)?.train(Task::Rte, &model, &varmap, &train, &dev)?;

    assert_eq!(report.num_updates, 2);
    assert_eq!(report.lr_history.len(), 2);
    assert!(report.lr_history[1] < report.lr_history[0]);
    assert_relative_eq!(report.lr_history[0], 2.5e-5, epsilon = 1e-12);

    let eval = report.final_eval().ok_or_else(|| anyhow::anyhow!("no evaluation"))?;
    let accuracy = eval.metric("accuracy").ok_or_else(|| anyhow::anyhow!("no accuracy"))?;
    assert!((0.0..=1.0).contains(&accuracy));
    assert_eq!(eval.num_examples, 2);
    Ok(())
}

#[test]
fn test_regression_task_trains() -> Result<()> {
    let data = tempfile::tempdir()?;
    let header = "index\tgenre\tfilename\tyear\told_index\tsource1\tsource2\tsentence1\tsentence2\tscore\n";
    let row = |i: usize, a: &str, b: &str, score: &str| {
        format!("{}\tmain\tf\t2012\t{}\tnone\tnone\t{}\t{}\t{}\n", i, i, a, b, score)
    };
    let train = format!(
        "{}{}{}{}",
        header,
        row(0, "a plane takes off", "an airplane is taking off", "5.000"),
        row(1, "a man plays flute", "a man plays guitar", "1.600"),
        row(2, "a cat eats", "the dog sleeps", "0.200"),
    );
    let dev = format!("{}{}", header, row(0, "kids play", "children are playing", "4.200"));
    write_task(data.path(), Task::StsB, &train, &dev)?;

    let device = Device::Cpu;
    let varmap = VarMap::new();
    let model = build_model(BertConfig::tiny(), Task::StsB.head_kind(), &varmap, DType::F32, &device, 2)?;
    let (train, dev) = splits(Task::StsB, data.path(), 48)?;

    let config = TrainerConfig {
        epochs: 1,
        batch_size: 2,
        optimizer: "adam".parse().map_err(anyhow::Error::msg)?,
        show_progress: false,
        ..TrainerConfig::default()
    };
    let report = Trainer::new(config, device)?.train(Task::StsB, &model, &varmap, &train, &dev)?;

    // 3 examples at batch 2: the last partial batch is kept
    assert_eq!(report.num_updates, 2);
    assert!(report.epochs[0].train_loss.is_finite());
    let eval = report.final_eval().ok_or_else(|| anyhow::anyhow!("no evaluation"))?;
    assert!(eval.metric("pearsonr").is_some());
    Ok(())
}
