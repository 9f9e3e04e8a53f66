//! GLUE TSV loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::DataError;
use crate::tasks::{LabelColumn, Task};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExample {
    pub text_a: String,
    pub text_b: Option<String>,
    /// Label string as found in the file, mapped later by the transform
    pub label: String,
}

impl RawExample {
    pub fn single(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text_a: text.into(),
            text_b: None,
            label: label.into(),
        }
    }

    pub fn pair(a: impl Into<String>, b: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text_a: a.into(),
            text_b: Some(b.into()),
            label: label.into(),
        }
    }
}

/// Examples of one task split, read once and re-iterated every epoch
pub struct GlueDataset {
    task: Task,
    split: String,
    examples: Vec<RawExample>,
}

impl GlueDataset {
    pub fn new(task: Task, split: impl Into<String>, examples: Vec<RawExample>) -> Self {
        Self {
            task,
            split: split.into(),
            examples,
        }
    }

    /// Path of `<data_dir>/<TASK>/<split>.tsv`
    pub fn path_for(task: Task, data_dir: impl AsRef<Path>, split: &str) -> PathBuf {
        data_dir
            .as_ref()
            .join(task.dir_name())
            .join(format!("{}.tsv", split))
    }

    pub fn load(task: Task, data_dir: impl AsRef<Path>, split: &str) -> Result<Self> {
        let path = Self::path_for(task, data_dir, split);
        let content = std::fs::read_to_string(&path).map_err(|source| DataError::Io {
            path: path.clone(),
            source,
        })?;
        let examples = parse_tsv(task, &content, &path)?;
        tracing::info!("Loaded {} {} examples from {}", examples.len(), task, path.display());
        Ok(Self::new(task, split, examples))
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn split(&self) -> &str {
        &self.split
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RawExample> {
        self.examples.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawExample> {
        self.examples.iter()
    }
}

/// Parse the rows of a task file; `path` is only used in error messages
pub fn parse_tsv(task: Task, content: &str, path: &Path) -> Result<Vec<RawExample>, DataError> {
    let layout = task.tsv_layout();
    let min_columns = layout.min_columns();
    let skip = usize::from(layout.has_header);

    let mut examples = Vec::new();
    for (idx, line) in content.lines().enumerate().skip(skip) {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < min_columns {
            return Err(DataError::MalformedRow {
                path: path.to_path_buf(),
                line: idx + 1,
                expected: min_columns,
                found: cols.len(),
            });
        }

        let label = match layout.label {
            LabelColumn::Index(i) => cols[i],
            LabelColumn::Last => cols[cols.len() - 1],
        };
        examples.push(RawExample {
            text_a: cols[layout.text_a].to_string(),
            text_b: layout.text_b.map(|i| cols[i].to_string()),
            label: label.trim().to_string(),
        });
    }

    Ok(examples)
}
