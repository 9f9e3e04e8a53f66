//! GLUE task registry
//!
//! Each task knows its label vocabulary, whether it pairs two sentences,
//! where its fields live in the GLUE TSV files, and which metrics it
//! reports.

use glue_core::HeadKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DataError;
use crate::metrics::{
    Accuracy, CompositeMetric, MatthewsCorrelation, PearsonCorrelation, SpearmanCorrelation, F1,
};
use crate::transform::LabelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Task {
    Mrpc,
    Qqp,
    Qnli,
    Rte,
    StsB,
    Cola,
    Mnli,
    Wnli,
    Sst,
}

/// Where the label sits in a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelColumn {
    Index(usize),
    /// Last column of the row (MNLI rows vary in width)
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsvLayout {
    pub text_a: usize,
    pub text_b: Option<usize>,
    pub label: LabelColumn,
    pub has_header: bool,
}

impl TsvLayout {
    /// Columns a row must have for every field to be present
    pub fn min_columns(&self) -> usize {
        let texts = (self.text_a + 1).max(self.text_b.map(|i| i + 1).unwrap_or(0));
        match self.label {
            LabelColumn::Index(i) => texts.max(i + 1),
            LabelColumn::Last => texts + 1,
        }
    }
}

impl Task {
    pub const ALL: [Task; 9] = [
        Task::Mrpc,
        Task::Qqp,
        Task::Qnli,
        Task::Rte,
        Task::StsB,
        Task::Cola,
        Task::Mnli,
        Task::Wnli,
        Task::Sst,
    ];

    /// Name as given on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Task::Mrpc => "MRPC",
            Task::Qqp => "QQP",
            Task::Qnli => "QNLI",
            Task::Rte => "RTE",
            Task::StsB => "STS-B",
            Task::Cola => "CoLA",
            Task::Mnli => "MNLI",
            Task::Wnli => "WNLI",
            Task::Sst => "SST",
        }
    }

    /// Directory of the task in the GLUE distribution
    pub fn dir_name(&self) -> &'static str {
        match self {
            Task::Sst => "SST-2",
            other => other.name(),
        }
    }

    pub fn is_pair(&self) -> bool {
        !matches!(self, Task::Cola | Task::Sst)
    }

    pub fn is_regression(&self) -> bool {
        matches!(self, Task::StsB)
    }

    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Task::Mrpc | Task::Qqp | Task::Cola | Task::Sst | Task::Wnli => &["0", "1"],
            Task::Qnli | Task::Rte => &["entailment", "not_entailment"],
            Task::Mnli => &["neutral", "entailment", "contradiction"],
            Task::StsB => &[],
        }
    }

    pub fn label_kind(&self) -> LabelKind {
        if self.is_regression() {
            LabelKind::Score
        } else {
            LabelKind::Classes(self.labels().iter().map(|s| s.to_string()).collect())
        }
    }

    pub fn head_kind(&self) -> HeadKind {
        if self.is_regression() {
            HeadKind::Regression
        } else {
            HeadKind::Classifier {
                num_classes: self.labels().len(),
            }
        }
    }

    pub fn train_split(&self) -> &'static str {
        "train"
    }

    pub fn dev_split(&self) -> &'static str {
        match self {
            Task::Mnli => "dev_matched",
            _ => "dev",
        }
    }

    pub fn tsv_layout(&self) -> TsvLayout {
        let (text_a, text_b, label, has_header) = match self {
            Task::Mrpc => (3, Some(4), LabelColumn::Index(0), true),
            Task::Qqp => (3, Some(4), LabelColumn::Index(5), true),
            Task::Qnli | Task::Rte | Task::Wnli => (1, Some(2), LabelColumn::Index(3), true),
            Task::StsB => (7, Some(8), LabelColumn::Index(9), true),
            Task::Cola => (3, None, LabelColumn::Index(1), false),
            Task::Sst => (0, None, LabelColumn::Index(1), true),
            Task::Mnli => (8, Some(9), LabelColumn::Last, true),
        };
        TsvLayout {
            text_a,
            text_b,
            label,
            has_header,
        }
    }

    /// Fresh metric set for one evaluation pass or training epoch
    pub fn metric(&self) -> CompositeMetric {
        match self {
            Task::Mrpc | Task::Qqp => CompositeMetric::new().with(Accuracy::new()).with(F1::new()),
            Task::StsB => CompositeMetric::new()
                .with(PearsonCorrelation::new())
                .with(SpearmanCorrelation::new()),
            Task::Cola => CompositeMetric::new().with(MatthewsCorrelation::new()),
            _ => CompositeMetric::new().with(Accuracy::new()),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Task {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "MRPC" => Ok(Task::Mrpc),
            "QQP" => Ok(Task::Qqp),
            "QNLI" => Ok(Task::Qnli),
            "RTE" => Ok(Task::Rte),
            "STSB" => Ok(Task::StsB),
            "COLA" => Ok(Task::Cola),
            "MNLI" => Ok(Task::Mnli),
            "WNLI" => Ok(Task::Wnli),
            "SST" | "SST2" => Ok(Task::Sst),
            _ => Err(DataError::UnknownTask(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metric;

    #[test]
    fn test_parse_names() -> Result<(), DataError> {
        for task in Task::ALL {
            assert_eq!(task.name().parse::<Task>()?, task);
        }
        assert_eq!("sts-b".parse::<Task>()?, Task::StsB);
        assert_eq!("SST-2".parse::<Task>()?, Task::Sst);
        assert!(matches!("SQuAD".parse::<Task>(), Err(DataError::UnknownTask(_))));
        Ok(())
    }

    #[test]
    fn test_task_shapes() {
        assert!(!Task::Cola.is_pair());
        assert!(Task::Mrpc.is_pair());
        assert_eq!(Task::StsB.head_kind(), HeadKind::Regression);
        assert_eq!(Task::Mnli.head_kind(), HeadKind::Classifier { num_classes: 3 });
        assert_eq!(Task::Mnli.dev_split(), "dev_matched");
        assert_eq!(Task::Sst.dir_name(), "SST-2");
    }

    #[test]
    fn test_metric_factory() {
        let names = |t: Task| -> Vec<String> { t.metric().values().into_iter().map(|(n, _)| n).collect() };
        assert_eq!(names(Task::Mrpc), vec!["accuracy", "f1"]);
        assert_eq!(names(Task::StsB), vec!["pearsonr", "spearmanr"]);
        assert_eq!(names(Task::Cola), vec!["mcc"]);
        assert_eq!(names(Task::Rte), vec!["accuracy"]);
    }

    #[test]
    fn test_layout_min_columns() {
        assert_eq!(Task::StsB.tsv_layout().min_columns(), 10);
        assert_eq!(Task::Sst.tsv_layout().min_columns(), 2);
        assert_eq!(Task::Mnli.tsv_layout().min_columns(), 11);
    }
}
