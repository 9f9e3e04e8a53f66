//! Data and input errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("label '{label}' is not one of {known:?}")]
    UnknownLabel { label: String, known: Vec<String> },

    #[error("regression label '{0}' is not a number")]
    InvalidScore(String),

    #[error("{path}:{line}: expected at least {expected} tab-separated columns, found {found}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("unknown task '{0}' (expected one of MRPC, QQP, QNLI, RTE, STS-B, CoLA, MNLI, WNLI, SST)")]
    UnknownTask(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
