//! Raw example to model input
//!
//! Pair layout is `[CLS] a [SEP] b [SEP]` with segment ids 0 for the first
//! part and 1 for `b [SEP]`; single sentences are `[CLS] a [SEP]`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dataset::{GlueDataset, RawExample};
use crate::error::DataError;
use crate::tokenizer::TextEncoder;

/// Padding id for token and segment sequences
pub const PAD_ID: u32 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LabelKind {
    /// Fixed label vocabulary; the index is the class id
    Classes(Vec<String>),
    Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Label {
    Class(u32),
    Score(f32),
}

impl Label {
    pub fn as_f32(&self) -> f32 {
        match self {
            Label::Class(c) => *c as f32,
            Label::Score(s) => *s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedExample {
    pub token_ids: Vec<u32>,
    pub valid_length: usize,
    pub segment_ids: Vec<u32>,
    pub label: Label,
}

pub struct Transform {
    encoder: Arc<dyn TextEncoder + Send + Sync>,
    label_kind: LabelKind,
    max_len: usize,
    pair: bool,
    pad: bool,
}

impl Transform {
    pub fn new(
        encoder: Arc<dyn TextEncoder + Send + Sync>,
        label_kind: LabelKind,
        max_len: usize,
        pair: bool,
        pad: bool,
    ) -> Result<Self> {
        let reserved = if pair { 3 } else { 2 };
        if max_len < reserved {
            anyhow::bail!("max_len {} leaves no room for {} special tokens", max_len, reserved);
        }
        Ok(Self {
            encoder,
            label_kind,
            max_len,
            pair,
            pad,
        })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn pads(&self) -> bool {
        self.pad
    }

    pub fn encoder(&self) -> &(dyn TextEncoder + Send + Sync) {
        self.encoder.as_ref()
    }

    pub fn label(&self, raw: &str) -> Result<Label, DataError> {
        match &self.label_kind {
            LabelKind::Score => raw
                .trim()
                .parse::<f32>()
                .map(Label::Score)
                .map_err(|_| DataError::InvalidScore(raw.to_string())),
            LabelKind::Classes(known) => known
                .iter()
                .position(|l| l == raw)
                .map(|i| Label::Class(i as u32))
                .ok_or_else(|| DataError::UnknownLabel {
                    label: raw.to_string(),
                    known: known.clone(),
                }),
        }
    }

    pub fn apply(&self, example: &RawExample) -> Result<EncodedExample> {
        let special = self.encoder.special_tokens();
        let mut a = self.encoder.encode(&example.text_a)?;
        let mut b = match (&example.text_b, self.pair) {
            (Some(text), true) => Some(self.encoder.encode(text)?),
            _ => None,
        };

        match b.as_mut() {
            Some(b) => truncate_pair(&mut a, b, self.max_len - 3),
            None => a.truncate(self.max_len - 2),
        }

        let mut token_ids = Vec::with_capacity(self.max_len);
        token_ids.push(special.cls);
        token_ids.extend_from_slice(&a);
        token_ids.push(special.sep);
        let mut segment_ids = vec![0u32; token_ids.len()];
        if let Some(b) = b {
            token_ids.extend_from_slice(&b);
            token_ids.push(special.sep);
            segment_ids.resize(token_ids.len(), 1);
        }

        let valid_length = token_ids.len();
        if self.pad {
            token_ids.resize(self.max_len, PAD_ID);
            segment_ids.resize(self.max_len, PAD_ID);
        }

        Ok(EncodedExample {
            token_ids,
            valid_length,
            segment_ids,
            label: self.label(&example.label)?,
        })
    }
}

/// Drop tokens from the end of the longer sequence until both fit
pub fn truncate_pair(a: &mut Vec<u32>, b: &mut Vec<u32>, budget: usize) {
    while a.len() + b.len() > budget {
        if a.len() > b.len() {
            a.pop();
        } else {
            b.pop();
        }
    }
}

/// A dataset whose examples are encoded on access
pub struct TransformedDataset {
    dataset: GlueDataset,
    transform: Transform,
}

impl TransformedDataset {
    pub fn new(dataset: GlueDataset, transform: Transform) -> Self {
        Self { dataset, transform }
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<EncodedExample> {
        let raw = self
            .dataset
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("Example index {} out of range ({})", index, self.len()))?;
        self.transform.apply(raw)
    }

    /// Valid lengths of every example, for bucketing
    pub fn valid_lengths(&self) -> Result<Vec<usize>> {
        self.dataset
            .iter()
            .map(|raw| self.transform.apply(raw).map(|e| e.valid_length))
            .collect()
    }

    pub fn dataset(&self) -> &GlueDataset {
        &self.dataset
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }
}
