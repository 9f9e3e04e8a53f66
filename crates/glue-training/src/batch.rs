//! Sampling and batch assembly

use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::transform::{EncodedExample, Label, PAD_ID};

/// Order in which example indices are grouped into batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sampler {
    /// Dataset order (evaluation)
    Sequential,
    Shuffled,
    /// Similar lengths share a batch; buckets and batch order are shuffled
    Bucketed { num_buckets: usize },
}

impl Sampler {
    /// Index batches for one pass. The last partial batch is kept.
    ///
    /// `lengths` holds the valid length of every example and is required
    /// for bucketing only.
    pub fn batches(
        &self,
        num_examples: usize,
        lengths: Option<&[usize]>,
        batch_size: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<Vec<usize>>> {
        if batch_size == 0 {
            anyhow::bail!("Batch size must be positive");
        }
        let mut indices: Vec<usize> = (0..num_examples).collect();

        match *self {
            Sampler::Sequential => Ok(chunk(&indices, batch_size)),
            Sampler::Shuffled => {
                indices.shuffle(rng);
                Ok(chunk(&indices, batch_size))
            }
            Sampler::Bucketed { num_buckets } => {
                let lengths = lengths.ok_or_else(|| anyhow::anyhow!("Bucketed sampling needs example lengths"))?;
                if lengths.len() != num_examples {
                    anyhow::bail!("Got {} lengths for {} examples", lengths.len(), num_examples);
                }
                indices.sort_by_key(|&i| lengths[i]);

                let bucket_size = num_examples.div_ceil(num_buckets.max(1)).max(1);
                let mut batches = Vec::new();
                for bucket in indices.chunks(bucket_size) {
                    let mut bucket = bucket.to_vec();
                    bucket.shuffle(rng);
                    batches.extend(chunk(&bucket, batch_size));
                }
                batches.shuffle(rng);
                Ok(batches)
            }
        }
    }
}

fn chunk(indices: &[usize], batch_size: usize) -> Vec<Vec<usize>> {
    indices.chunks(batch_size).map(|c| c.to_vec()).collect()
}

pub struct Batch {
    /// (batch, seq_len) u32
    pub input_ids: Tensor,
    /// (batch,) u32
    pub valid_length: Tensor,
    /// (batch, seq_len) u32
    pub segment_ids: Tensor,
    /// (batch,) u32 class ids or f32 scores
    pub labels: Tensor,
    /// Labels as f32 for metric updates
    pub label_values: Vec<f32>,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.label_values.len()
    }
}

/// Stack examples, padding with 0 to the longest sequence in the batch
pub fn collate(examples: &[EncodedExample], device: &Device) -> Result<Batch> {
    if examples.is_empty() {
        anyhow::bail!("Cannot collate an empty batch");
    }
    let batch = examples.len();
    let seq_len = examples.iter().map(|e| e.token_ids.len()).max().unwrap_or(0);

    let mut ids = Vec::with_capacity(batch * seq_len);
    let mut segments = Vec::with_capacity(batch * seq_len);
    let mut valid = Vec::with_capacity(batch);
    for e in examples {
        ids.extend_from_slice(&e.token_ids);
        ids.resize(ids.len() + seq_len - e.token_ids.len(), PAD_ID);
        segments.extend_from_slice(&e.segment_ids);
        segments.resize(segments.len() + seq_len - e.segment_ids.len(), PAD_ID);
        valid.push(e.valid_length as u32);
    }

    let label_values: Vec<f32> = examples.iter().map(|e| e.label.as_f32()).collect();
    let labels = match examples[0].label {
        Label::Class(_) => {
            let classes = examples
                .iter()
                .map(|e| match e.label {
                    Label::Class(c) => Ok(c),
                    Label::Score(_) => Err(anyhow::anyhow!("Batch mixes class and score labels")),
                })
                .collect::<Result<Vec<u32>>>()?;
            Tensor::from_vec(classes, batch, device)?
        }
        Label::Score(_) => {
            if examples.iter().any(|e| matches!(e.label, Label::Class(_))) {
                anyhow::bail!("Batch mixes class and score labels");
            }
            Tensor::from_vec(label_values.clone(), batch, device)?
        }
    };

    Ok(Batch {
        input_ids: Tensor::from_vec(ids, (batch, seq_len), device)?,
        valid_length: Tensor::from_vec(valid, batch, device)?,
        segment_ids: Tensor::from_vec(segments, (batch, seq_len), device)?,
        labels,
        label_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use rand::SeedableRng;

    fn example(len: usize, label: Label) -> EncodedExample {
        EncodedExample {
            token_ids: (1..=len as u32).collect(),
            valid_length: len,
            segment_ids: vec![0; len],
            label,
        }
    }

    #[test]
    fn test_sequential_keeps_order_and_last_batch() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0);
        let batches = Sampler::Sequential.batches(5, None, 2, &mut rng)?;
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);
        Ok(())
    }

    #[test]
    fn test_shuffled_is_seeded_permutation() -> Result<()> {
        let run = |seed| -> Result<Vec<Vec<usize>>> {
            Sampler::Shuffled.batches(10, None, 3, &mut StdRng::seed_from_u64(seed))
        };
        let a = run(7)?;
        assert_eq!(a, run(7)?);

        let mut flat: Vec<usize> = a.into_iter().flatten().collect();
        flat.sort();
        assert_eq!(flat, (0..10).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_bucketed_groups_similar_lengths() -> Result<()> {
        let lengths = [5, 50, 6, 51, 7, 52, 8, 53];
        let mut rng = StdRng::seed_from_u64(3);
        let sampler = Sampler::Bucketed { num_buckets: 2 };
        let batches = sampler.batches(8, Some(&lengths), 2, &mut rng)?;

        assert_eq!(batches.len(), 4);
        for batch in &batches {
            let short = batch.iter().filter(|&&i| lengths[i] < 10).count();
            assert!(short == 0 || short == batch.len(), "mixed bucket: {:?}", batch);
        }
        assert!(sampler.batches(8, None, 2, &mut rng).is_err());
        Ok(())
    }

    #[test]
    fn test_collate_pads_to_batch_max() -> Result<()> {
        let batch = collate(
            &[example(3, Label::Class(1)), example(5, Label::Class(0))],
            &Device::Cpu,
        )?;
        assert_eq!(batch.input_ids.dims(), &[2, 5]);
        assert_eq!(batch.input_ids.to_vec2::<u32>()?[0], vec![1, 2, 3, 0, 0]);
        assert_eq!(batch.valid_length.to_vec1::<u32>()?, vec![3, 5]);
        assert_eq!(batch.labels.dtype(), DType::U32);
        assert_eq!(batch.labels.to_vec1::<u32>()?, vec![1, 0]);
        assert_eq!(batch.size(), 2);
        Ok(())
    }

    #[test]
    fn test_collate_scores() -> Result<()> {
        let batch = collate(
            &[example(2, Label::Score(0.5)), example(2, Label::Score(4.0))],
            &Device::Cpu,
        )?;
        assert_eq!(batch.labels.dtype(), DType::F32);
        assert_eq!(batch.label_values, vec![0.5, 4.0]);

        let mixed = collate(&[example(2, Label::Score(0.5)), example(2, Label::Class(1))], &Device::Cpu);
        assert!(mixed.is_err());
        Ok(())
    }
}
