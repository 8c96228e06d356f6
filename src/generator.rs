//! Lazy, restartable alternative to eager consolidation: expose the chunk
//! files for a logical dataset as an iterator of feature/label batches.

use std::path::PathBuf;

use anyhow::Result;

use crate::consolidate::{self, ChunkPair};
use crate::encoder::get_encoder;
use crate::writer::read_npy;
use crate::{ProcessOptions, SampleRef};

/// One chunk's worth of examples, labels already one-hot encoded.
#[derive(Clone, Debug)]
pub struct Batch {
    /// `[examples, planes, rows, cols]`
    pub feature_shape: Vec<u64>,
    pub features: Vec<f32>,
    pub label_width: usize,
    pub labels: Vec<f32>,
}

/// Restartable view over the chunk files of a logical dataset. Every call
/// to [`DatasetIter::batches`] rescans the data directory and starts over
/// from the first chunk.
pub struct DatasetIter {
    data_dir: PathBuf,
    prefixes: Vec<String>,
    label_width: usize,
}

impl DatasetIter {
    pub fn new(
        opts: &ProcessOptions,
        logical_name: &str,
        samples: &[SampleRef],
    ) -> Result<Self> {
        let encoder = get_encoder(&opts.encoder, opts.board_size)?;
        Ok(Self {
            data_dir: opts.data_dir.clone(),
            prefixes: consolidate::prefixes_for(logical_name, samples),
            label_width: encoder.num_points(),
        })
    }

    /// Total example count across all chunks, from the label files.
    pub fn num_examples(&self) -> Result<usize> {
        let mut total = 0usize;
        for pair in self.chunk_pairs()? {
            let (shape, _) = read_npy::<i64>(&pair.labels_path)?;
            total += shape.first().copied().unwrap_or(0) as usize;
        }
        Ok(total)
    }

    /// Iterate over the chunks in order, loading one batch at a time.
    pub fn batches(&self) -> Result<impl Iterator<Item = Result<Batch>> + '_> {
        let pairs = self.chunk_pairs()?;
        let width = self.label_width;
        Ok(pairs.into_iter().map(move |pair| load_batch(&pair, width)))
    }

    fn chunk_pairs(&self) -> Result<Vec<ChunkPair>> {
        let mut pairs = Vec::new();
        for prefix in &self.prefixes {
            pairs.extend(consolidate::chunk_files(&self.data_dir, prefix)?);
        }
        Ok(pairs)
    }
}

fn load_batch(pair: &ChunkPair, label_width: usize) -> Result<Batch> {
    let (feature_shape, features) = read_npy::<f32>(&pair.features_path)?;
    let (_, raw_labels) = read_npy::<i64>(&pair.labels_path)?;
    let labels = consolidate::one_hot(&raw_labels, label_width)?;
    Ok(Batch {
        feature_shape,
        features,
        label_width,
        labels,
    })
}
