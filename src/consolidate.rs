//! Merge per-archive chunk files into one consolidated dataset.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use crate::encoder::get_encoder;
use crate::extract::output_prefix;
use crate::writer::{read_npy, write_f32_nd};
use crate::{ProcessOptions, SampleRef};

/// Consolidated feature/label arrays. Labels are one-hot over the encoder's
/// label space.
#[derive(Clone, Debug)]
pub struct Dataset {
    /// `[examples, planes, rows, cols]`
    pub feature_shape: Vec<u64>,
    pub features: Vec<f32>,
    /// One-hot width (the encoder's number of points).
    pub label_width: usize,
    pub labels: Vec<f32>,
}

impl Dataset {
    pub fn num_examples(&self) -> usize {
        self.feature_shape.first().copied().unwrap_or(0) as usize
    }
}

/// A linked feature/label chunk file pair.
#[derive(Clone, Debug)]
pub(crate) struct ChunkPair {
    pub features_path: PathBuf,
    pub labels_path: PathBuf,
    pub index: usize,
}

/// Load every chunk written for the archives named in `samples`,
/// concatenate along the example axis, one-hot the labels, write the merged
/// arrays under the logical name, and return them.
pub fn consolidate(
    opts: &ProcessOptions,
    logical_name: &str,
    samples: &[SampleRef],
) -> Result<Dataset> {
    let prefixes = prefixes_for(logical_name, samples);
    let encoder = get_encoder(&opts.encoder, opts.board_size)?;
    let label_width = encoder.num_points();

    let mut features = Vec::new();
    let mut labels = Vec::new();
    let mut per_example_dims: Option<Vec<u64>> = None;
    let mut total_examples = 0u64;

    for prefix in &prefixes {
        for pair in chunk_files(&opts.data_dir, prefix)? {
            let (feature_shape, chunk_features) = read_npy::<f32>(&pair.features_path)?;
            let (label_shape, chunk_labels) = read_npy::<i64>(&pair.labels_path)?;
            let n = *feature_shape
                .first()
                .ok_or_else(|| anyhow!("{} has no shape", pair.features_path.display()))?;
            if label_shape != vec![n] {
                bail!(
                    "chunk {} of {} has {} feature rows but {:?} labels",
                    pair.index,
                    prefix,
                    n,
                    label_shape
                );
            }
            let dims = feature_shape[1..].to_vec();
            match &per_example_dims {
                Some(existing) if *existing != dims => bail!(
                    "feature shape mismatch in {}: {:?} vs {:?}",
                    pair.features_path.display(),
                    dims,
                    existing
                ),
                None => per_example_dims = Some(dims),
                _ => {}
            }
            total_examples += n;
            features.extend(chunk_features);
            labels.extend(one_hot(&chunk_labels, label_width)?);
        }
    }

    let per_example_dims = per_example_dims
        .ok_or_else(|| anyhow!("no chunk files found for '{logical_name}' in {}", opts.data_dir.display()))?;
    let mut feature_shape = vec![total_examples];
    feature_shape.extend(per_example_dims);

    let feature_path = opts.data_dir.join(format!("{logical_name}_features.npy"));
    write_f32_nd(&feature_path, &feature_shape, &features)?;
    let label_path = opts.data_dir.join(format!("{logical_name}_labels.npy"));
    write_f32_nd(&label_path, &[total_examples, label_width as u64], &labels)?;
    info!(
        "consolidated {} example(s) into {} and {}",
        total_examples,
        feature_path.display(),
        label_path.display()
    );

    Ok(Dataset {
        feature_shape,
        features,
        label_width,
        labels,
    })
}

/// Chunk-file prefixes implied by a sample set, in deterministic order.
pub(crate) fn prefixes_for(logical_name: &str, samples: &[SampleRef]) -> Vec<String> {
    let archives: BTreeSet<&str> = samples.iter().map(|s| s.archive.as_str()).collect();
    archives
        .into_iter()
        .map(|archive| output_prefix(archive, logical_name))
        .collect()
}

/// Scan the data directory for `{prefix}_features_{n}.npy` chunks and pair
/// each with its label file, ordered by chunk number.
pub(crate) fn chunk_files(data_dir: &Path, prefix: &str) -> Result<Vec<ChunkPair>> {
    let needle = format!("{prefix}_features_");
    let mut pairs = Vec::new();
    for entry in fs::read_dir(data_dir)
        .with_context(|| format!("failed to read {}", data_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(&needle) else {
            continue;
        };
        let Some(number) = rest.strip_suffix(".npy") else {
            continue;
        };
        let Ok(index) = number.parse::<usize>() else {
            continue;
        };
        let labels_path = data_dir.join(format!("{prefix}_labels_{index}.npy"));
        if !labels_path.exists() {
            bail!(
                "chunk {} of {} has no matching label file",
                index,
                prefix
            );
        }
        pairs.push(ChunkPair {
            features_path: entry.path(),
            labels_path,
            index,
        });
    }
    pairs.sort_by_key(|pair| pair.index);
    Ok(pairs)
}

/// Expand integer labels into one-hot rows of the given width.
pub(crate) fn one_hot(labels: &[i64], width: usize) -> Result<Vec<f32>> {
    let mut rows = vec![0.0f32; labels.len() * width];
    for (i, &label) in labels.iter().enumerate() {
        let idx = usize::try_from(label)
            .ok()
            .filter(|&idx| idx < width)
            .ok_or_else(|| anyhow!("label {} outside label space of {}", label, width))?;
        rows[i * width + idx] = 1.0;
    }
    Ok(rows)
}
