//! Bounded-size `.npy` chunk persistence for encoded examples.
//!
//! Each flushed chunk is a linked pair of files,
//! `{prefix}_features_{n}.npy` and `{prefix}_labels_{n}.npy`, written via a
//! temporary file and an atomic rename so a crashed job never leaves a
//! half-written chunk under the final name.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use npyz::{DType, TypeStr, WriterBuilder};

/// Accumulates encoded examples and flushes them to disk every time the
/// per-chunk example budget is reached.
pub struct ChunkWriter {
    data_dir: PathBuf,
    prefix: String,
    feature_shape: [usize; 3],
    chunk_size: usize,
    chunk_idx: usize,
    features: Vec<f32>,
    labels: Vec<i64>,
    examples: usize,
}

impl ChunkWriter {
    pub fn new(
        data_dir: &Path,
        prefix: &str,
        feature_shape: [usize; 3],
        chunk_size: usize,
    ) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk size must be > 0");
        }
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            prefix: prefix.to_string(),
            feature_shape,
            chunk_size,
            chunk_idx: 0,
            features: Vec::new(),
            labels: Vec::new(),
            examples: 0,
        })
    }

    /// Append one example; flushes the current chunk when it reaches the
    /// budget.
    pub fn push(&mut self, features: Vec<f32>, label: i64) -> Result<()> {
        let expected: usize = self.feature_shape.iter().product();
        if features.len() != expected {
            bail!(
                "encoder produced {} values but the feature shape holds {}",
                features.len(),
                expected
            );
        }
        self.features.extend(features);
        self.labels.push(label);
        self.examples += 1;
        if self.labels.len() >= self.chunk_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.labels.is_empty() {
            return Ok(());
        }
        let n = self.labels.len() as u64;
        let [planes, rows, cols] = self.feature_shape;
        let feature_path = self
            .data_dir
            .join(format!("{}_features_{}.npy", self.prefix, self.chunk_idx));
        write_f32_nd(
            &feature_path,
            &[n, planes as u64, rows as u64, cols as u64],
            &self.features,
        )?;
        let label_path = self
            .data_dir
            .join(format!("{}_labels_{}.npy", self.prefix, self.chunk_idx));
        write_i64_1d(&label_path, &self.labels)?;
        info!(
            "wrote chunk {} for {} ({} examples)",
            self.chunk_idx, self.prefix, n
        );
        self.chunk_idx += 1;
        self.features.clear();
        self.labels.clear();
        Ok(())
    }

    /// Flush the trailing partial chunk and return (chunks, examples).
    pub fn finish(mut self) -> Result<(usize, usize)> {
        self.flush()?;
        Ok((self.chunk_idx, self.examples))
    }
}

/// Write a dense f32 array of the given shape.
pub fn write_f32_nd(path: &Path, shape: &[u64], data: &[f32]) -> Result<()> {
    let f4: TypeStr = "<f4".parse().unwrap();
    write_npy(path, DType::Plain(f4), shape, data.iter().copied())
}

/// Write a 1-d i64 array.
pub fn write_i64_1d(path: &Path, data: &[i64]) -> Result<()> {
    let i8_le: TypeStr = "<i8".parse().unwrap();
    write_npy(
        path,
        DType::Plain(i8_le),
        &[data.len() as u64],
        data.iter().copied(),
    )
}

fn write_npy<T: npyz::Serialize>(
    path: &Path,
    dtype: DType,
    shape: &[u64],
    values: impl Iterator<Item = T>,
) -> Result<()> {
    let tmp_path = path.with_extension("npy.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    let mut writer = npyz::WriteOptions::new()
        .dtype(dtype)
        .shape(shape)
        .writer(BufWriter::new(file))
        .begin_nd()?;
    writer.extend(values)?;
    writer.finish()?;
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Load an `.npy` file as (shape, flat data).
pub fn read_npy<T: npyz::Deserialize>(path: &Path) -> Result<(Vec<u64>, Vec<T>)> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let npy = npyz::NpyFile::new(&mut reader)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let shape = npy.shape().to_vec();
    let data_reader = npy
        .data::<T>()
        .map_err(|err| anyhow!("{}: {err}", path.display()))?;
    let mut data = Vec::new();
    for value in data_reader {
        data.push(value.with_context(|| format!("failed to decode value in {}", path.display()))?);
    }
    Ok((shape, data))
}
