//! Pack archives of SGF game records into chunked NumPy training data.
//!
//! The pipeline takes a set of (archive, member index) sample references,
//! fans one extraction job per archive out over a worker pool, replays each
//! selected game record move by move, and persists encoded
//! (feature tensor, next-move label) pairs in bounded-size `.npy` chunks.
//! A consolidation step reassembles the chunks into one dataset, or a lazy
//! iterator exposes them chunk by chunk.

pub mod archive;
pub mod board;
pub mod consolidate;
pub mod dispatch;
pub mod encoder;
pub mod extract;
pub mod generator;
pub mod marker;
pub mod sgf;
pub mod writer;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::marker::MarkerPolicy;

/// One game record inside one archive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct SampleRef {
    pub archive: String,
    pub index: usize,
}

/// Pipeline configuration carried through every stage.
#[derive(Clone, Debug)]
pub struct ProcessOptions {
    /// Directory holding the archives, chunk files, and markers.
    pub data_dir: PathBuf,
    /// Encoder name resolved through the registry.
    pub encoder: String,
    pub board_size: u32,
    /// Per-chunk example budget.
    pub chunk_size: usize,
    /// Worker pool size (defaults to one thread per core).
    pub workers: Option<usize>,
    pub marker_policy: MarkerPolicy,
}

impl ProcessOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            encoder: "oneplane".to_string(),
            board_size: 19,
            chunk_size: 1024,
            workers: None,
            marker_policy: MarkerPolicy::default(),
        }
    }
}

/// Read sample references from a JSONL file, one
/// `{"archive": ..., "index": ...}` object per line.
pub fn load_sample_refs(path: &Path) -> Result<Vec<SampleRef>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut samples = Vec::new();
    for (line_idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: SampleRef = serde_json::from_str(&line).with_context(|| {
            format!(
                "failed to parse sample ref in {} at line {}",
                path.display(),
                line_idx + 1
            )
        })?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Extract every requested archive, then consolidate the chunks eagerly.
pub fn load_dataset(
    opts: &ProcessOptions,
    logical_name: &str,
    samples: &[SampleRef],
) -> Result<consolidate::Dataset> {
    dispatch::dispatch(opts, logical_name, samples)?;
    consolidate::consolidate(opts, logical_name, samples)
}

/// Extract every requested archive, then expose the chunks lazily.
pub fn load_dataset_lazy(
    opts: &ProcessOptions,
    logical_name: &str,
    samples: &[SampleRef],
) -> Result<generator::DatasetIter> {
    dispatch::dispatch(opts, logical_name, samples)?;
    generator::DatasetIter::new(opts, logical_name, samples)
}
