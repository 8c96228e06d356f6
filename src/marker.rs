//! Completion sidecars that let re-runs skip already-processed archives.
//!
//! A marker is a small JSON record per (archive, logical dataset name)
//! holding an explicit status instead of relying on bare file existence,
//! plus the member indices the finished job covered.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerStatus {
    Pending,
    Complete,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Marker {
    pub status: MarkerStatus,
    pub member_indices: Vec<usize>,
}

/// Granularity at which a Complete marker blocks re-extraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MarkerPolicy {
    /// Any Complete marker for the (archive, name) pair skips the archive,
    /// regardless of which member subset produced it.
    #[default]
    PerArchive,
    /// Skip only when the completed member set matches the requested one.
    ExactMembers,
}

impl std::str::FromStr for MarkerPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "per-archive" => Ok(MarkerPolicy::PerArchive),
            "exact-members" => Ok(MarkerPolicy::ExactMembers),
            other => bail!("unknown marker policy '{other}' (expected 'per-archive' or 'exact-members')"),
        }
    }
}

pub fn path_for(data_dir: &Path, prefix: &str) -> PathBuf {
    data_dir.join(format!("{prefix}.marker.json"))
}

pub fn write(
    data_dir: &Path,
    prefix: &str,
    status: MarkerStatus,
    member_indices: &[usize],
) -> Result<()> {
    let mut indices = member_indices.to_vec();
    indices.sort_unstable();
    let marker = Marker {
        status,
        member_indices: indices,
    };
    let path = path_for(data_dir, prefix);
    let json = serde_json::to_string_pretty(&marker)?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn load(data_dir: &Path, prefix: &str) -> Result<Option<Marker>> {
    let path = path_for(data_dir, prefix);
    if !path.exists() {
        return Ok(None);
    }
    let text =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let marker: Marker = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(marker))
}

/// Whether an existing marker allows skipping the requested extraction.
pub fn satisfies(marker: Option<&Marker>, policy: MarkerPolicy, requested: &[usize]) -> bool {
    let Some(marker) = marker else {
        return false;
    };
    if marker.status != MarkerStatus::Complete {
        return false;
    }
    match policy {
        MarkerPolicy::PerArchive => true,
        MarkerPolicy::ExactMembers => {
            let mut requested = requested.to_vec();
            requested.sort_unstable();
            requested.dedup();
            marker.member_indices == requested
        }
    }
}
