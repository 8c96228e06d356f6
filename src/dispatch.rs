//! Fan one extraction job per archive out over a fixed-size worker pool.
//!
//! Jobs are self-contained values (archive id, logical name, member index
//! list) and never share write paths, so the pool's join is the only
//! synchronization point. The first failing job aborts the whole run; the
//! CLI turns that into a non-zero exit instead of a partial dataset.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::prelude::*;

use crate::extract::{self, ExtractSummary};
use crate::marker;
use crate::{ProcessOptions, SampleRef};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Archives actually extracted in this run.
    pub archives: usize,
    /// Archives skipped because a completion marker satisfied the policy.
    pub skipped: usize,
    pub examples: usize,
    pub chunks: usize,
}

/// Group the sample references by archive, drop archives whose completion
/// marker satisfies the configured policy, and run one extraction job per
/// remaining archive in parallel.
pub fn dispatch(
    opts: &ProcessOptions,
    logical_name: &str,
    samples: &[SampleRef],
) -> Result<DispatchSummary> {
    let mut by_archive: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for sample in samples {
        by_archive
            .entry(sample.archive.clone())
            .or_default()
            .push(sample.index);
    }
    for indices in by_archive.values_mut() {
        indices.sort_unstable();
        indices.dedup();
    }

    let mut jobs = Vec::new();
    let mut skipped = 0usize;
    for (archive_id, indices) in by_archive {
        let prefix = extract::output_prefix(&archive_id, logical_name);
        let existing = marker::load(&opts.data_dir, &prefix)?;
        if marker::satisfies(existing.as_ref(), opts.marker_policy, &indices) {
            info!("skipping {archive_id}: '{logical_name}' extraction already complete");
            skipped += 1;
            continue;
        }
        jobs.push((archive_id, indices));
    }

    if jobs.is_empty() {
        info!("no archives to process for '{logical_name}' ({skipped} skipped)");
        return Ok(DispatchSummary {
            skipped,
            ..DispatchSummary::default()
        });
    }

    info!(
        "dispatching {} archive job(s) for '{logical_name}' ({} skipped)",
        jobs.len(),
        skipped
    );
    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})",
        )
        .unwrap()
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );

    let run = || -> Result<Vec<ExtractSummary>> {
        jobs.par_iter()
            .map(|(archive_id, indices)| {
                let out = extract::process_archive(opts, archive_id, logical_name, indices)
                    .with_context(|| format!("archive job '{archive_id}' failed"));
                pb.inc(1);
                out
            })
            .collect()
    };

    let summaries = if let Some(n) = opts.workers {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .context("failed to build worker pool")?
            .install(run)?
    } else {
        run()?
    };
    pb.finish_and_clear();

    Ok(DispatchSummary {
        archives: summaries.len(),
        skipped,
        examples: summaries.iter().map(|s| s.examples).sum(),
        chunks: summaries.iter().map(|s| s.chunks).sum(),
    })
}
