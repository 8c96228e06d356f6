use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::info;
use sgf_dataset_packer::marker::MarkerPolicy;
use sgf_dataset_packer::{
    consolidate, dispatch, generator, load_sample_refs, ProcessOptions,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Pack SGF game-record archives into chunked .npy training data"
)]
struct Cli {
    /// Directory holding the .tar.gz archives; chunk files, markers, and
    /// consolidated outputs are written here too
    #[arg(long, value_name = "DIR")]
    data_dir: PathBuf,

    /// Logical dataset name (split), e.g. "train"
    #[arg(long, value_name = "NAME")]
    name: String,

    /// JSONL file of sample references, one {"archive", "index"} per line
    #[arg(long, value_name = "FILE")]
    samples: PathBuf,

    /// Encoder to use, resolved by name
    #[arg(long, value_name = "NAME", default_value = "oneplane")]
    encoder: String,

    /// Board size the encoder is built for
    #[arg(long, value_name = "N", default_value_t = 19)]
    board_size: u32,

    /// Example budget per chunk file
    #[arg(long, value_name = "N", default_value_t = 1024)]
    chunk_size: usize,

    /// Number of worker threads (defaults to one per core)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Completion-marker granularity: per-archive or exact-members
    #[arg(long, value_name = "POLICY", default_value = "per-archive")]
    marker_policy: MarkerPolicy,

    /// Skip eager consolidation and only report the lazy chunk view
    #[arg(long)]
    lazy: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut options = ProcessOptions::new(cli.data_dir);
    options.encoder = cli.encoder;
    options.board_size = cli.board_size;
    options.chunk_size = cli.chunk_size;
    options.workers = cli.workers;
    options.marker_policy = cli.marker_policy;

    let samples = load_sample_refs(&cli.samples)?;
    info!(
        "loaded {} sample reference(s) for '{}'",
        samples.len(),
        cli.name
    );

    let summary = dispatch::dispatch(&options, &cli.name, &samples)?;
    info!(
        "extraction complete: {} archive(s) processed, {} skipped, {} example(s) in {} chunk(s)",
        summary.archives, summary.skipped, summary.examples, summary.chunks
    );

    if cli.lazy {
        let iter = generator::DatasetIter::new(&options, &cli.name, &samples)?;
        info!(
            "lazy dataset '{}' exposes {} example(s)",
            cli.name,
            iter.num_examples()?
        );
    } else {
        let dataset = consolidate::consolidate(&options, &cli.name, &samples)?;
        info!(
            "consolidated dataset '{}': {} example(s), feature shape {:?}",
            cli.name,
            dataset.num_examples(),
            dataset.feature_shape
        );
    }
    Ok(())
}
