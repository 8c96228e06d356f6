//! Replay selected archive members into encoded feature/label chunks.
//!
//! This is the body of one archive job: unpack, dry-count the examples the
//! selected members will yield, then replay every member and stream the
//! encoded examples through the chunk writer. The dry count makes the
//! number of chunks known before any encoding starts and doubles as a
//! cross-check on the emit pass.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use crate::archive;
use crate::board::{Board, GameState, Move, Player, Point};
use crate::encoder::get_encoder;
use crate::marker::{self, MarkerStatus};
use crate::sgf::SgfRecord;
use crate::writer::ChunkWriter;
use crate::ProcessOptions;

/// Output-file prefix for one (archive, logical name) job. Archive ids are
/// unique, so this mapping stays injective and no two concurrent jobs ever
/// share a write path.
pub fn output_prefix(archive_id: &str, logical_name: &str) -> String {
    let stem = archive_id.strip_suffix(".tar.gz").unwrap_or(archive_id);
    format!("{stem}{logical_name}")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub examples: usize,
    pub chunks: usize,
}

/// Extract the requested members of one archive into persisted chunks.
pub fn process_archive(
    opts: &ProcessOptions,
    archive_id: &str,
    logical_name: &str,
    member_indices: &[usize],
) -> Result<ExtractSummary> {
    if opts.chunk_size == 0 {
        bail!("chunk size must be > 0");
    }
    let unpacked = archive::unpack(&opts.data_dir, archive_id)?;

    // Member index 0 refers to the first entry after the container's root
    // directory entry (KGS archive layout).
    let mut wanted = Vec::with_capacity(member_indices.len());
    for &index in member_indices {
        let name = unpacked
            .member_names
            .get(index + 1)
            .ok_or_else(|| anyhow!("member index {index} out of range in {archive_id}"))?;
        if !name.ends_with(".sgf") {
            bail!("{name} is not a valid sgf member in {archive_id}");
        }
        wanted.push(name.clone());
    }

    let contents = archive::read_members(&unpacked.container_path, &wanted)?;
    let mut records = Vec::with_capacity(wanted.len());
    for name in &wanted {
        let bytes = contents
            .get(name)
            .ok_or_else(|| anyhow!("missing contents for member '{name}'"))?;
        let record = SgfRecord::parse(bytes)
            .with_context(|| format!("failed to parse {name} in {archive_id}"))?;
        records.push(record);
    }

    let total: usize = records.iter().map(num_examples).sum();
    let expected_chunks = total.div_ceil(opts.chunk_size);
    info!(
        "{archive_id}: {} records -> {} examples in {} chunk(s)",
        records.len(),
        total,
        expected_chunks
    );

    let prefix = output_prefix(archive_id, logical_name);
    marker::write(&opts.data_dir, &prefix, MarkerStatus::Pending, member_indices)?;
    remove_stale_chunks(&opts.data_dir, &prefix)?;

    let encoder = get_encoder(&opts.encoder, opts.board_size)?;
    let mut writer = ChunkWriter::new(&opts.data_dir, &prefix, encoder.shape(), opts.chunk_size)?;
    for (name, record) in wanted.iter().zip(&records) {
        replay(record, opts.board_size, |state, point| {
            writer.push(encoder.encode(state), encoder.encode_point(point))
        })
        .with_context(|| format!("failed to replay {name} in {archive_id}"))?;
    }
    let (chunks, examples) = writer.finish()?;

    if examples != total {
        bail!(
            "{archive_id}: dry count predicted {} examples but {} were emitted",
            total,
            examples
        );
    }
    marker::write(&opts.data_dir, &prefix, MarkerStatus::Complete, member_indices)?;

    Ok(ExtractSummary { examples, chunks })
}

/// Drop chunk files left by a previous run for this prefix. A re-extraction
/// may produce fewer chunks than the last run, and the consolidation scan
/// picks up every numbered chunk it finds.
fn remove_stale_chunks(data_dir: &Path, prefix: &str) -> Result<()> {
    let feature_needle = format!("{prefix}_features_");
    let label_needle = format!("{prefix}_labels_");
    for entry in
        fs::read_dir(data_dir).with_context(|| format!("failed to read {}", data_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&feature_needle) || name.starts_with(&label_needle) {
            fs::remove_file(entry.path())
                .with_context(|| format!("failed to remove {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Initial replay state: a declared handicap marks the first move as done,
/// and any setup stones are placed for Black with White to move. The
/// declaration alone is enough, even when no setup stones are recorded.
fn setup(record: &SgfRecord, board_size: u32) -> Result<(GameState, bool)> {
    if record.handicap() > 0 {
        let mut board = Board::new(board_size);
        let mut last = None;
        for &point in record.setup_stones() {
            check_point(point, board_size)?;
            board.place_stone(Player::Black, point);
            last = Some(Move::Play(point));
        }
        Ok((GameState::from_setup(board, Player::White, last), true))
    } else {
        Ok((GameState::new_game(board_size), false))
    }
}

fn check_point(point: Point, board_size: u32) -> Result<()> {
    if point.row == 0 || point.col == 0 || point.row > board_size || point.col > board_size {
        bail!(
            "point ({}, {}) is outside the {board_size}x{board_size} board",
            point.row,
            point.col
        );
    }
    Ok(())
}

/// Walk the full move sequence, calling `emit` with the pre-move state for
/// every play that happens after the first move is done. Passes are applied
/// to the state but never emitted. Coordinates outside the board fail the
/// replay instead of the record being partially emitted.
fn replay<F>(record: &SgfRecord, board_size: u32, mut emit: F) -> Result<()>
where
    F: FnMut(&GameState, Point) -> Result<()>,
{
    let (mut state, mut first_move_done) = setup(record, board_size)?;
    for &(_player, point) in record.moves() {
        if let Some(point) = point {
            check_point(point, board_size)?;
        }
        if first_move_done {
            if let Some(point) = point {
                emit(&state, point)?;
            }
        }
        let mv = match point {
            Some(point) => Move::Play(point),
            None => Move::Pass,
        };
        state.apply_move(mv);
        first_move_done = true;
    }
    Ok(())
}

/// Dry replay: count exactly the examples `replay` will emit.
pub fn num_examples(record: &SgfRecord) -> usize {
    let mut first_move_done = record.handicap() > 0;
    let mut count = 0;
    for &(_player, point) in record.moves() {
        if first_move_done && point.is_some() {
            count += 1;
        }
        first_move_done = true;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::write_archive;
    use crate::writer::read_npy;
    use tempfile::tempdir;

    fn options(dir: &std::path::Path) -> ProcessOptions {
        let mut opts = ProcessOptions::new(dir);
        opts.board_size = 9;
        opts
    }

    #[test]
    fn counts_skip_the_first_move_without_handicap() {
        let record = SgfRecord::parse(b"(;SZ[9];B[dd];W[ee];B[cc])").unwrap();
        assert_eq!(num_examples(&record), 2);
        let single = SgfRecord::parse(b"(;SZ[9];B[dd])").unwrap();
        assert_eq!(num_examples(&single), 0);
    }

    #[test]
    fn leading_passes_consume_the_first_move_but_never_emit() {
        // Four events, two plays; the first pass flips first-move-done, so
        // both plays emit but the pass itself never does.
        let record = SgfRecord::parse(b"(;SZ[9];B[];W[];B[dd];W[ee])").unwrap();
        assert_eq!(num_examples(&record), 2);
    }

    #[test]
    fn handicap_games_emit_for_the_opening_move() {
        let record = SgfRecord::parse(b"(;SZ[9]HA[2]AB[cc][gg];W[ee];B[dd])").unwrap();
        assert_eq!(num_examples(&record), 2);
        let no_handicap = SgfRecord::parse(b"(;SZ[9];W[ee];B[dd])").unwrap();
        assert_eq!(num_examples(&no_handicap), 1);
    }

    #[test]
    fn handicap_declaration_alone_marks_the_first_move_done() {
        // HA without AB stones: degenerate but seen in the wild; the
        // declaration still makes the opening move emit.
        let record = SgfRecord::parse(b"(;SZ[9]HA[2];W[ee];B[dd])").unwrap();
        assert_eq!(num_examples(&record), 2);
        let mut emitted = 0;
        replay(&record, 9, |_, _| {
            emitted += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(emitted, 2);
    }

    #[test]
    fn out_of_range_coordinate_fails_the_job() {
        // 'z' decodes to row/col 26, far outside a 9x9 board; the job must
        // fail with an error rather than index out of the grid.
        let dir = tempdir().unwrap();
        write_archive(dir.path(), "kgs-oob.tar.gz", &["(;SZ[9];B[aa];W[zz])"]);
        let opts = options(dir.path());
        let err = process_archive(&opts, "kgs-oob.tar.gz", "train", &[0]).unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("outside the 9x9 board"), "unexpected error: {chain}");
        assert!(chain.contains("game0.sgf"), "unexpected error: {chain}");
    }

    #[test]
    fn replay_emits_pre_move_states() {
        let record = SgfRecord::parse(b"(;SZ[9];B[dd];W[ee])").unwrap();
        let mut seen = Vec::new();
        replay(&record, 9, |state, point| {
            seen.push((state.board().stone_at(Point::new(4, 4)), point));
            Ok(())
        })
        .unwrap();
        // One example: state before W[ee], which already holds B[dd].
        assert_eq!(seen, vec![(Some(Player::Black), Point::new(5, 5))]);
    }

    #[test]
    fn process_archive_matches_expected_example_counts() {
        // Move counts [1, 3, pass-only] -> examples [0, 2, 0].
        let dir = tempdir().unwrap();
        write_archive(
            dir.path(),
            "kgs-e2e.tar.gz",
            &[
                "(;SZ[9];B[dd])",
                "(;SZ[9];B[dd];W[ee];B[cc])",
                "(;SZ[9];B[])",
            ],
        );
        let opts = options(dir.path());
        let summary = process_archive(&opts, "kgs-e2e.tar.gz", "train", &[0, 1, 2]).unwrap();
        assert_eq!(summary.examples, 2);
        assert_eq!(summary.chunks, 1);

        let (shape, _) = read_npy::<f32>(&dir.path().join("kgs-e2etrain_features_0.npy")).unwrap();
        assert_eq!(shape, vec![2, 1, 9, 9]);
        let marker = crate::marker::load(dir.path(), "kgs-e2etrain").unwrap().unwrap();
        assert_eq!(marker.status, MarkerStatus::Complete);
    }

    #[test]
    fn chunks_split_across_member_boundaries() {
        // 2 + 3 = 5 examples with a budget of 2 -> chunks sized 2, 2, 1.
        let dir = tempdir().unwrap();
        write_archive(
            dir.path(),
            "kgs-chunks.tar.gz",
            &[
                "(;SZ[9];B[aa];W[bb];B[cc])",
                "(;SZ[9];B[dd];W[ee];B[ff];W[gg])",
            ],
        );
        let mut opts = options(dir.path());
        opts.chunk_size = 2;
        let summary = process_archive(&opts, "kgs-chunks.tar.gz", "train", &[0, 1]).unwrap();
        assert_eq!(summary.examples, 5);
        assert_eq!(summary.chunks, 3);

        let sizes: Vec<u64> = (0..3)
            .map(|n| {
                let path = dir.path().join(format!("kgs-chunkstrain_labels_{n}.npy"));
                read_npy::<i64>(&path).unwrap().0[0]
            })
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(!dir.path().join("kgs-chunkstrain_labels_3.npy").exists());
    }

    #[test]
    fn non_sgf_member_aborts_the_job() {
        let dir = tempdir().unwrap();
        crate::test_fixtures::write_archive_with_names(
            dir.path(),
            "kgs-bad.tar.gz",
            &[("games/readme.txt", "not a game")],
        );
        let opts = options(dir.path());
        let err = process_archive(&opts, "kgs-bad.tar.gz", "train", &[0]).unwrap_err();
        assert!(err.to_string().contains("not a valid sgf"));
    }

    #[test]
    fn unparseable_record_aborts_the_job() {
        let dir = tempdir().unwrap();
        crate::test_fixtures::write_archive_with_names(
            dir.path(),
            "kgs-corrupt.tar.gz",
            &[("games/game0.sgf", "garbage bytes")],
        );
        let opts = options(dir.path());
        assert!(process_archive(&opts, "kgs-corrupt.tar.gz", "train", &[0]).is_err());
    }
}
