//! Two-stage unpacking of `.tar.gz` game archives.
//!
//! The outer gzip stream is decompressed into the data directory once and
//! the resulting tar is kept as a reusable cache; member listing and member
//! reads then work against the cached tar.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use log::info;
use tar::Archive;

/// Decompressed container plus its member list, in tar entry order.
pub struct UnpackedArchive {
    pub container_path: PathBuf,
    pub member_names: Vec<String>,
}

/// Decompress `archive_file` (if not already cached) and enumerate the
/// members of the inner tar container.
pub fn unpack(data_dir: &Path, archive_file: &str) -> Result<UnpackedArchive> {
    let gz_path = data_dir.join(archive_file);
    let tar_name = archive_file.strip_suffix(".gz").unwrap_or(archive_file);
    let container_path = data_dir.join(tar_name);

    if container_path.exists() {
        info!("reusing cached container {}", container_path.display());
    } else {
        let gz = File::open(&gz_path)
            .with_context(|| format!("failed to open archive {}", gz_path.display()))?;
        let mut decoder = GzDecoder::new(BufReader::new(gz));
        let tmp_path = container_path.with_extension("tar.tmp");
        let mut out = BufWriter::new(
            File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?,
        );
        io::copy(&mut decoder, &mut out)
            .with_context(|| format!("failed to decompress {}", gz_path.display()))?;
        drop(out);
        fs::rename(&tmp_path, &container_path).with_context(|| {
            format!(
                "failed to rename {} -> {}",
                tmp_path.display(),
                container_path.display()
            )
        })?;
        info!(
            "decompressed {} -> {}",
            gz_path.display(),
            container_path.display()
        );
    }

    let member_names = list_members(&container_path)?;
    Ok(UnpackedArchive {
        container_path,
        member_names,
    })
}

fn list_members(container_path: &Path) -> Result<Vec<String>> {
    let file = File::open(container_path)
        .with_context(|| format!("failed to open container {}", container_path.display()))?;
    let mut archive = Archive::new(BufReader::new(file));
    let mut names = Vec::new();
    for entry in archive
        .entries()
        .with_context(|| format!("failed to list {}", container_path.display()))?
    {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", container_path.display()))?;
        let path = entry
            .path()
            .with_context(|| format!("bad entry path in {}", container_path.display()))?;
        names.push(path.to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Read the contents of the named members in a single pass over the tar.
pub fn read_members(
    container_path: &Path,
    wanted: &[String],
) -> Result<HashMap<String, Vec<u8>>> {
    let file = File::open(container_path)
        .with_context(|| format!("failed to open container {}", container_path.display()))?;
    let mut archive = Archive::new(BufReader::new(file));
    let mut contents = HashMap::new();
    for entry in archive
        .entries()
        .with_context(|| format!("failed to list {}", container_path.display()))?
    {
        let mut entry = entry
            .with_context(|| format!("failed to read entry in {}", container_path.display()))?;
        let name = entry
            .path()
            .with_context(|| format!("bad entry path in {}", container_path.display()))?
            .to_string_lossy()
            .into_owned();
        if !wanted.contains(&name) {
            continue;
        }
        let mut buf = Vec::new();
        entry
            .read_to_end(&mut buf)
            .with_context(|| format!("failed to read member '{name}'"))?;
        contents.insert(name, buf);
    }
    for name in wanted {
        if !contents.contains_key(name) {
            bail!(
                "member '{}' not found in {}",
                name,
                container_path.display()
            );
        }
    }
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::write_archive;
    use tempfile::tempdir;

    #[test]
    fn unpack_lists_members_and_caches_container() {
        let dir = tempdir().unwrap();
        write_archive(dir.path(), "kgs-0001.tar.gz", &["(;SZ[19];B[dd])"]);

        let unpacked = unpack(dir.path(), "kgs-0001.tar.gz").unwrap();
        assert!(unpacked.container_path.ends_with("kgs-0001.tar"));
        assert_eq!(unpacked.member_names.len(), 2);
        assert!(unpacked.member_names[0].ends_with('/'));
        assert!(unpacked.member_names[1].ends_with(".sgf"));

        // Second unpack reuses the cached tar.
        let again = unpack(dir.path(), "kgs-0001.tar.gz").unwrap();
        assert_eq!(again.member_names, unpacked.member_names);
    }

    #[test]
    fn read_members_returns_requested_contents() {
        let dir = tempdir().unwrap();
        write_archive(dir.path(), "kgs-0002.tar.gz", &["(;SZ[19];B[dd])", "(;SZ[19];W[pp])"]);
        let unpacked = unpack(dir.path(), "kgs-0002.tar.gz").unwrap();

        let wanted = vec![unpacked.member_names[2].clone()];
        let contents = read_members(&unpacked.container_path, &wanted).unwrap();
        assert_eq!(contents[&wanted[0]], b"(;SZ[19];W[pp])".to_vec());
    }

    #[test]
    fn missing_member_is_an_error() {
        let dir = tempdir().unwrap();
        write_archive(dir.path(), "kgs-0003.tar.gz", &["(;SZ[19];B[dd])"]);
        let unpacked = unpack(dir.path(), "kgs-0003.tar.gz").unwrap();
        let wanted = vec!["games/nope.sgf".to_string()];
        assert!(read_members(&unpacked.container_path, &wanted).is_err());
    }
}
