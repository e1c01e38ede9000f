//! Archive Extraction
//!
//! Unpacks every `*tar.gz` in a directory into an explicit destination
//! root, then deletes the archives (and any stray regular files that were
//! present when the pass began). A corrupt archive aborts only itself, not
//! the phase. Extraction is filesystem-heavy and runs on the blocking
//! pool; the orchestrator schedules it serially between download barriers.

use flate2::read::GzDecoder;
use std::io::{BufReader, Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{error, info, warn};

/// What one extraction pass did
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractStats {
    /// Archives successfully unpacked
    pub extracted: usize,
    /// Archives that failed and were abandoned
    pub failed: usize,
    /// Files deleted at the end of the pass
    pub removed: usize,
}

/// Extract every archive in `dir` into `dest`
pub async fn extract_archives(dir: &Path, dest: &Path) -> IoResult<ExtractStats> {
    let dir = dir.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_archives_blocking(&dir, &dest))
        .await
        .map_err(|e| IoError::new(ErrorKind::Other, e))?
}

fn extract_archives_blocking(dir: &Path, dest: &Path) -> IoResult<ExtractStats> {
    let mut stats = ExtractStats::default();
    if !dir.is_dir() {
        return Ok(stats);
    }

    // Snapshot the regular files up front; extraction writes new entries
    // into the same tree and those must survive the cleanup below.
    let mut staged: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            staged.push(entry.path());
        }
    }

    for path in &staged {
        if !path.to_string_lossy().ends_with("tar.gz") {
            continue;
        }
        match unpack(path, dest) {
            Ok(()) => {
                info!("Extracted {}", path.display());
                stats.extracted += 1;
            }
            Err(e) => {
                error!("Extraction of {} aborted: {}", path.display(), e);
                stats.failed += 1;
            }
        }
    }

    for path in staged {
        match std::fs::remove_file(&path) {
            Ok(()) => stats.removed += 1,
            Err(e) => warn!("Can't remove {}: {}", path.display(), e),
        }
    }

    Ok(stats)
}

fn unpack(path: &Path, dest: &Path) -> IoResult<()> {
    let file = std::fs::File::open(path)?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_unpack_xattrs(true);
    archive.unpack(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "extract-test-{}-{}",
            tag,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system time before Unix epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let encoder = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[tokio::test]
    async fn test_extracts_in_place_and_removes_archive() {
        let dir = temp_dir("inplace");
        write_tar_gz(
            &dir.join("stateDelta_100.tar.gz"),
            &[("stateDelta_100", b"delta bytes")],
        );

        let stats = extract_archives(&dir, &dir).await.unwrap();
        assert_eq!(stats.extracted, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(
            std::fs::read(dir.join("stateDelta_100")).unwrap(),
            b"delta bytes"
        );
        assert!(!dir.join("stateDelta_100.tar.gz").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_nested_entries_and_stray_files() {
        let dir = temp_dir("nested");
        write_tar_gz(
            &dir.join("diff_persistence_5.tar.gz"),
            &[
                ("txBlocks/000001.db", b"one"),
                ("txBlocks/000002.db", b"two"),
            ],
        );
        std::fs::write(dir.join("stray.txt"), b"leftover").unwrap();

        let stats = extract_archives(&dir, &dir).await.unwrap();
        assert_eq!(stats.extracted, 1);
        assert_eq!(std::fs::read(dir.join("txBlocks/000001.db")).unwrap(), b"one");
        // Stray regular files are cleaned with the archives.
        assert!(!dir.join("stray.txt").exists());
        assert!(!dir.join("diff_persistence_5.tar.gz").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_corrupt_archive_aborts_itself_only() {
        let dir = temp_dir("corrupt");
        std::fs::write(dir.join("broken.tar.gz"), b"this is not gzip").unwrap();
        write_tar_gz(&dir.join("good.tar.gz"), &[("ok", b"fine")]);

        let stats = extract_archives(&dir, &dir).await.unwrap();
        assert_eq!(stats.extracted, 1);
        assert_eq!(stats.failed, 1);
        assert!(dir.join("ok").exists());
        // Both archives are gone either way.
        assert!(!dir.join("broken.tar.gz").exists());
        assert!(!dir.join("good.tar.gz").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_suffix_without_dot_matches() {
        // The static DB archive is named `<testnet>tar.gz`.
        let dir = temp_dir("staticdb");
        write_tar_gz(&dir.join("devnettar.gz"), &[("history/000.db", b"old")]);

        let stats = extract_archives(&dir, &dir).await.unwrap();
        assert_eq!(stats.extracted, 1);
        assert!(dir.join("history/000.db").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty_pass() {
        let dir = temp_dir("missing");
        let stats = extract_archives(&dir.join("nope"), &dir).await.unwrap();
        assert_eq!(stats.extracted, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_extract_to_separate_dest() {
        let dir = temp_dir("src");
        let dest = temp_dir("dest");
        write_tar_gz(&dir.join("x.tar.gz"), &[("payload", b"bytes")]);

        extract_archives(&dir, &dest).await.unwrap();
        assert!(dest.join("payload").exists());
        assert!(!dir.join("payload").exists());

        std::fs::remove_dir_all(&dir).ok();
        std::fs::remove_dir_all(&dest).ok();
    }
}
