//! Staged Diff Merge
//!
//! After diff archives are extracted into the staging directory, each of
//! its top-level subdirectories is copied recursively into the live
//! persistence directory (overwriting existing files, continuing past
//! per-entry errors), and the staging directory is removed. The merge runs
//! on the orchestrator's thread after the download barrier, so it never
//! races the workers.

use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::Path;
use tracing::{info, warn};

/// Merge every top-level subdirectory of `staging` into `live`, then
/// remove `staging` entirely
pub async fn merge_staged_dirs(staging: &Path, live: &Path) -> IoResult<()> {
    let staging = staging.to_path_buf();
    let live = live.to_path_buf();
    tokio::task::spawn_blocking(move || merge_staged_dirs_blocking(&staging, &live))
        .await
        .map_err(|e| IoError::new(ErrorKind::Other, e))?
}

fn merge_staged_dirs_blocking(staging: &Path, live: &Path) -> IoResult<()> {
    if !staging.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(staging)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let target = live.join(entry.file_name());
            info!(
                "Merging {} into {}",
                entry.path().display(),
                target.display()
            );
            copy_recursive(&entry.path(), &target);
        }
    }

    std::fs::remove_dir_all(staging)
}

/// Copy a directory tree, overwriting existing files. Per-entry failures
/// are logged and skipped so one bad file cannot abandon the rest of the
/// diff.
fn copy_recursive(src: &Path, dst: &Path) {
    if let Err(e) = std::fs::create_dir_all(dst) {
        warn!("Can't create {}: {}", dst.display(), e);
        return;
    }

    let entries = match std::fs::read_dir(src) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Can't read {}: {}", src.display(), e);
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Bad entry under {}: {}", src.display(), e);
                continue;
            }
        };
        let from = entry.path();
        let to = dst.join(entry.file_name());
        match entry.file_type() {
            Ok(t) if t.is_dir() => copy_recursive(&from, &to),
            Ok(_) => {
                if let Err(e) = std::fs::copy(&from, &to) {
                    warn!("Can't copy {} to {}: {}", from.display(), to.display(), e);
                }
            }
            Err(e) => warn!("Can't stat {}: {}", from.display(), e),
        }
    }
}
