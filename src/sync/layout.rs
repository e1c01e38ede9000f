//! Path Planning
//!
//! Every remote prefix and local directory is derived from the single
//! `(storage_root, testnet)` pair. Local paths for downloaded objects are
//! derived by stripping the known remote prefix from the key, so the
//! server-side layout (`incremental/<testnet>/persistence/...`) maps onto
//! the local replica layout (`<storage_root>/persistence/...`).

use std::path::{Component, Path, PathBuf};

/// Sentinel suffix: presence means an upload is in progress
const LOCK_SUFFIX: &str = ".lock";
/// Sentinel suffix: UTF-8 decimal tx block number of the remote tip
const TIP_SUFFIX: &str = ".currentTxBlk";

/// Derives all remote and local paths for a sync run
#[derive(Debug, Clone)]
pub struct SyncLayout {
    storage_root: PathBuf,
    testnet: String,
}

impl SyncLayout {
    pub fn new(storage_root: impl Into<PathBuf>, testnet: impl Into<String>) -> Self {
        SyncLayout {
            storage_root: storage_root.into(),
            testnet: testnet.into(),
        }
    }

    pub fn persistence_prefix(&self) -> String {
        format!("incremental/{}/", self.testnet)
    }

    pub fn state_delta_prefix(&self) -> String {
        format!("statedelta/{}/", self.testnet)
    }

    pub fn static_db_prefix(&self) -> String {
        format!("blockchain-data/{}/", self.testnet)
    }

    pub fn lock_key(&self) -> String {
        format!("{}{}", self.persistence_prefix(), LOCK_SUFFIX)
    }

    pub fn tip_key(&self) -> String {
        format!("{}{}", self.persistence_prefix(), TIP_SUFFIX)
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// The authoritative replica directory
    pub fn persistence_dir(&self) -> PathBuf {
        self.storage_root.join("persistence")
    }

    /// Staging directory for persistence diff archives; exists only while
    /// diffs are being applied
    pub fn persistence_diff_dir(&self) -> PathBuf {
        self.storage_root.join("persistenceDiff")
    }

    /// Extracted state-delta files
    pub fn state_delta_dir(&self) -> PathBuf {
        self.storage_root.join("StateDeltaFromS3")
    }

    /// The most recent static DB extraction
    pub fn static_db_dir(&self) -> PathBuf {
        self.storage_root.join("historical-data")
    }

    /// Map an object key to its local path under `output_root` by removing
    /// `remote_prefix`. Returns `None` when the key carries no usable
    /// relative path (wrong prefix, no filename, or path escapes).
    pub fn local_path(
        remote_prefix: &str,
        key: &str,
        output_root: &Path,
    ) -> Option<PathBuf> {
        let relative = key.strip_prefix(remote_prefix)?;
        if relative.is_empty() || relative.ends_with('/') {
            return None;
        }
        let relative = Path::new(relative);
        // Keys come from a remote catalog; refuse anything that could step
        // outside the output root.
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => return None,
            }
        }
        Some(output_root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> SyncLayout {
        SyncLayout::new("/data", "devnet")
    }

    #[test]
    fn test_remote_prefixes() {
        let l = layout();
        assert_eq!(l.persistence_prefix(), "incremental/devnet/");
        assert_eq!(l.state_delta_prefix(), "statedelta/devnet/");
        assert_eq!(l.static_db_prefix(), "blockchain-data/devnet/");
        assert_eq!(l.lock_key(), "incremental/devnet/.lock");
        assert_eq!(l.tip_key(), "incremental/devnet/.currentTxBlk");
    }

    #[test]
    fn test_local_directories() {
        let l = layout();
        assert_eq!(l.persistence_dir(), Path::new("/data/persistence"));
        assert_eq!(l.persistence_diff_dir(), Path::new("/data/persistenceDiff"));
        assert_eq!(l.state_delta_dir(), Path::new("/data/StateDeltaFromS3"));
        assert_eq!(l.static_db_dir(), Path::new("/data/historical-data"));
    }

    #[test]
    fn test_local_path_strips_prefix() {
        let path = SyncLayout::local_path(
            "incremental/devnet/",
            "incremental/devnet/persistence/txBlocks/000.db",
            Path::new("/data"),
        );
        assert_eq!(
            path,
            Some(PathBuf::from("/data/persistence/txBlocks/000.db"))
        );
    }

    #[test]
    fn test_local_path_rejects_wrong_prefix() {
        assert!(SyncLayout::local_path(
            "statedelta/devnet/",
            "incremental/devnet/persistence/a",
            Path::new("/data"),
        )
        .is_none());
    }

    #[test]
    fn test_local_path_rejects_bare_prefix_and_dirs() {
        let root = Path::new("/data");
        assert!(SyncLayout::local_path("incremental/devnet/", "incremental/devnet/", root).is_none());
        assert!(
            SyncLayout::local_path("incremental/devnet/", "incremental/devnet/dir/", root).is_none()
        );
    }

    #[test]
    fn test_local_path_rejects_escapes() {
        assert!(SyncLayout::local_path(
            "incremental/devnet/",
            "incremental/devnet/../../etc/passwd",
            Path::new("/data"),
        )
        .is_none());
    }
}
