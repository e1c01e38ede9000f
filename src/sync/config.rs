//! Configuration for Persistence Synchronization
//!
//! Defines the configuration struct for a sync run and the constants the
//! download pipeline is tuned with.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default worker count for the download pool.
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 50;

/// Default worker count for the upload pool (producer side).
pub const DEFAULT_UPLOAD_WORKERS: usize = 10;

/// Chunk size for streaming object reads (512 KiB).
pub const FILE_CHUNK_SIZE_BYTES: usize = 512 * 1024;

/// Interval between producer rendezvous probes.
pub const WAIT_INTERVAL: Duration = Duration::from_secs(2);

/// Main configuration for a synchronization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root directory the replica is maintained under
    pub storage_root: PathBuf,
    /// Remote bucket name
    pub bucket: String,
    /// Testnet name (namespaces every remote prefix)
    pub testnet: String,
    /// Drop micro-block content classes from persistence listings
    pub exclude_micro_blocks: bool,
    /// Number of parallel download workers
    pub download_workers: usize,
    /// Tx blocks per DS epoch (`NUM_DSBLOCK * NUM_FINAL_BLOCK_PER_POW`).
    /// When unset, every tip advance forces a fresh snapshot instead of
    /// applying diffs, since a snapshot rotation cannot be detected.
    pub ds_epoch_length: Option<u64>,
    /// Sleep between rendezvous probes
    #[serde(with = "duration_millis")]
    pub wait_interval: Duration,
    /// Streaming read chunk size in bytes
    pub chunk_size: usize,
}

impl SyncConfig {
    /// Create a config with production defaults
    pub fn new(
        storage_root: impl Into<PathBuf>,
        bucket: impl Into<String>,
        testnet: impl Into<String>,
    ) -> Self {
        SyncConfig {
            storage_root: storage_root.into(),
            bucket: bucket.into(),
            testnet: testnet.into(),
            exclude_micro_blocks: false,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            ds_epoch_length: None,
            wait_interval: WAIT_INTERVAL,
            chunk_size: FILE_CHUNK_SIZE_BYTES,
        }
    }

    /// Configuration for tests (small pool, fast probe interval)
    pub fn test(
        storage_root: impl Into<PathBuf>,
        bucket: impl Into<String>,
        testnet: impl Into<String>,
    ) -> Self {
        SyncConfig {
            download_workers: 4,
            wait_interval: Duration::from_millis(10),
            ..SyncConfig::new(storage_root, bucket, testnet)
        }
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
