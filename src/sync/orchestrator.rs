//! Sync Orchestrator
//!
//! The state machine that brings the local replica up to the remote tip:
//!
//! ```text
//! INIT → STATIC_DB → AWAIT_PRODUCER → SNAPSHOT → CHECK_TIP
//!              ↑            ↑  ↓ (lock / torn tip)   │
//!              │            └──┘       DONE ←────────┤ tip unchanged
//!              │                      DIFFS ←────────┤ tip advanced, same DS epoch
//!              │                        │    FATAL ←─┘ tip regressed / unreadable
//!              └────────────────────────┘ (back through AWAIT_PRODUCER)
//! ```
//!
//! Within SNAPSHOT the barriers are asymmetric: persistence objects are
//! plain files and keep downloading while the state-delta batch is joined
//! and extracted; only then is the persistence batch joined. The
//! orchestrator runs on one supervisory task and owns the storage root for
//! the whole run; workers write to disjoint paths.

use crate::sync::bucket::{BucketClient, ObjectRef};
use crate::sync::config::SyncConfig;
use crate::sync::extract::extract_archives;
use crate::sync::fetch::{fetch_object, FetchRequest};
use crate::sync::filter::{DiffMatcher, ListingFilter};
use crate::sync::layout::SyncLayout;
use crate::sync::merge::merge_staged_dirs;
use crate::sync::pool::{succeeded, DownloadSet, WorkerPool};
use crate::sync::rendezvous::ProducerRendezvous;
use std::io::Error as IoError;
use std::path::Path;
use tracing::{error, info, warn};

/// Unrecoverable failures; everything else is logged and retried or
/// skipped per object
#[derive(Debug)]
pub enum SyncError {
    /// The tip sentinel could not be read after a snapshot completed
    TipUnreadable,
    /// The remote tip moved backwards across a snapshot
    TipRegression { start: u64, current: u64 },
    /// Filesystem or listing failure the run cannot continue through
    Io(IoError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::TipUnreadable => {
                write!(f, "Tx block sentinel unreadable after snapshot")
            }
            SyncError::TipRegression { start, current } => write!(
                f,
                "Remote tip went backwards across a snapshot: {} -> {}",
                start, current
            ),
            SyncError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<IoError> for SyncError {
    fn from(e: IoError) -> Self {
        SyncError::Io(e)
    }
}

/// True iff applying diffs from `start_tip` to `new_tip` would cross a
/// DS-epoch boundary, where the remote rotates its full snapshot. With no
/// epoch length configured the rotation cannot be detected, so every tip
/// advance is treated as one and forces a fresh snapshot.
pub fn ds_epoch_rotated(start_tip: u64, new_tip: u64, epoch_length: Option<u64>) -> bool {
    match epoch_length {
        Some(length) if length > 0 => new_tip / length != start_tip / length,
        _ => true,
    }
}

/// Owns one synchronization run against a remote bucket
pub struct Synchronizer<C> {
    client: C,
    config: SyncConfig,
    layout: SyncLayout,
    rendezvous: ProducerRendezvous<C>,
    pool: WorkerPool,
}

impl<C: BucketClient + Clone> Synchronizer<C> {
    pub fn new(client: C, config: SyncConfig) -> Self {
        let layout = SyncLayout::new(&config.storage_root, config.testnet.clone());
        let rendezvous = ProducerRendezvous::new(client.clone(), &layout);
        let pool = WorkerPool::new(config.download_workers);
        Synchronizer {
            client,
            config,
            layout,
            rendezvous,
            pool,
        }
    }

    /// Run to completion: returns once the replica matches the tip
    /// observed at the start of the most recent snapshot, or with the
    /// first unrecoverable error
    pub async fn run(&self) -> Result<(), SyncError> {
        self.hydrate_static_db().await?;

        loop {
            let start_tip = self.await_producer().await;
            info!("Current Tx block: {}", start_tip);

            self.download_snapshot().await?;

            let new_tip = self
                .rendezvous
                .current_tx_blk()
                .await
                .ok_or(SyncError::TipUnreadable)?;

            if new_tip < start_tip {
                error!(
                    "Tip regressed from {} to {} during snapshot",
                    start_tip, new_tip
                );
                return Err(SyncError::TipRegression {
                    start: start_tip,
                    current: new_tip,
                });
            }

            if new_tip == start_tip {
                info!("Replica is up to date at Tx block {}", new_tip);
                return Ok(());
            }

            if ds_epoch_rotated(start_tip, new_tip, self.config.ds_epoch_length) {
                info!(
                    "Tip advanced {} -> {} across a DS epoch; restarting from a fresh snapshot",
                    start_tip, new_tip
                );
                continue;
            }

            self.apply_diffs(start_tip + 1, new_tip + 1).await?;
        }
    }

    /// Block until the producer is quiescent and the tip sentinel parses;
    /// returns the observed tip
    async fn await_producer(&self) -> u64 {
        loop {
            if self.rendezvous.is_upload_ongoing().await {
                info!("Waiting for persistence upload to finish...");
                tokio::time::sleep(self.config.wait_interval).await;
                continue;
            }
            match self.rendezvous.current_tx_blk().await {
                Some(tip) => return tip,
                None => {
                    warn!("No current Tx block found...");
                    tokio::time::sleep(self.config.wait_interval).await;
                }
            }
        }
    }

    /// Fetch and unpack the static history archive. A missing or
    /// unlistable archive leaves the directory empty; the replica can
    /// still serve from incremental persistence.
    async fn hydrate_static_db(&self) -> Result<(), SyncError> {
        let static_dir = self.layout.static_db_dir();
        let prefix = self.layout.static_db_prefix();

        let objects = match self.client.list(&prefix).await {
            Ok(objects) => objects,
            Err(e) => {
                warn!("Can't list static DB under {}: {}; skipping", prefix, e);
                return Ok(());
            }
        };
        if objects.is_empty() {
            info!("No static DB published under {}", prefix);
            return Ok(());
        }

        let _ = tokio::fs::remove_dir_all(&static_dir).await;
        tokio::fs::create_dir_all(&static_dir).await?;

        info!("Downloading {} static DB object(s)", objects.len());
        let batch = self.dispatch(objects, &prefix, &static_dir);
        let results = batch.join().await;
        info!(
            "Static DB: {} of {} objects fetched",
            succeeded(&results),
            results.len()
        );

        let stats = extract_archives(&static_dir, &static_dir).await?;
        info!(
            "Static DB: {} archive(s) extracted, {} failed",
            stats.extracted, stats.failed
        );
        Ok(())
    }

    /// Full snapshot: destructive pre-clean, then overlapped persistence
    /// and state-delta downloads with the state-delta join and extraction
    /// first
    async fn download_snapshot(&self) -> Result<(), SyncError> {
        let persistence_dir = self.layout.persistence_dir();
        let diff_dir = self.layout.persistence_diff_dir();
        let delta_dir = self.layout.state_delta_dir();

        let _ = tokio::fs::remove_dir_all(&persistence_dir).await;
        let _ = tokio::fs::remove_dir_all(&diff_dir).await;
        tokio::fs::create_dir_all(self.layout.storage_root()).await?;

        let filter = ListingFilter {
            include_diffs: false,
            exclude_micro_blocks: self.config.exclude_micro_blocks,
        };

        let persistence_prefix = self.layout.persistence_prefix();
        let objects = filter.apply(self.client.list(&persistence_prefix).await?);
        info!("Downloading {} persistence object(s)", objects.len());
        let persistence_batch =
            self.dispatch(objects, &persistence_prefix, self.layout.storage_root());

        let _ = tokio::fs::remove_dir_all(&delta_dir).await;
        tokio::fs::create_dir_all(&delta_dir).await?;

        let delta_prefix = self.layout.state_delta_prefix();
        let deltas = filter.apply(self.client.list(&delta_prefix).await?);
        info!("Downloading {} state delta object(s)", deltas.len());
        let delta_batch = self.dispatch(deltas, &delta_prefix, &delta_dir);

        // State deltas are archives and must all be on disk before the
        // serial extraction pass; persistence files keep streaming in
        // underneath it.
        let delta_results = delta_batch.join().await;
        info!(
            "State deltas: {} of {} objects fetched",
            succeeded(&delta_results),
            delta_results.len()
        );
        let stats = extract_archives(&delta_dir, &delta_dir).await?;
        info!(
            "State deltas: {} archive(s) extracted, {} failed",
            stats.extracted, stats.failed
        );

        let persistence_results = persistence_batch.join().await;
        info!(
            "Persistence: {} of {} objects fetched",
            succeeded(&persistence_results),
            persistence_results.len()
        );
        Ok(())
    }

    /// Apply persistence and state-delta diffs for tx blocks in
    /// `[from, to)`
    async fn apply_diffs(&self, from: u64, to: u64) -> Result<(), SyncError> {
        info!("Applying diffs for Tx blocks [{}, {})", from, to);
        let filter = ListingFilter {
            include_diffs: true,
            exclude_micro_blocks: self.config.exclude_micro_blocks,
        };

        // Persistence diffs: stage, extract, merge into the live replica.
        let diff_dir = self.layout.persistence_diff_dir();
        tokio::fs::create_dir_all(&diff_dir).await?;

        let persistence_prefix = self.layout.persistence_prefix();
        let matcher = DiffMatcher::new("diff_persistence_", from, to);
        let diffs = matcher.apply(filter.apply(self.client.list(&persistence_prefix).await?));
        info!("Downloading {} persistence diff archive(s)", diffs.len());
        let batch = self.dispatch(diffs, &persistence_prefix, &diff_dir);
        let results = batch.join().await;
        info!(
            "Persistence diffs: {} of {} fetched",
            succeeded(&results),
            results.len()
        );

        extract_archives(&diff_dir, &diff_dir).await?;
        merge_staged_dirs(&diff_dir, &self.layout.persistence_dir()).await?;

        // State-delta diffs: download and extract in place, no merge step.
        let delta_dir = self.layout.state_delta_dir();
        tokio::fs::create_dir_all(&delta_dir).await?;

        let delta_prefix = self.layout.state_delta_prefix();
        let matcher = DiffMatcher::new("stateDelta_", from, to);
        let deltas = matcher.apply(filter.apply(self.client.list(&delta_prefix).await?));
        info!("Downloading {} state delta diff archive(s)", deltas.len());
        let batch = self.dispatch(deltas, &delta_prefix, &delta_dir);
        let results = batch.join().await;
        info!(
            "State delta diffs: {} of {} fetched",
            succeeded(&results),
            results.len()
        );

        extract_archives(&delta_dir, &delta_dir).await?;
        Ok(())
    }

    /// Submit one download task per object; the returned set is the
    /// phase's join point
    fn dispatch(&self, objects: Vec<ObjectRef>, remote_prefix: &str, output_root: &Path) -> DownloadSet {
        let mut set = DownloadSet::new();
        for object in objects {
            let request = FetchRequest {
                bucket: self.config.bucket.clone(),
                object,
                remote_prefix: remote_prefix.to_string(),
                output_root: output_root.to_path_buf(),
            };
            // The client handle is cloned into the task; it is thread-safe
            // by contract.
            let client = self.client.clone();
            set.push(
                self.pool
                    .submit(self.config.bucket.clone(), fetch_object(client, request)),
            );
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_predicate() {
        // L = 10: 17 and 23 sit in different epochs, 17 and 19 in the same.
        assert!(ds_epoch_rotated(17, 23, Some(10)));
        assert!(!ds_epoch_rotated(17, 19, Some(10)));
        assert!(!ds_epoch_rotated(17, 17, Some(10)));
        assert!(ds_epoch_rotated(99, 101, Some(100)));
        assert!(!ds_epoch_rotated(100, 102, Some(1000)));
    }

    #[test]
    fn test_rotation_without_epoch_length_is_always_true() {
        assert!(ds_epoch_rotated(100, 101, None));
        assert!(ds_epoch_rotated(100, 101, Some(0)));
    }

    #[test]
    fn test_sync_error_display() {
        let e = SyncError::TipRegression {
            start: 100,
            current: 99,
        };
        assert!(e.to_string().contains("100 -> 99"));
    }
}
