//! Persistence Synchronization
//!
//! Maintains a local replica of a chain node's persistence by syncing
//! against a remote bucket: full snapshots, per-block state deltas, diff
//! archives between snapshots, and a periodic static history archive.
//!
//! ## Architecture
//!
//! ```text
//! Rendezvous (.lock / .currentTxBlk)
//!      ↓ gate
//! List → Filter → WorkerPool ⇒ (read → CRC32C → file) × N
//!                     ↓ barrier
//!                 Extractor → Merger
//! ```
//!
//! ## Key Properties
//!
//! - **Verified replica**: every file is checked against the server's
//!   CRC32C tag while it streams; mismatches are unlinked
//! - **Non-fatal workers**: a failed object is skipped and re-attempted
//!   on the next snapshot cycle
//! - **Rotation-aware**: diffs are never applied across a DS-epoch
//!   snapshot rotation

pub mod bucket;
pub mod checksum;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod filter;
#[cfg(feature = "gcs")]
pub mod gcs;
pub mod layout;
pub mod merge;
pub mod orchestrator;
pub mod pool;
pub mod rendezvous;

pub use bucket::{BucketClient, ByteStream, InMemoryBucket, ObjectRef};
pub use checksum::{encode_server_tag, matches_server_tag, Crc32cAccumulator};
pub use config::{
    SyncConfig, DEFAULT_DOWNLOAD_WORKERS, DEFAULT_UPLOAD_WORKERS, FILE_CHUNK_SIZE_BYTES,
    WAIT_INTERVAL,
};
pub use extract::{extract_archives, ExtractStats};
pub use fetch::{fetch_object, FetchRequest};
pub use filter::{DiffMatcher, ListingFilter, EXCLUDED_CONTENT_CLASSES};
#[cfg(feature = "gcs")]
pub use gcs::GcsBucket;
pub use layout::SyncLayout;
pub use merge::merge_staged_dirs;
pub use orchestrator::{ds_epoch_rotated, SyncError, Synchronizer};
pub use pool::{DownloadSet, FetchHandle, FetchResult, WorkerPool};
pub use rendezvous::{parse_tx_blk, ProducerRendezvous};
