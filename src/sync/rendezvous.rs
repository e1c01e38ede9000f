//! Producer Rendezvous
//!
//! The uploader and this downloader coordinate through two sentinel
//! objects: `<prefix>.lock` (present while an upload is in flight) and
//! `<prefix>.currentTxBlk` (the tip tx block number as plain decimal
//! text). The sentinel is produced by a separate writer and may be torn,
//! so parsing is strict: anything but an unsigned decimal surrounded by
//! optional whitespace yields "no value" and the caller retries.

use crate::sync::bucket::BucketClient;
use crate::sync::layout::SyncLayout;
use futures::StreamExt;

/// Probes the producer's sentinel objects
#[derive(Debug, Clone)]
pub struct ProducerRendezvous<C> {
    client: C,
    lock_key: String,
    tip_key: String,
}

impl<C: BucketClient + Clone> ProducerRendezvous<C> {
    pub fn new(client: C, layout: &SyncLayout) -> Self {
        ProducerRendezvous {
            client,
            lock_key: layout.lock_key(),
            tip_key: layout.tip_key(),
        }
    }

    /// True iff the lock sentinel is present. Probe errors mean "absent":
    /// only a positive confirmation blocks the sync.
    pub async fn is_upload_ongoing(&self) -> bool {
        self.client.exists(&self.lock_key).await.unwrap_or(false)
    }

    /// Read and strictly parse the tip sentinel
    pub async fn current_tx_blk(&self) -> Option<u64> {
        let mut stream = self.client.read(&self.tip_key).await.ok()?;
        let mut raw = Vec::new();
        while let Some(chunk) = stream.next().await {
            raw.extend_from_slice(&chunk.ok()?);
        }
        parse_tx_blk(std::str::from_utf8(&raw).ok()?)
    }
}

/// Parse an unsigned decimal tx block number. Surrounding whitespace is
/// tolerated; a sign, trailing garbage, or an empty value is not.
pub fn parse_tx_blk(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}
