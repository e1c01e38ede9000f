//! Per-Object Download Worker
//!
//! Streams one remote object to its local path while accumulating the
//! CRC32C, then verifies against the server tag. Every failure is
//! per-object: the worker logs, discards whatever it wrote, and reports
//! `local_path = None`. The phase barrier is the integrity gate; the next
//! snapshot cycle re-attempts anything that was skipped.

use crate::sync::bucket::{BucketClient, ObjectRef};
use crate::sync::checksum::Crc32cAccumulator;
use crate::sync::layout::SyncLayout;
use crate::sync::pool::FetchResult;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Everything one worker needs; owned by the task closure
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub bucket: String,
    pub object: ObjectRef,
    /// Remote prefix stripped from the key to derive the local path
    pub remote_prefix: String,
    pub output_root: PathBuf,
}

/// Download and verify a single object
pub async fn fetch_object<C: BucketClient>(client: C, request: FetchRequest) -> FetchResult {
    let FetchRequest {
        bucket,
        object,
        remote_prefix,
        output_root,
    } = request;

    let Some(local_path) = SyncLayout::local_path(&remote_prefix, &object.key, &output_root)
    else {
        warn!(
            "Can't infer local path for {} in bucket {}; skipping...",
            object.key, bucket
        );
        return FetchResult::failed(bucket);
    };

    let mut stream = match client.read(&object.key).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(
                "Can't download bucket object ({}) in {}: {}; skipping...",
                object.key, bucket, e
            );
            return FetchResult::failed(bucket);
        }
    };

    if let Some(parent) = local_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!(
                "Can't create {} for {}: {}; skipping...",
                parent.display(),
                object.key,
                e
            );
            return FetchResult::failed(bucket);
        }
    }

    let mut file = match tokio::fs::File::create(&local_path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(
                "Can't open {} for writing: {}; skipping...",
                local_path.display(),
                e
            );
            return FetchResult::failed(bucket);
        }
    };

    let mut crc = Crc32cAccumulator::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Read of {} failed mid-stream: {}; skipping...", object.key, e);
                drop(file);
                discard(&local_path).await;
                return FetchResult::failed(bucket);
            }
        };
        crc.update(&chunk);
        if let Err(e) = file.write_all(&chunk).await {
            warn!(
                "Write to {} failed: {}; skipping...",
                local_path.display(),
                e
            );
            drop(file);
            discard(&local_path).await;
            return FetchResult::failed(bucket);
        }
    }

    if let Err(e) = file.flush().await {
        warn!("Flush of {} failed: {}; skipping...", local_path.display(), e);
        drop(file);
        discard(&local_path).await;
        return FetchResult::failed(bucket);
    }
    drop(file);

    if !crc.matches(&object.crc32c_b64) {
        warn!(
            "CRC32C mismatch for {} in {}; skipping...",
            object.key, bucket
        );
        // Keep the replica free of unverified bytes.
        discard(&local_path).await;
        return FetchResult::failed(bucket);
    }

    FetchResult {
        bucket,
        local_path: Some(local_path),
    }
}

async fn discard(path: &PathBuf) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Can't remove discarded file {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::bucket::InMemoryBucket;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "fetch-test-{}-{}",
            tag,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system time before Unix epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn request(key: &str, tag: &str, root: &PathBuf) -> FetchRequest {
        FetchRequest {
            bucket: "b".to_string(),
            object: ObjectRef {
                key: key.to_string(),
                crc32c_b64: tag.to_string(),
            },
            remote_prefix: "incremental/net/".to_string(),
            output_root: root.clone(),
        }
    }

    #[tokio::test]
    async fn test_fetch_writes_verified_file() {
        let bucket = InMemoryBucket::new();
        bucket.set_chunk_size(4);
        bucket.put("incremental/net/persistence/a", b"persisted bytes".to_vec());
        let listed = bucket.list("incremental/net/").await.unwrap();
        let root = temp_root("ok");

        let result = fetch_object(
            bucket.clone(),
            request(&listed[0].key, &listed[0].crc32c_b64, &root),
        )
        .await;

        let path = result.local_path.expect("fetch should succeed");
        assert_eq!(path, root.join("persistence/a"));
        assert_eq!(std::fs::read(&path).unwrap(), b"persisted bytes");

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_mismatch_unlinks_partial_file() {
        let bucket = InMemoryBucket::new();
        bucket.put("incremental/net/persistence/a", b"payload".to_vec());
        bucket.corrupt_tag("incremental/net/persistence/a");
        let listed = bucket.list("incremental/net/").await.unwrap();
        let root = temp_root("crc");

        let result = fetch_object(
            bucket.clone(),
            request(&listed[0].key, &listed[0].crc32c_b64, &root),
        )
        .await;

        assert!(result.local_path.is_none());
        assert!(!root.join("persistence/a").exists());

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_missing_object_creates_no_file() {
        let bucket = InMemoryBucket::new();
        let root = temp_root("missing");

        let result = fetch_object(
            bucket.clone(),
            request("incremental/net/persistence/gone", "AAAAAA==", &root),
        )
        .await;

        assert!(result.local_path.is_none());
        assert!(!root.join("persistence/gone").exists());

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn test_unmappable_key_is_skipped() {
        let bucket = InMemoryBucket::new();
        bucket.put("incremental/net/", b"".to_vec());
        let root = temp_root("unmappable");

        let result = fetch_object(bucket.clone(), request("incremental/net/", "", &root)).await;
        assert!(result.local_path.is_none());

        std::fs::remove_dir_all(&root).ok();
    }
}
