//! Object-Store Client Abstraction
//!
//! Provides a trait-based abstraction over the remote bucket holding the
//! persistence objects.
//!
//! Implementations:
//! - `InMemoryBucket`: for unit tests and end-to-end scenarios
//! - `GcsBucket`: for production (feature-gated, see `gcs.rs`)
//!
//! The client is thread-safe by contract; workers receive a cheap handle
//! clone and own their cursor.

use crate::sync::checksum;
use bytes::Bytes;
use futures::Stream;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// A stream of object bytes, delivered in chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = IoResult<Bytes>> + Send>>;

/// A listed remote object and its server-advertised integrity tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Full object key
    pub key: String,
    /// Base64-encoded CRC32C of the object contents
    pub crc32c_b64: String,
}

/// Capability trait over the remote bucket
pub trait BucketClient: Send + Sync + 'static {
    /// Probe an object's existence without downloading it
    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>>;

    /// Open a streaming read over an object's contents
    fn read<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<ByteStream>> + Send + 'a>>;

    /// List objects under a key prefix
    fn list<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<ObjectRef>>> + Send + 'a>>;
}

// ============================================================================
// InMemoryBucket - for tests
// ============================================================================

/// A stored object. `versions` holds successive payloads; reads serve the
/// front and pop it once a newer version is queued behind it, which lets
/// tests script sentinel advancement across rendezvous probes.
#[derive(Debug, Clone)]
struct StoredObject {
    versions: VecDeque<Vec<u8>>,
    tag_override: Option<String>,
}

impl StoredObject {
    fn current(&self) -> &[u8] {
        self.versions.front().map(Vec::as_slice).unwrap_or(&[])
    }

    fn tag(&self) -> String {
        match &self.tag_override {
            Some(tag) => tag.clone(),
            None => checksum::encode_server_tag(crc32c::crc32c(self.current())),
        }
    }
}

#[derive(Debug, Default)]
struct BucketInner {
    objects: HashMap<String, StoredObject>,
    /// Keys that report present for N more probes, then vanish
    vanish_after: HashMap<String, u32>,
    read_counts: HashMap<String, u64>,
    probe_counts: HashMap<String, u64>,
    read_delay: Option<Duration>,
    chunk_size: usize,
}

/// In-memory bucket for unit tests and end-to-end scenarios
#[derive(Debug)]
pub struct InMemoryBucket {
    inner: Arc<RwLock<BucketInner>>,
}

impl InMemoryBucket {
    pub fn new() -> Self {
        InMemoryBucket {
            inner: Arc::new(RwLock::new(BucketInner {
                chunk_size: crate::sync::config::FILE_CHUNK_SIZE_BYTES,
                ..BucketInner::default()
            })),
        }
    }

    /// Store an object; the server tag is computed from the payload
    pub fn put(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        let mut inner = self.inner.write();
        inner.objects.insert(
            key.into(),
            StoredObject {
                versions: VecDeque::from([data.into()]),
                tag_override: None,
            },
        );
    }

    /// Store successive payload versions for a key. Each read serves the
    /// oldest remaining version; the last version persists. (for testing)
    pub fn put_versions(&self, key: impl Into<String>, versions: Vec<Vec<u8>>) {
        let mut inner = self.inner.write();
        inner.objects.insert(
            key.into(),
            StoredObject {
                versions: VecDeque::from(versions),
                tag_override: None,
            },
        );
    }

    /// Remove an object (for testing)
    pub fn remove(&self, key: &str) {
        self.inner.write().objects.remove(key);
    }

    /// Flip one bit in the stored payload while keeping the tag of the
    /// pristine payload advertised (for testing integrity rejection)
    pub fn corrupt_data(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(obj) = inner.objects.get_mut(key) {
            obj.tag_override = Some(checksum::encode_server_tag(crc32c::crc32c(obj.current())));
            if let Some(first) = obj.versions.front_mut().and_then(|v| v.first_mut()) {
                *first ^= 0x01;
            }
        }
    }

    /// Advertise a tag that cannot match the stored payload (for testing)
    pub fn corrupt_tag(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(obj) = inner.objects.get_mut(key) {
            let crc = crc32c::crc32c(obj.current());
            obj.tag_override = Some(checksum::encode_server_tag(crc ^ 1));
        }
    }

    /// Make `exists(key)` report present for the next `probes` calls and
    /// absent afterwards, regardless of stored objects (for testing the
    /// producer lock sentinel)
    pub fn clear_after_probes(&self, key: impl Into<String>, probes: u32) {
        self.inner.write().vanish_after.insert(key.into(), probes);
    }

    /// Delay every read by `delay` (for testing barrier ordering)
    pub fn set_read_delay(&self, delay: Duration) {
        self.inner.write().read_delay = Some(delay);
    }

    /// Chunk size for streamed reads (for testing)
    pub fn set_chunk_size(&self, chunk_size: usize) {
        self.inner.write().chunk_size = chunk_size.max(1);
    }

    /// How many times an object was read (for testing)
    pub fn read_count(&self, key: &str) -> u64 {
        self.inner.read().read_counts.get(key).copied().unwrap_or(0)
    }

    /// How many times an object's existence was probed (for testing)
    pub fn probe_count(&self, key: &str) -> u64 {
        self.inner
            .read()
            .probe_counts
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for InMemoryBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryBucket {
    fn clone(&self) -> Self {
        InMemoryBucket {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl BucketClient for InMemoryBucket {
    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            let mut inner = self.inner.write();
            *inner.probe_counts.entry(key.to_string()).or_insert(0) += 1;
            if let Some(remaining) = inner.vanish_after.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(true);
                }
                inner.vanish_after.remove(key);
                inner.objects.remove(key);
                return Ok(false);
            }
            Ok(inner.objects.contains_key(key))
        })
    }

    fn read<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<ByteStream>> + Send + 'a>> {
        Box::pin(async move {
            let delay = self.inner.read().read_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let (data, chunk_size) = {
                let mut inner = self.inner.write();
                *inner.read_counts.entry(key.to_string()).or_insert(0) += 1;
                let chunk_size = inner.chunk_size;
                let obj = inner.objects.get_mut(key).ok_or_else(|| {
                    IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key))
                })?;
                let data = obj.current().to_vec();
                if obj.versions.len() > 1 {
                    obj.versions.pop_front();
                }
                (data, chunk_size)
            };

            let chunks: Vec<IoResult<Bytes>> = data
                .chunks(chunk_size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let stream: ByteStream = Box::pin(futures::stream::iter(chunks));
            Ok(stream)
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<ObjectRef>>> + Send + 'a>> {
        Box::pin(async move {
            let inner = self.inner.read();
            let mut refs: Vec<ObjectRef> = inner
                .objects
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, obj)| ObjectRef {
                    key: k.clone(),
                    crc32c_b64: obj.tag(),
                })
                .collect();

            // Sort by key for consistent ordering
            refs.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(refs)
        })
    }
}
