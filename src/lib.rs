pub mod sync;

pub use sync::{
    BucketClient, FetchResult, InMemoryBucket, ObjectRef, SyncConfig, SyncError, Synchronizer,
};
#[cfg(feature = "gcs")]
pub use sync::GcsBucket;
