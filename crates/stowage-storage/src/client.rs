//! Object-store client capability.
//!
//! Handlers talk to the object store only through [`ObjectClient`]. Clients must
//! be safe for concurrent use without external locking; handlers share one
//! client across all in-flight operations.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use stowage_core::HandlerConfig;

use crate::traits::StorageResult;

/// Stat result for a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Key as reported by the store.
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeBucketOptions {
    pub region: String,
    pub object_locking: bool,
}

/// Opaque object-store capability.
///
/// Missing objects and buckets are reported as `NotFound`; creating a bucket that
/// already exists is `AlreadyExists`. Everything else is a transport failure.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    async fn make_bucket(&self, bucket: &str, options: &MakeBucketOptions) -> StorageResult<()>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<ObjectInfo>;

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo>;

    async fn remove_object(&self, bucket: &str, key: &str) -> StorageResult<()>;
}

/// Builds a connection handle from handler configuration.
///
/// Implementations report bad credentials or unreachable endpoints as
/// `ConnectError`.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, config: &HandlerConfig) -> StorageResult<Arc<dyn ObjectClient>>;
}
