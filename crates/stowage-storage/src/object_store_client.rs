//! [`ObjectClient`] implementation over the `object_store` crate.
//!
//! Each bucket maps to its own store: an `InMemory` store for the memory layout,
//! or a `LocalFileSystem` rooted at `{root}/{bucket}` for the local layout.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, PutPayload};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use stowage_core::HandlerConfig;
use tokio::sync::RwLock;

use crate::client::{ClientFactory, MakeBucketOptions, ObjectClient, ObjectInfo};
use crate::traits::{StorageError, StorageResult};

type BucketStore = Arc<dyn object_store::ObjectStore>;

/// Where bucket contents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketLayout {
    Memory,
    Local { root: PathBuf },
}

/// Object client backed by `object_store` stores, one per bucket.
pub struct ObjectStoreClient {
    layout: BucketLayout,
    buckets: RwLock<HashMap<String, BucketStore>>,
}

impl ObjectStoreClient {
    pub fn new(layout: BucketLayout) -> Self {
        Self {
            layout,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(BucketLayout::Memory)
    }

    /// Buckets become directories under `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::new(BucketLayout::Local { root: root.into() })
    }

    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    fn bucket_dir(root: &std::path::Path, bucket: &str) -> StorageResult<PathBuf> {
        if bucket.is_empty() || bucket.contains('/') || bucket.contains("..") {
            return Err(StorageError::InvalidKey(format!(
                "invalid bucket name '{}'",
                bucket
            )));
        }
        Ok(root.join(bucket))
    }

    fn open_local(dir: &std::path::Path) -> StorageResult<BucketStore> {
        let store = LocalFileSystem::new_with_prefix(dir)
            .map_err(|e| StorageError::TransportError(e.to_string()))?;
        Ok(Arc::new(store))
    }

    /// Resolve the store for `bucket`, opening an existing local directory on
    /// first use.
    async fn bucket_store(&self, bucket: &str) -> StorageResult<BucketStore> {
        if let Some(store) = self.buckets.read().await.get(bucket) {
            return Ok(Arc::clone(store));
        }

        match &self.layout {
            BucketLayout::Memory => Err(StorageError::NotFound(format!("bucket {}", bucket))),
            BucketLayout::Local { root } => {
                let dir = Self::bucket_dir(root, bucket)?;
                if !tokio::fs::try_exists(&dir).await? {
                    return Err(StorageError::NotFound(format!("bucket {}", bucket)));
                }

                let mut buckets = self.buckets.write().await;
                if let Some(store) = buckets.get(bucket) {
                    return Ok(Arc::clone(store));
                }
                let store = Self::open_local(&dir)?;
                buckets.insert(bucket.to_string(), Arc::clone(&store));
                Ok(store)
            }
        }
    }
}

fn map_store_error(err: ObjectStoreError, key: &str) -> StorageError {
    match err {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
        ObjectStoreError::AlreadyExists { .. } => StorageError::AlreadyExists(key.to_string()),
        other => StorageError::TransportError(other.to_string()),
    }
}

#[async_trait]
impl ObjectClient for ObjectStoreClient {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.bucket_store(bucket).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn make_bucket(&self, bucket: &str, options: &MakeBucketOptions) -> StorageResult<()> {
        if options.object_locking {
            return Err(StorageError::Unsupported);
        }

        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(bucket) {
            return Err(StorageError::AlreadyExists(format!("bucket {}", bucket)));
        }

        let store: BucketStore = match &self.layout {
            BucketLayout::Memory => Arc::new(InMemory::new()),
            BucketLayout::Local { root } => {
                let dir = Self::bucket_dir(root, bucket)?;
                if tokio::fs::try_exists(&dir).await? {
                    return Err(StorageError::AlreadyExists(format!("bucket {}", bucket)));
                }
                tokio::fs::create_dir_all(&dir).await?;
                Self::open_local(&dir)?
            }
        };

        buckets.insert(bucket.to_string(), store);
        tracing::debug!(bucket = %bucket, region = %options.region, "Bucket created");
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> StorageResult<ObjectInfo> {
        let store = self.bucket_store(bucket).await?;
        let size = data.len() as u64;
        let location = Path::from(key.to_string());

        let result = store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(|e| map_store_error(e, key))?;

        Ok(ObjectInfo {
            key: location.to_string(),
            size,
            etag: result.e_tag,
            last_modified: Some(Utc::now()),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let store = self.bucket_store(bucket).await?;
        let location = Path::from(key.to_string());

        let result = store
            .get(&location)
            .await
            .map_err(|e| map_store_error(e, key))?;
        result.bytes().await.map_err(|e| map_store_error(e, key))
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        let store = self.bucket_store(bucket).await?;
        let location = Path::from(key.to_string());

        let meta = store
            .head(&location)
            .await
            .map_err(|e| map_store_error(e, key))?;

        Ok(ObjectInfo {
            key: meta.location.to_string(),
            size: meta.size as u64,
            etag: meta.e_tag,
            last_modified: Some(meta.last_modified),
        })
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let store = self.bucket_store(bucket).await?;
        let location = Path::from(key.to_string());

        store
            .delete(&location)
            .await
            .map_err(|e| map_store_error(e, key))
    }
}

/// [`ClientFactory`] handing out a shared [`ObjectStoreClient`].
///
/// When credentials are configured, connecting with any other key pair fails
/// with `ConnectError`.
pub struct ObjectStoreConnector {
    client: Arc<ObjectStoreClient>,
    credentials: Option<(String, String)>,
}

impl ObjectStoreConnector {
    pub fn new(client: Arc<ObjectStoreClient>) -> Self {
        Self {
            client,
            credentials: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(ObjectStoreClient::in_memory()))
    }

    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(ObjectStoreClient::local(root)))
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.credentials = Some((access_key_id.into(), secret_access_key.into()));
        self
    }

    pub fn client(&self) -> Arc<ObjectStoreClient> {
        Arc::clone(&self.client)
    }
}

impl ClientFactory for ObjectStoreConnector {
    fn connect(&self, config: &HandlerConfig) -> StorageResult<Arc<dyn ObjectClient>> {
        if let Some((ref access_key_id, ref secret_access_key)) = self.credentials {
            if config.access_key_id != *access_key_id
                || config.secret_access_key != *secret_access_key
            {
                return Err(StorageError::ConnectError(format!(
                    "access denied for key '{}' at {}",
                    config.access_key_id, config.endpoint
                )));
            }
        }

        tracing::debug!(
            endpoint = %config.endpoint,
            use_tls = config.use_tls,
            layout = ?self.client.layout(),
            "Object store client connected"
        );
        let client: Arc<dyn ObjectClient> = self.client.clone();
        Ok(client)
    }
}
