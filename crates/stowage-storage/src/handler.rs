use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use std::future::Future;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{FileRecord, HandlerConfig, Uid};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::client::{ClientFactory, ObjectClient};
use crate::keys::{location_key, object_key};
use crate::provision::ensure_bucket;
use crate::serve_url::id_from_url;
use crate::traits::{
    DownloadStream, MediaHandler, StorageError, StorageResult, UploadSource,
};

/// Content type for every stored object; the handler treats payloads as opaque.
const OBJECT_CONTENT_TYPE: &str = "application/octet-stream";

/// Media handler storing files in a single fixed bucket.
///
/// The handler has no direct read path: `download` and `redirect` report
/// `Unsupported` and callers proxy reads elsewhere.
#[derive(Clone)]
pub struct BucketHandler {
    client: Arc<dyn ObjectClient>,
    config: HandlerConfig,
}

impl BucketHandler {
    /// Parse `json_config`, connect through `factory` and provision the bucket.
    ///
    /// Safe to call on every process start; an existing bucket is reused.
    pub async fn init(json_config: &str, factory: &dyn ClientFactory) -> StorageResult<Self> {
        let config = HandlerConfig::from_json(json_config)
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;
        Self::with_config(config, factory).await
    }

    pub async fn with_config(
        config: HandlerConfig,
        factory: &dyn ClientFactory,
    ) -> StorageResult<Self> {
        config
            .validate()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let client = factory.connect(&config)?;
        let handler = BucketHandler { client, config };

        handler
            .bounded(ensure_bucket(
                handler.client.as_ref(),
                &handler.config.bucket,
                &handler.config.region,
            ))
            .await?;

        tracing::info!(
            bucket = %handler.config.bucket,
            endpoint = %handler.config.endpoint,
            use_tls = handler.config.use_tls,
            "Bucket media handler initialized"
        );

        Ok(handler)
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn serve_url(&self) -> &str {
        &self.config.serve_url
    }

    /// Apply the configured request timeout to an object-store call.
    async fn bounded<T, F>(&self, call: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        match self.config.request_timeout() {
            Some(limit) => with_timeout(limit, call).await,
            None => call.await,
        }
    }

    /// Stat `location` and remove the object under the key the store reported.
    ///
    /// Lookup failures are returned as `Err`; a failed removal is `Ok(Some(error))`.
    async fn delete_one(&self, location: &str) -> StorageResult<Option<StorageError>> {
        let bucket = &self.config.bucket;
        let key = location_key(location, bucket)?;

        let info = self
            .bounded(self.client.stat_object(bucket, &key))
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => StorageError::NotFound(location.to_string()),
                other => other,
            })?;

        match self.bounded(self.client.remove_object(bucket, &info.key)).await {
            Ok(()) => Ok(None),
            Err(e) => Ok(Some(e)),
        }
    }
}

async fn with_timeout<T, F>(limit: Duration, call: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StorageError::Timeout(limit))?
}

#[async_trait]
impl MediaHandler for BucketHandler {
    #[tracing::instrument(skip(self, record, source), fields(file_id = %record.id, size_bytes = record.size))]
    async fn upload(
        &self,
        record: &mut FileRecord,
        source: &mut dyn UploadSource,
    ) -> StorageResult<String> {
        let key = object_key(record.id)?;
        let start = std::time::Instant::now();

        source.seek(SeekFrom::Start(0)).await?;
        // One byte past the declared size is enough to detect an overlong stream.
        let mut buffer = Vec::new();
        (&mut *source)
            .take(record.size.saturating_add(1))
            .read_to_end(&mut buffer)
            .await?;

        let actual = buffer.len() as u64;
        if actual != record.size {
            tracing::error!(
                bucket = %self.config.bucket,
                key = %key,
                declared = record.size,
                actual,
                "Upload size mismatch"
            );
            return Err(StorageError::SizeMismatch {
                declared: record.size,
                actual,
            });
        }

        let info = self
            .bounded(self.client.put_object(
                &self.config.bucket,
                &key,
                Bytes::from(buffer),
                OBJECT_CONTENT_TYPE,
            ))
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.config.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object upload failed"
                );
                match e {
                    StorageError::NotFound(what) => StorageError::TransportError(format!(
                        "store rejected upload: {} not found",
                        what
                    )),
                    other => other,
                }
            })?;

        record.location = Some(key.clone());

        tracing::info!(
            bucket = %self.config.bucket,
            key = %key,
            size_bytes = info.size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object upload successful"
        );

        Ok(key)
    }

    async fn download(&self, _url: &str) -> StorageResult<(FileRecord, DownloadStream)> {
        Err(StorageError::Unsupported)
    }

    #[tracing::instrument(skip(self, locations), fields(bucket = %self.config.bucket, count = locations.len()))]
    async fn delete(&self, locations: &[String]) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let mut failed = Vec::new();

        for location in locations {
            match self.delete_one(location).await {
                Ok(None) => {
                    tracing::debug!(location = %location, "Object deleted");
                }
                Ok(Some(e)) => {
                    tracing::error!(error = %e, location = %location, "Object removal failed");
                    failed.push(location.clone());
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        location = %location,
                        removal_failures = failed.len(),
                        "Object lookup failed, aborting delete batch"
                    );
                    if failed.is_empty() {
                        return Err(e);
                    }
                    return Err(StorageError::DeleteAborted {
                        cause: Box::new(e),
                        failed,
                    });
                }
            }
        }

        if !failed.is_empty() {
            return Err(StorageError::PartialDelete { failed });
        }

        tracing::info!(
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Delete batch successful"
        );
        Ok(())
    }

    async fn redirect(&self, _method: &Method, _url: &str) -> StorageResult<String> {
        Err(StorageError::Unsupported)
    }

    fn get_id_from_url(&self, url: &str) -> Uid {
        id_from_url(url, &self.config.serve_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MakeBucketOptions, ObjectInfo};
    use crate::object_store_client::ObjectStoreConnector;
    use crate::serve_url::build_url;
    use std::io::Cursor;
    use std::sync::Mutex;

    const CONFIG: &str = r#"{
        "access_key_id": "minio",
        "secret_access_key": "minio-secret",
        "bucket": "files",
        "endpoint": "store:9000",
        "use_tls": false
    }"#;

    async fn memory_handler() -> (BucketHandler, ObjectStoreConnector) {
        let connector = ObjectStoreConnector::in_memory();
        let handler = BucketHandler::init(CONFIG, &connector).await.unwrap();
        (handler, connector)
    }

    #[tokio::test]
    async fn init_rejects_bad_config() {
        let connector = ObjectStoreConnector::in_memory();
        let err = BucketHandler::init("{}", &connector).await.err().unwrap();
        assert!(matches!(err, StorageError::ConfigError(_)));

        let err = BucketHandler::init("not json", &connector).await.err().unwrap();
        assert!(matches!(err, StorageError::ConfigError(_)));
    }

    #[tokio::test]
    async fn init_reports_connect_errors() {
        let connector = ObjectStoreConnector::in_memory().with_credentials("other", "keys");
        let err = BucketHandler::init(CONFIG, &connector).await.err().unwrap();
        assert!(matches!(err, StorageError::ConnectError(_)));
    }

    #[tokio::test]
    async fn upload_sets_location_after_write() {
        let (handler, connector) = memory_handler().await;
        let mut record = FileRecord::pending(Uid::new(0xabc123), Uid::new(1), "image/png", 5);
        let mut source = Cursor::new(b"hello".to_vec());

        let location = handler.upload(&mut record, &mut source).await.unwrap();
        assert_eq!(location, object_key(record.id).unwrap());
        assert_eq!(record.location.as_deref(), Some(location.as_str()));

        let data = connector.client().get_object("files", &location).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn upload_rewinds_the_source() {
        let (handler, connector) = memory_handler().await;
        let mut record = FileRecord::pending(Uid::new(5), Uid::new(1), "text/plain", 4);
        let mut source = Cursor::new(b"data".to_vec());
        source.set_position(3);

        let location = handler.upload(&mut record, &mut source).await.unwrap();
        let data = connector.client().get_object("files", &location).await.unwrap();
        assert_eq!(&data[..], b"data");
    }

    #[tokio::test]
    async fn size_mismatch_writes_nothing() {
        let (handler, connector) = memory_handler().await;
        let mut record = FileRecord::pending(Uid::new(9), Uid::new(1), "text/plain", 42);
        let mut source = Cursor::new(b"short".to_vec());

        let err = handler.upload(&mut record, &mut source).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::SizeMismatch {
                declared: 42,
                actual: 5
            }
        ));
        assert!(record.location.is_none());

        let key = object_key(record.id).unwrap();
        assert!(connector
            .client()
            .stat_object("files", &key)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn oversized_declaration_is_a_mismatch() {
        let (handler, connector) = memory_handler().await;
        let mut record = FileRecord::pending(Uid::new(12), Uid::new(1), "text/plain", u64::MAX);
        let mut source = Cursor::new(b"abc".to_vec());

        let err = handler.upload(&mut record, &mut source).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::SizeMismatch {
                declared: u64::MAX,
                actual: 3
            }
        ));
        assert!(record.location.is_none());

        let key = object_key(record.id).unwrap();
        assert!(connector
            .client()
            .stat_object("files", &key)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn overlong_stream_reads_one_extra_byte() {
        let (handler, _) = memory_handler().await;
        let mut record = FileRecord::pending(Uid::new(13), Uid::new(1), "text/plain", 2);
        let mut source = Cursor::new(vec![b'x'; 1024]);

        let err = handler.upload(&mut record, &mut source).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::SizeMismatch {
                declared: 2,
                actual: 3
            }
        ));
        assert_eq!(source.position(), 3);
    }

    #[tokio::test]
    async fn zero_uid_is_rejected() {
        let (handler, _) = memory_handler().await;
        let mut record = FileRecord::pending(Uid::ZERO, Uid::new(1), "text/plain", 0);
        let mut source = Cursor::new(Vec::new());
        let err = handler.upload(&mut record, &mut source).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn reupload_overwrites() {
        let (handler, connector) = memory_handler().await;
        let id = Uid::new(77);

        let mut first = FileRecord::pending(id, Uid::new(1), "text/plain", 3);
        handler.upload(&mut first, &mut Cursor::new(b"one".to_vec())).await.unwrap();
        let mut second = FileRecord::pending(id, Uid::new(1), "text/plain", 3);
        let location = handler
            .upload(&mut second, &mut Cursor::new(b"two".to_vec()))
            .await
            .unwrap();

        let data = connector.client().get_object("files", &location).await.unwrap();
        assert_eq!(&data[..], b"two");
    }

    #[tokio::test]
    async fn unsupported_operations() {
        let (handler, _) = memory_handler().await;
        for url in ["", "/v0/file/s/AQAAAAAAAAA", "https://example.com/x"] {
            let err = handler.download(url).await.err().unwrap();
            assert!(err.is_unsupported());
            for method in [Method::GET, Method::HEAD, Method::PUT] {
                let err = handler.redirect(&method, url).await.unwrap_err();
                assert!(err.is_unsupported());
            }
        }
    }

    #[tokio::test]
    async fn id_from_url_uses_serve_url() {
        let (handler, _) = memory_handler().await;
        let id = Uid::new(123456);
        let url = build_url(handler.serve_url(), id, Some("jpg"));
        assert_eq!(handler.get_id_from_url(&url), id);
        assert_eq!(handler.get_id_from_url("/elsewhere/AQAAAAAAAAA"), Uid::ZERO);
    }

    /// Wraps a real client and fails removal of selected keys.
    struct FlakyRemoval {
        inner: Arc<dyn ObjectClient>,
        fail_keys: Vec<String>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectClient for FlakyRemoval {
        async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
            self.inner.bucket_exists(bucket).await
        }

        async fn make_bucket(&self, bucket: &str, options: &MakeBucketOptions) -> StorageResult<()> {
            self.inner.make_bucket(bucket, options).await
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            data: Bytes,
            content_type: &str,
        ) -> StorageResult<ObjectInfo> {
            self.inner.put_object(bucket, key, data, content_type).await
        }

        async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
            self.inner.get_object(bucket, key).await
        }

        async fn stat_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
            self.inner.stat_object(bucket, key).await
        }

        async fn remove_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
            if self.fail_keys.iter().any(|k| k == key) {
                return Err(StorageError::TransportError("connection reset".to_string()));
            }
            self.removed.lock().unwrap().push(key.to_string());
            self.inner.remove_object(bucket, key).await
        }
    }

    struct FixedFactory(Arc<dyn ObjectClient>);

    impl ClientFactory for FixedFactory {
        fn connect(&self, _config: &HandlerConfig) -> StorageResult<Arc<dyn ObjectClient>> {
            Ok(Arc::clone(&self.0))
        }
    }

    #[tokio::test]
    async fn removal_failures_are_reported() {
        let connector = ObjectStoreConnector::in_memory();
        let fail_key = object_key(Uid::new(2)).unwrap();
        let flaky = Arc::new(FlakyRemoval {
            inner: connector.client(),
            fail_keys: vec![fail_key.clone()],
            removed: Mutex::new(Vec::new()),
        });
        let handler = BucketHandler::init(CONFIG, &FixedFactory(flaky.clone()))
            .await
            .unwrap();

        let mut locations = Vec::new();
        for id in 1..=3u64 {
            let mut record = FileRecord::pending(Uid::new(id), Uid::new(1), "text/plain", 1);
            locations.push(
                handler
                    .upload(&mut record, &mut Cursor::new(vec![b'x']))
                    .await
                    .unwrap(),
            );
        }

        let err = handler.delete(&locations).await.unwrap_err();
        match err {
            StorageError::PartialDelete { failed } => assert_eq!(failed, vec![fail_key.clone()]),
            other => panic!("expected PartialDelete, got {other:?}"),
        }

        // Removal continued past the failure.
        let removed = flaky.removed.lock().unwrap().clone();
        assert_eq!(removed, vec![locations[0].clone(), locations[2].clone()]);
    }

    #[tokio::test]
    async fn abort_carries_earlier_removal_failures() {
        let connector = ObjectStoreConnector::in_memory();
        let fail_key = object_key(Uid::new(1)).unwrap();
        let flaky = Arc::new(FlakyRemoval {
            inner: connector.client(),
            fail_keys: vec![fail_key.clone()],
            removed: Mutex::new(Vec::new()),
        });
        let handler = BucketHandler::init(CONFIG, &FixedFactory(flaky.clone()))
            .await
            .unwrap();

        let mut first = FileRecord::pending(Uid::new(1), Uid::new(1), "text/plain", 1);
        let first = handler
            .upload(&mut first, &mut Cursor::new(vec![b'x']))
            .await
            .unwrap();
        let missing = object_key(Uid::new(2)).unwrap();

        let err = handler
            .delete(&[first.clone(), missing.clone()])
            .await
            .unwrap_err();
        match err {
            StorageError::DeleteAborted { cause, failed } => {
                assert!(matches!(*cause, StorageError::NotFound(ref at) if *at == missing));
                assert_eq!(failed, vec![first.clone()]);
            }
            other => panic!("expected DeleteAborted, got {other:?}"),
        }

        // The object whose removal failed is still stored.
        assert!(connector.client().stat_object("files", &first).await.is_ok());
    }

    #[tokio::test]
    async fn delete_uses_key_confirmed_by_stat() {
        let (handler, connector) = memory_handler().await;
        let mut record = FileRecord::pending(Uid::new(11), Uid::new(1), "text/plain", 1);
        let location = handler
            .upload(&mut record, &mut Cursor::new(vec![b'x']))
            .await
            .unwrap();

        handler
            .delete(&[format!(" /files/{} ", location)])
            .await
            .unwrap();
        assert!(connector
            .client()
            .stat_object("files", &location)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn invalid_location_aborts() {
        let (handler, _) = memory_handler().await;
        let err = handler.delete(&["../x".to_string()]).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn request_timeout_applies() {
        let limit = Duration::from_millis(10);
        let err = with_timeout(limit, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), StorageError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Timeout(d) if d == limit));
        assert!(err.is_recoverable());
    }
}
