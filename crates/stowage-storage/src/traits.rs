//! Media handler abstraction trait
//!
//! This module defines the MediaHandler trait every storage backend implements,
//! and the error type shared by all storage operations.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use http::Method;
use std::pin::Pin;
use std::time::Duration;
use stowage_core::{FileRecord, Uid};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectError(String),

    #[error("Provisioning error: {0}")]
    ProvisionError(String),

    #[error("Operation not supported by this media handler")]
    Unsupported,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Size mismatch: declared {declared} bytes, read {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("Failed to delete {} object(s): {}", failed.len(), failed.join(", "))]
    PartialDelete { failed: Vec<String> },

    /// A lookup failure aborted a batch after earlier removals had failed.
    #[error("Delete aborted ({cause}) after {} failed removal(s): {}", failed.len(), failed.join(", "))]
    DeleteAborted {
        cause: Box<StorageError>,
        failed: Vec<String>,
    },

    #[error("Metadata store error: {0}")]
    MetadataError(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the caller may retry or fall back. Startup errors are fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            StorageError::ConfigError(_)
                | StorageError::ConnectError(_)
                | StorageError::ProvisionError(_)
        )
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, StorageError::Unsupported)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Byte stream returned by handlers that serve reads directly.
pub type DownloadStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// A seekable byte source for uploads. Rewound to offset 0 before reading.
pub trait UploadSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> UploadSource for T {}

/// Media handler capability interface
///
/// Every backend implements the full operation set. A backend lacking a
/// capability returns [`StorageError::Unsupported`] so the request layer keeps a
/// single call path. Initialization happens in the backend's constructor; see
/// [`crate::BucketHandler::init`].
#[async_trait]
pub trait MediaHandler: Send + Sync {
    /// Store the stream under a key derived from `record.id`.
    ///
    /// Returns the location and writes it into `record.location` once the write
    /// is confirmed. On error `record` is left untouched.
    async fn upload(
        &self,
        record: &mut FileRecord,
        source: &mut dyn UploadSource,
    ) -> StorageResult<String>;

    /// Serve a file directly from the backend.
    async fn download(&self, url: &str) -> StorageResult<(FileRecord, DownloadStream)>;

    /// Delete objects by the locations returned from [`MediaHandler::upload`].
    ///
    /// Locations are processed in order. The first lookup failure aborts the batch
    /// and later locations are left alone. If removals had already failed, the
    /// abort is reported as [`StorageError::DeleteAborted`] listing them; removal
    /// failures in a batch that runs to the end are [`StorageError::PartialDelete`].
    async fn delete(&self, locations: &[String]) -> StorageResult<()>;

    /// Issue a redirect target for `method` on `url`.
    async fn redirect(&self, method: &Method, url: &str) -> StorageResult<String>;

    /// Extract the file id from a public download URL. Returns [`Uid::ZERO`] when
    /// the URL does not belong to this handler.
    fn get_id_from_url(&self, url: &str) -> Uid;
}
