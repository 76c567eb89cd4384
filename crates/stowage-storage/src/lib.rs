//! Stowage Storage Library
//!
//! This crate provides the media handler abstraction and the bucket-backed
//! handler that stores uploaded files in an object store.
//!
//! # Object key format
//!
//! Every file lives at a single key in one fixed bucket: the lowercase base32 form
//! of its identifier (`Uid::to_base32`). The key doubles as the location recorded
//! in the file's metadata. Keys are flat, never empty, and never contain `/`.
//!
//! Objects are reached through the [`ObjectClient`] capability. The
//! [`ObjectStoreClient`] implementation keeps buckets in memory or under a local
//! directory via the `object_store` crate.

pub mod client;
pub mod gc;
pub mod handler;
pub mod keys;
pub mod lifecycle;
pub mod metadata;
pub mod object_store_client;
pub mod provision;
pub mod registry;
pub mod serve_url;
pub mod traits;

// Re-export commonly used types
pub use client::{ClientFactory, MakeBucketOptions, ObjectClient, ObjectInfo};
pub use gc::GarbageCollector;
pub use handler::BucketHandler;
pub use keys::{location_key, object_key};
pub use lifecycle::{attach_file, upload_file};
pub use metadata::{get_file_record, FileStore, MemoryFileStore};
pub use object_store_client::{BucketLayout, ObjectStoreClient, ObjectStoreConnector};
pub use provision::ensure_bucket;
pub use registry::{create_handler, HandlerRegistry};
pub use serve_url::{build_url, id_from_url};
pub use traits::{DownloadStream, MediaHandler, StorageError, StorageResult, UploadSource};
