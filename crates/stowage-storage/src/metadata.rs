//! File metadata store interface and lookup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use stowage_core::{FileRecord, FileStatus, Uid};
use tokio::sync::RwLock;

use crate::traits::{StorageError, StorageResult};

/// Persistent store of [`FileRecord`]s, keyed by id.
///
/// Transport failures surface as `MetadataError`. Absence from `get` is `Ok(None)`,
/// never an error.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get(&self, id: Uid) -> StorageResult<Option<FileRecord>>;

    /// `AlreadyExists` when a record with the same id is present.
    async fn insert(&self, record: &FileRecord) -> StorageResult<()>;

    /// Write location, size, status and `updated_at`. `NotFound` if absent.
    async fn update(&self, record: &FileRecord) -> StorageResult<()>;

    /// Claim up to `limit` records for collection and mark them `deleted`.
    ///
    /// Eligible records are `pending` ones last updated before `older_than`, and
    /// records left `deleted` by an earlier unfinished pass. Returned in id order.
    async fn claim_unused(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<FileRecord>>;

    /// Delete records. Missing ids are ignored.
    async fn remove(&self, ids: &[Uid]) -> StorageResult<()>;
}

/// Fetch the record for `id`, mapping absence to `NotFound`.
pub async fn get_file_record(store: &dyn FileStore, id: Uid) -> StorageResult<FileRecord> {
    store
        .get(id)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("file {}", id)))
}

/// In-process [`FileStore`], used by tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    records: RwLock<BTreeMap<Uid, FileRecord>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn is_collectable(record: &FileRecord, older_than: DateTime<Utc>) -> bool {
    match record.status {
        FileStatus::Pending => record.updated_at < older_than,
        FileStatus::Deleted => true,
        FileStatus::Attached => false,
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn get(&self, id: Uid) -> StorageResult<Option<FileRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn insert(&self, record: &FileRecord) -> StorageResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StorageError::AlreadyExists(format!("file {}", record.id)));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &FileRecord) -> StorageResult<()> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| StorageError::NotFound(format!("file {}", record.id)))?;

        stored.location = record.location.clone();
        stored.size = record.size;
        stored.status = record.status;
        stored.updated_at = record.updated_at;
        Ok(())
    }

    async fn claim_unused(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<FileRecord>> {
        let mut records = self.records.write().await;
        let now = Utc::now();

        let claimed = records
            .values_mut()
            .filter(|record| is_collectable(record, older_than))
            .take(limit)
            .map(|record| {
                record.status = FileStatus::Deleted;
                record.updated_at = now;
                record.clone()
            })
            .collect();

        Ok(claimed)
    }

    async fn remove(&self, ids: &[Uid]) -> StorageResult<()> {
        let mut records = self.records.write().await;
        for id in ids {
            records.remove(id);
        }
        Ok(())
    }
}
