//! Upload and attach flow tying a media handler to the metadata store.

use stowage_core::{FileRecord, FileStatus, Uid};

use crate::metadata::{get_file_record, FileStore};
use crate::traits::{MediaHandler, StorageResult, UploadSource};

/// Record `record` as pending, store its content and persist the location.
///
/// A failed upload removes the pending record again before the error is returned.
/// If the location cannot be persisted, the stored object is deleted as well.
#[tracing::instrument(skip(handler, store, record, source), fields(file_id = %record.id, size_bytes = record.size))]
pub async fn upload_file(
    handler: &dyn MediaHandler,
    store: &dyn FileStore,
    mut record: FileRecord,
    source: &mut dyn UploadSource,
) -> StorageResult<FileRecord> {
    record.status = FileStatus::Pending;
    record.location = None;
    store.insert(&record).await?;

    match handler.upload(&mut record, source).await {
        Ok(_) => {
            record.touch();
            if let Err(e) = store.update(&record).await {
                tracing::error!(error = %e, "Failed to persist location, removing object");
                if let Some(location) = record.location.clone() {
                    if let Err(cleanup) = handler.delete(&[location]).await {
                        tracing::error!(error = %cleanup, "Failed to remove uploaded object");
                    }
                }
                rollback(store, record.id).await;
                return Err(e);
            }
            Ok(record)
        }
        Err(e) => {
            tracing::error!(error = %e, "Upload failed, removing pending record");
            rollback(store, record.id).await;
            Err(e)
        }
    }
}

async fn rollback(store: &dyn FileStore, id: Uid) {
    if let Err(e) = store.remove(&[id]).await {
        tracing::error!(error = %e, "Failed to remove pending record");
    }
}

/// Mark a file as referenced by content so garbage collection keeps it.
#[tracing::instrument(skip(store))]
pub async fn attach_file(store: &dyn FileStore, id: Uid) -> StorageResult<FileRecord> {
    let mut record = get_file_record(store, id).await?;
    if record.is_attached() {
        return Ok(record);
    }

    record.status = FileStatus::Attached;
    record.touch();
    store.update(&record).await?;

    tracing::info!("File attached");
    Ok(record)
}
