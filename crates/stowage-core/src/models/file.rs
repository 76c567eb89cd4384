//! File metadata record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::uid::Uid;

/// Lifecycle status of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "file_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Created before upload; not yet referenced by any content.
    Pending,
    /// Referenced by user content.
    Attached,
    /// Claimed by garbage collection.
    Deleted,
}

/// Metadata for one uploaded blob.
///
/// Owned by the metadata store. Storage backends read `id` and `size` and write
/// `location` back after a confirmed upload; they never persist the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uid,
    pub owner: Uid,
    pub size: u64,
    pub mime_type: String,
    pub location: Option<String>,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// New record in `pending` status with no location.
    pub fn pending(id: Uid, owner: Uid, mime_type: impl Into<String>, size: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner,
            size,
            mime_type: mime_type.into(),
            location: None,
            status: FileStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.status == FileStatus::Attached
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
