//! Postgres-backed file metadata repository.
//!
//! Identifiers are stored as `BIGINT`; the `u64` bit pattern is reinterpreted as
//! `i64`, so ids above `i64::MAX` are stored as negative numbers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use std::path::Path;
use std::time::Duration;
use stowage_core::{FileRecord, FileStatus, Uid};
use stowage_storage::{FileStore, StorageError, StorageResult};

const FILE_COLUMNS: &str = "id, owner, size, mime_type, location, status, created_at, updated_at";

/// Connect to Postgres and apply pending migrations.
pub async fn setup_database(database_url: &str, max_connections: u32) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    // Workspace migrations/ relative to this crate
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!(max_connections, "Database migrations applied");

    Ok(pool)
}

fn uid_to_db(id: Uid) -> i64 {
    id.as_u64() as i64
}

fn uid_from_db(id: i64) -> Uid {
    Uid::new(id as u64)
}

fn size_to_db(record: &FileRecord) -> StorageResult<i64> {
    i64::try_from(record.size).map_err(|_| {
        StorageError::MetadataError(format!(
            "file {} size {} does not fit in BIGINT",
            record.id, record.size
        ))
    })
}

fn db_error(err: sqlx::Error) -> StorageError {
    StorageError::MetadataError(err.to_string())
}

/// Row type for the files table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct FileRow {
    pub id: i64,
    pub owner: i64,
    pub size: i64,
    pub mime_type: String,
    pub location: Option<String>,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRow {
    pub fn to_file_record(self) -> FileRecord {
        FileRecord {
            id: uid_from_db(self.id),
            owner: uid_from_db(self.owner),
            size: u64::try_from(self.size).unwrap_or_default(),
            mime_type: self.mime_type,
            location: self.location,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Repository for the files table.
#[derive(Clone)]
pub struct PgFileRepository {
    pool: PgPool,
}

impl PgFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileStore for PgFileRepository {
    #[tracing::instrument(skip(self), fields(db.table = "files", db.record_id = %id))]
    async fn get(&self, id: Uid) -> StorageResult<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as::<Postgres, FileRow>(&format!(
            "SELECT {} FROM files WHERE id = $1",
            FILE_COLUMNS
        ))
        .bind(uid_to_db(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(FileRow::to_file_record))
    }

    #[tracing::instrument(skip(self, record), fields(db.table = "files", db.record_id = %record.id))]
    async fn insert(&self, record: &FileRecord) -> StorageResult<()> {
        let size = size_to_db(record)?;
        let result = sqlx::query(
            r#"
            INSERT INTO files (id, owner, size, mime_type, location, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(uid_to_db(record.id))
        .bind(uid_to_db(record.owner))
        .bind(size)
        .bind(&record.mime_type)
        .bind(&record.location)
        .bind(record.status)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::AlreadyExists(format!("file {}", record.id)))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    #[tracing::instrument(skip(self, record), fields(db.table = "files", db.record_id = %record.id))]
    async fn update(&self, record: &FileRecord) -> StorageResult<()> {
        let size = size_to_db(record)?;
        let result = sqlx::query(
            r#"
            UPDATE files
            SET location = $2, size = $3, status = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(uid_to_db(record.id))
        .bind(&record.location)
        .bind(size)
        .bind(record.status)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("file {}", record.id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn claim_unused(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<FileRecord>> {
        let rows: Vec<FileRow> = sqlx::query_as::<Postgres, FileRow>(
            r#"
            WITH claimed AS (
                SELECT id FROM files
                WHERE (status = 'pending' AND updated_at < $1) OR status = 'deleted'
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE files
            SET status = 'deleted', updated_at = NOW()
            FROM claimed
            WHERE files.id = claimed.id
            RETURNING files.id, files.owner, files.size, files.mime_type, files.location,
                      files.status, files.created_at, files.updated_at
            "#,
        )
        .bind(older_than)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut records: Vec<FileRecord> = rows.into_iter().map(FileRow::to_file_record).collect();
        records.sort_by_key(|r| r.id);

        tracing::debug!(claimed = records.len(), "Claimed unused files");
        Ok(records)
    }

    #[tracing::instrument(skip(self, ids), fields(db.table = "files", count = ids.len()))]
    async fn remove(&self, ids: &[Uid]) -> StorageResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = ids.iter().copied().map(uid_to_db).collect();
        sqlx::query("DELETE FROM files WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
