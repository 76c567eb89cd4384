//! Garbage collection of uploads that were never attached.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::Uid;
use tokio::time::interval;

use crate::metadata::FileStore;
use crate::traits::{MediaHandler, StorageError, StorageResult};

const MIN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct GarbageCollector {
    store: Arc<dyn FileStore>,
    handler: Arc<dyn MediaHandler>,
    grace_period: Duration,
    block_size: usize,
}

impl GarbageCollector {
    pub fn new(
        store: Arc<dyn FileStore>,
        handler: Arc<dyn MediaHandler>,
        grace_period: Duration,
        block_size: usize,
    ) -> Self {
        Self {
            store,
            handler,
            grace_period,
            block_size: block_size.max(1),
        }
    }

    /// Start the background collection task. Periods below one second are raised
    /// to one second.
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        if period < MIN_PERIOD {
            tracing::warn!(?period, "Garbage collection period too short, using 1s");
        }
        let period = period.max(MIN_PERIOD);

        tokio::spawn(async move {
            let mut gc_interval = interval(period);

            loop {
                gc_interval.tick().await;

                tracing::info!("Starting scheduled garbage collection");

                match self.run_once().await {
                    Ok(removed) => {
                        tracing::info!(removed, "Garbage collection completed");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Garbage collection failed");
                    }
                }
            }
        })
    }

    /// Collect one block of unused files. Returns the number of records removed.
    ///
    /// Records whose objects could not be removed stay `deleted` and are claimed
    /// again by a later pass.
    #[tracing::instrument(skip(self), fields(gc.block_size = self.block_size))]
    pub async fn run_once(&self) -> StorageResult<usize> {
        let grace = chrono::Duration::from_std(self.grace_period)
            .map_err(|e| StorageError::ConfigError(format!("invalid grace period: {}", e)))?;
        let cutoff = Utc::now()
            .checked_sub_signed(grace)
            .ok_or_else(|| StorageError::ConfigError("grace period out of range".to_string()))?;

        let claimed = self.store.claim_unused(cutoff, self.block_size).await?;
        if claimed.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        let mut unstored = Vec::new();
        let mut ids = Vec::new();
        let mut locations = Vec::new();
        for record in claimed {
            match record.location {
                Some(location) => {
                    ids.push(record.id);
                    locations.push(location);
                }
                None => unstored.push(record.id),
            }
        }

        if !unstored.is_empty() {
            self.store.remove(&unstored).await?;
            removed += unstored.len();
        }

        let mut start = 0;
        while start < locations.len() {
            let err = match self.handler.delete(&locations[start..]).await {
                Ok(()) => {
                    removed += self.forget(&ids[start..]).await?;
                    break;
                }
                Err(e) => e,
            };

            if let StorageError::PartialDelete { failed } = err {
                tracing::warn!(failed = failed.len(), "Some objects could not be removed");
                let done = removed_ids(&ids[start..], &locations[start..], &failed);
                removed += self.forget(&done).await?;
                break;
            }

            let (cause, failed) = match err {
                StorageError::DeleteAborted { cause, failed } => (*cause, failed),
                other => (other, Vec::new()),
            };

            let missing = match cause {
                StorageError::NotFound(missing) => missing,
                other => {
                    tracing::error!(
                        error = %other,
                        removal_failures = failed.len(),
                        removed,
                        pending = locations.len() - start,
                        "Object removal failed, stopping pass"
                    );
                    return Err(rejoin(other, failed));
                }
            };

            let Some(offset) = locations[start..].iter().position(|l| *l == missing) else {
                return Err(rejoin(StorageError::NotFound(missing), failed));
            };
            tracing::warn!(location = %missing, "Object already gone, dropping record");

            // Records whose removal failed keep their object and stay claimed.
            let end = start + offset + 1;
            let done = removed_ids(&ids[start..end], &locations[start..end], &failed);
            removed += self.forget(&done).await?;
            start = end;
        }

        Ok(removed)
    }

    async fn forget(&self, ids: &[Uid]) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.remove(ids).await?;
        Ok(ids.len())
    }
}

/// Ids whose location is not among `failed`.
fn removed_ids(ids: &[Uid], locations: &[String], failed: &[String]) -> Vec<Uid> {
    ids.iter()
        .zip(locations)
        .filter(|(_, location)| !failed.contains(*location))
        .map(|(id, _)| *id)
        .collect()
}

fn rejoin(cause: StorageError, failed: Vec<String>) -> StorageError {
    if failed.is_empty() {
        cause
    } else {
        StorageError::DeleteAborted {
            cause: Box::new(cause),
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryFileStore;
    use crate::traits::{DownloadStream, UploadSource};
    use async_trait::async_trait;
    use http::Method;
    use std::sync::Mutex;
    use stowage_core::{FileRecord, FileStatus};

    /// Records delete batches and answers from a script.
    struct ScriptedDeletes {
        calls: Mutex<Vec<Vec<String>>>,
        script: Mutex<Vec<StorageResult<()>>>,
    }

    impl ScriptedDeletes {
        fn new(mut script: Vec<StorageResult<()>>) -> Self {
            script.reverse();
            Self {
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl MediaHandler for ScriptedDeletes {
        async fn upload(
            &self,
            _record: &mut FileRecord,
            _source: &mut dyn UploadSource,
        ) -> StorageResult<String> {
            Err(StorageError::Unsupported)
        }

        async fn download(&self, _url: &str) -> StorageResult<(FileRecord, DownloadStream)> {
            Err(StorageError::Unsupported)
        }

        async fn delete(&self, locations: &[String]) -> StorageResult<()> {
            self.calls.lock().unwrap().push(locations.to_vec());
            self.script.lock().unwrap().pop().unwrap_or(Ok(()))
        }

        async fn redirect(&self, _method: &Method, _url: &str) -> StorageResult<String> {
            Err(StorageError::Unsupported)
        }

        fn get_id_from_url(&self, _url: &str) -> Uid {
            Uid::ZERO
        }
    }

    async fn seed(store: &MemoryFileStore, id: u64, location: Option<&str>, status: FileStatus) {
        let mut record = FileRecord::pending(Uid::new(id), Uid::new(1), "text/plain", 1);
        record.location = location.map(str::to_string);
        record.status = status;
        record.updated_at = Utc::now() - chrono::Duration::days(2);
        store.insert(&record).await.unwrap();
    }

    fn collector(
        store: Arc<MemoryFileStore>,
        handler: Arc<ScriptedDeletes>,
    ) -> GarbageCollector {
        GarbageCollector::new(store, handler, Duration::from_secs(3600), 100)
    }

    #[tokio::test]
    async fn removes_stale_pending_and_keeps_attached() {
        let store = Arc::new(MemoryFileStore::new());
        seed(&store, 1, Some("a"), FileStatus::Pending).await;
        seed(&store, 2, None, FileStatus::Pending).await;
        seed(&store, 3, Some("c"), FileStatus::Attached).await;
        let handler = Arc::new(ScriptedDeletes::new(vec![]));

        let removed = collector(store.clone(), handler.clone()).run_once().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(*handler.calls.lock().unwrap(), vec![vec!["a".to_string()]]);
        assert_eq!(store.len().await, 1);
        assert!(store.get(Uid::new(3)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn continues_past_missing_objects() {
        let store = Arc::new(MemoryFileStore::new());
        seed(&store, 1, Some("a"), FileStatus::Pending).await;
        seed(&store, 2, Some("b"), FileStatus::Pending).await;
        seed(&store, 3, Some("c"), FileStatus::Pending).await;
        let handler = Arc::new(ScriptedDeletes::new(vec![
            Err(StorageError::NotFound("b".to_string())),
            Ok(()),
        ]));

        let removed = collector(store.clone(), handler.clone()).run_once().await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(
            *handler.calls.lock().unwrap(),
            vec![
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                vec!["c".to_string()],
            ]
        );
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn keeps_records_whose_objects_failed() {
        let store = Arc::new(MemoryFileStore::new());
        seed(&store, 1, Some("a"), FileStatus::Pending).await;
        seed(&store, 2, Some("b"), FileStatus::Pending).await;
        let handler = Arc::new(ScriptedDeletes::new(vec![Err(
            StorageError::PartialDelete {
                failed: vec!["b".to_string()],
            },
        )]));

        let removed = collector(store.clone(), handler).run_once().await.unwrap();
        assert_eq!(removed, 1);

        let kept = store.get(Uid::new(2)).await.unwrap().unwrap();
        assert_eq!(kept.status, FileStatus::Deleted);
    }

    #[tokio::test]
    async fn aborted_batch_keeps_records_with_failed_removals() {
        let store = Arc::new(MemoryFileStore::new());
        seed(&store, 1, Some("a"), FileStatus::Pending).await;
        seed(&store, 2, Some("b"), FileStatus::Pending).await;
        seed(&store, 3, Some("c"), FileStatus::Pending).await;
        let handler = Arc::new(ScriptedDeletes::new(vec![
            Err(StorageError::DeleteAborted {
                cause: Box::new(StorageError::NotFound("b".to_string())),
                failed: vec!["a".to_string()],
            }),
            Ok(()),
        ]));

        let removed = collector(store.clone(), handler.clone()).run_once().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            handler.calls.lock().unwrap().last().cloned(),
            Some(vec!["c".to_string()])
        );

        let kept = store.get(Uid::new(1)).await.unwrap().unwrap();
        assert_eq!(kept.status, FileStatus::Deleted);
        assert_eq!(kept.location.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn aborted_batch_with_transport_cause_keeps_failures() {
        let store = Arc::new(MemoryFileStore::new());
        seed(&store, 1, Some("a"), FileStatus::Pending).await;
        seed(&store, 2, Some("b"), FileStatus::Pending).await;
        let handler = Arc::new(ScriptedDeletes::new(vec![Err(StorageError::DeleteAborted {
            cause: Box::new(StorageError::TransportError("timeout".to_string())),
            failed: vec!["a".to_string()],
        })]));

        let err = collector(store.clone(), handler).run_once().await.unwrap_err();
        assert!(matches!(err, StorageError::DeleteAborted { .. }));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn zero_period_still_collects() {
        let store = Arc::new(MemoryFileStore::new());
        seed(&store, 1, None, FileStatus::Pending).await;
        let handler = Arc::new(ScriptedDeletes::new(vec![]));
        let gc = Arc::new(collector(store.clone(), handler));

        let task = gc.start(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!task.is_finished());
        assert!(store.is_empty().await);
        task.abort();
    }

    #[tokio::test]
    async fn transport_failure_stops_and_retries_next_pass() {
        let store = Arc::new(MemoryFileStore::new());
        seed(&store, 1, Some("a"), FileStatus::Pending).await;
        let handler = Arc::new(ScriptedDeletes::new(vec![Err(
            StorageError::TransportError("connection reset".to_string()),
        )]));
        let gc = collector(store.clone(), handler.clone());

        let err = gc.run_once().await.unwrap_err();
        assert!(matches!(err, StorageError::TransportError(_)));
        assert_eq!(store.len().await, 1);

        // Claimed records are picked up again regardless of age.
        assert_eq!(gc.run_once().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn fresh_uploads_are_left_alone() {
        let store = Arc::new(MemoryFileStore::new());
        store
            .insert(&FileRecord::pending(Uid::new(1), Uid::new(1), "text/plain", 1))
            .await
            .unwrap();
        let handler = Arc::new(ScriptedDeletes::new(vec![]));

        assert_eq!(collector(store.clone(), handler.clone()).run_once().await.unwrap(), 0);
        assert!(handler.calls.lock().unwrap().is_empty());
        assert_eq!(store.len().await, 1);
    }
}
