//! Idempotent bucket provisioning.

use crate::client::{MakeBucketOptions, ObjectClient};
use crate::traits::{StorageError, StorageResult};

/// Make sure `bucket` exists, creating it in `region` when absent.
///
/// A failed existence check is returned without attempting creation. Losing a
/// creation race to another process counts as success.
#[tracing::instrument(skip(client), fields(bucket = %bucket, region = %region))]
pub async fn ensure_bucket(
    client: &dyn ObjectClient,
    bucket: &str,
    region: &str,
) -> StorageResult<()> {
    let start = std::time::Instant::now();

    let found = client.bucket_exists(bucket).await.map_err(|e| {
        tracing::error!(error = %e, "Bucket existence check failed");
        match e {
            StorageError::ConnectError(_) => e,
            other => StorageError::ProvisionError(format!(
                "existence check for bucket '{}' failed: {}",
                bucket, other
            )),
        }
    })?;

    if found {
        tracing::info!(
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Bucket already exists"
        );
        return Ok(());
    }

    let options = MakeBucketOptions {
        region: region.to_string(),
        object_locking: false,
    };

    match client.make_bucket(bucket, &options).await {
        Ok(()) => {
            tracing::info!(
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Bucket created"
            );
            Ok(())
        }
        Err(StorageError::AlreadyExists(_)) => {
            tracing::info!("Bucket was created concurrently");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Bucket creation failed");
            Err(StorageError::ProvisionError(format!(
                "failed to create bucket '{}': {}",
                bucket, e
            )))
        }
    }
}
