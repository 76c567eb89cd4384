//! Object key derivation and location parsing.
//!
//! Keys are the lowercase base32 form of the file id. The bucket is fixed per
//! handler, so the location returned by an upload is the bare key.

use crate::traits::{StorageError, StorageResult};
use stowage_core::Uid;

/// Derive the object key for a file id.
pub fn object_key(id: Uid) -> StorageResult<String> {
    if id.is_zero() {
        return Err(StorageError::InvalidKey(
            "cannot derive a key from the zero uid".to_string(),
        ));
    }
    Ok(id.to_base32())
}

/// Parse the object key out of a stored location.
///
/// Strips surrounding whitespace, leading slashes and an optional `{bucket}/`
/// prefix. Keys must not be empty or contain `..`.
pub fn location_key(location: &str, bucket: &str) -> StorageResult<String> {
    let trimmed = location.trim().trim_start_matches('/');
    let key = trimmed
        .strip_prefix(bucket)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(trimmed);

    if key.is_empty() {
        return Err(StorageError::InvalidKey(format!(
            "location '{}' does not name an object",
            location
        )));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(format!(
            "location '{}' contains a parent segment",
            location
        )));
    }
    Ok(key.to_string())
}
