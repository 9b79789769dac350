//! Shared key generation for storage backends.
//!
//! Key format: `{upload_dir}/{filename}`, or just `{filename}` when no upload directory is
//! configured. Keys never start with `/`.

use crate::traits::{TransportError, TransportResult};

/// Generate an object key for a file stored under `upload_dir`.
pub fn object_key(upload_dir: &str, filename: &str) -> String {
    let dir = upload_dir.trim_matches('/');
    let filename = filename.trim_start_matches('/');
    if dir.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", dir, filename)
    }
}

/// Normalize a caller-provided key: leading slashes are dropped and traversal
/// segments rejected.
pub fn normalize_key(key: &str) -> TransportResult<String> {
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        return Err(TransportError::InvalidKey("Storage key is empty".to_string()));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(TransportError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(key.to_string())
}
