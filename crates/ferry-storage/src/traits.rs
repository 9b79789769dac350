//! Storage transport abstraction
//!
//! This module defines the Transport trait that every object-storage backend implements.
//! The transfer service drives uploads and deletes through it without knowing which
//! backend sits behind.

use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::StorageBackend;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Transport operation errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// The operation stopped because its cancellation token fired.
    #[error("Transfer aborted")]
    Aborted,

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl TransportError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::UploadFailed(_)
                | TransportError::DeleteFailed(_)
                | TransportError::BackendError(_)
                | TransportError::IoError(_)
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Canned access-control directive applied to an uploaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectAcl {
    #[default]
    Private,
    PublicRead,
}

impl ObjectAcl {
    pub fn from_public(public: bool) -> Self {
        if public {
            ObjectAcl::PublicRead
        } else {
            ObjectAcl::Private
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectAcl::Private => "private",
            ObjectAcl::PublicRead => "public-read",
        }
    }
}

impl Display for ObjectAcl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Everything a backend needs to store one object.
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub acl: ObjectAcl,
    pub storage_class: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// One progress report: bytes sent so far out of the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub loaded: u64,
    pub total: u64,
}

pub type ProgressSender = mpsc::UnboundedSender<TransferProgress>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<TransferProgress>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Report progress; a listener that went away is not an error for the transport.
pub fn report_progress(progress: &ProgressSender, loaded: u64, total: u64) {
    let _ = progress.send(TransferProgress { loaded, total });
}

/// Storage transport trait
///
/// Backends must:
/// - report non-decreasing `loaded` values for one `put_object` call;
/// - watch `cancel` while transferring, clean up any partial object, and return
///   `TransportError::Aborted` once they stop because of it;
/// - return the object's location (URL) on success.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Store one object, reporting progress as bytes are sent.
    async fn put_object(
        &self,
        request: PutObjectRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> TransportResult<String>;

    /// Delete one object. Deleting a key that holds no object succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> TransportResult<()>;

    /// Bucket used when a request does not name one.
    fn default_bucket(&self) -> &str;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
