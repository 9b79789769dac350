//! Error types for transfers and batch sessions

use crate::batch::{BatchReport, DeleteReport};
use ferry_core::{FileError, ManagedFile};
use ferry_storage::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Transfer service already has an upload in flight")]
    Busy,

    #[error("Transfer task failed: {0}")]
    Task(String),
}

impl TransferError {
    /// Whether the same transfer may succeed when attempted again. Nothing is retried
    /// automatically; callers layer their own policy on top of this.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::File(e) => e.is_recoverable(),
            TransferError::Transport(e) => e.is_retryable(),
            TransferError::Busy => true,
            TransferError::Task(_) => false,
        }
    }
}

/// A transfer that did not complete, with the file handed back in its reverted state.
#[derive(Debug, Error)]
#[error("transfer of {} failed: {}", .file.name(), .error)]
pub struct FailedTransfer {
    pub file: ManagedFile,
    #[source]
    pub error: TransferError,
}

impl FailedTransfer {
    pub fn new(file: ManagedFile, error: impl Into<TransferError>) -> Self {
        Self {
            file,
            error: error.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{failed} of {total} uploads failed")]
    UploadsFailed {
        failed: usize,
        total: usize,
        report: Box<BatchReport>,
    },

    #[error("{failed} of {total} deletes failed")]
    DeletesFailed {
        failed: usize,
        total: usize,
        report: Box<DeleteReport>,
    },
}
