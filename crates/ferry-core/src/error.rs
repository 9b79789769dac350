//! Error types module
//!
//! Errors raised by the managed file entity itself. Transport failures live in
//! `ferry-storage` and protocol failures in `ferry-services`; validation findings are
//! never errors, they are reported as `VALIDATION_ERROR` events.

use crate::models::FileStatus;

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// Empty payload or a malformed embedded type marker. The transfer never starts.
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// The file is not in a status that allows the requested operation.
    #[error("Invalid state for {operation}: file {name} is {actual}, expected {expected}")]
    InvalidState {
        operation: &'static str,
        name: String,
        expected: FileStatus,
        actual: FileStatus,
    },

    /// Reading the local source failed. Propagated unmodified.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileError {
    /// Local caller mistakes are never worth retrying; IO may succeed on a second read.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FileError::Io(_))
    }
}
