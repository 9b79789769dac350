//! Ferry Services Layer
//!
//! Orchestration on top of the core model and the storage transports: the transfer
//! service that runs the upload/delete protocols for one file, the session aggregator
//! that folds per-file events into session events, and the batch runner that ties both
//! together for a set of files.

pub mod batch;
pub mod error;
pub mod options;
pub mod session;
pub mod transfer;

// Re-export commonly used types
pub use batch::{BatchReport, BatchRunner, DeleteReport, FailedFile, Rejection};
pub use error::{FailedTransfer, SessionError, TransferError};
pub use ferry_core::{
    FerryConfig, FileStatus, ManagedFile, ManagedFileValidator, RawSource, SessionEvent,
    SessionEventKind, TransferEvent, TransferEventKind,
};
pub use ferry_storage::{create_transport, ObjectAcl, Transport, TransportError};
pub use options::{DeleteOptions, UploadOptions, ORIGINAL_NAME_METADATA};
pub use session::UploadSession;
pub use transfer::{TransferHandle, TransferService};
