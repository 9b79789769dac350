//! Ferry Core Library
//!
//! Domain model for managed file transfers: the `ManagedFile` entity and its lifecycle,
//! per-file and session events, the pre-transfer validator chain, configuration, and
//! error types shared by the storage and services crates.

pub mod config;
pub mod digest;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod validation;

// Re-export commonly used types
pub use config::FerryConfig;
pub use error::FileError;
pub use models::{
    event_channel, EventReceiver, EventSender, FileStatus, ManagedFile, RawSource,
    SessionEvent, SessionEventKind, SessionId, TransferEvent, TransferEventKind,
};
pub use storage_types::StorageBackend;
pub use validation::{CheckKind, FileValidator, ManagedFileValidator};
