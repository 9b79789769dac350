//! Ferry Storage Library
//!
//! Object-storage transports for managed file transfers. The `Transport` trait is the
//! seam the transfer service talks to; S3, local filesystem and in-memory backends
//! implement it.
//!
//! # Object key format
//!
//! Keys are `{upload_dir}/{filename}` and never start with `/`. Keys must not contain
//! `..` segments. Key handling is centralized in the `keys` module so all backends stay
//! consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-memory")]
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_transport;
pub use ferry_core::StorageBackend;
pub use keys::{normalize_key, object_key};
#[cfg(feature = "storage-local")]
pub use local::LocalTransport;
#[cfg(feature = "storage-memory")]
pub use memory::{MemoryTransport, PutScript, ScriptedOutcome, StoredObject};
#[cfg(feature = "storage-s3")]
pub use s3::S3Transport;
pub use traits::{
    progress_channel, report_progress, ObjectAcl, ProgressReceiver, ProgressSender,
    PutObjectRequest, TransferProgress, Transport, TransportError, TransportResult,
};
