//! Per-file transfer events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use tokio::sync::mpsc;

use super::managed_file::ManagedFile;

/// Structured message parameters, keyed by placeholder name, for localization.
pub type MessageParams = BTreeMap<String, serde_json::Value>;

/// Channel half transfers and validators report through.
pub type EventSender = mpsc::UnboundedSender<TransferEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransferEvent>;

/// Create the channel a caller listens on for per-file events.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransferEventKind {
    Load,
    ValidationError,
    UploadStart,
    UploadProgress,
    UploadFailed,
    UploadSuccess,
    UploadCanceled,
    DeleteStart,
    DeleteEnd,
    DeleteSuccess,
}

impl TransferEventKind {
    /// Last event of an upload: exactly one of these ends every upload.
    pub fn is_upload_terminal(&self) -> bool {
        matches!(
            self,
            TransferEventKind::UploadFailed
                | TransferEventKind::UploadSuccess
                | TransferEventKind::UploadCanceled
        )
    }
}

impl Display for TransferEventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            TransferEventKind::Load => "load",
            TransferEventKind::ValidationError => "validation_error",
            TransferEventKind::UploadStart => "upload_start",
            TransferEventKind::UploadProgress => "upload_progress",
            TransferEventKind::UploadFailed => "upload_failed",
            TransferEventKind::UploadSuccess => "upload_success",
            TransferEventKind::UploadCanceled => "upload_canceled",
            TransferEventKind::DeleteStart => "delete_start",
            TransferEventKind::DeleteEnd => "delete_end",
            TransferEventKind::DeleteSuccess => "delete_success",
        };
        f.write_str(s)
    }
}

/// Point-in-time notification about one file. `file` is a snapshot taken when the event
/// was emitted, not a live reference.
#[derive(Debug, Clone, Serialize)]
pub struct TransferEvent {
    pub kind: TransferEventKind,
    pub file: ManagedFile,
    pub message: Option<String>,
    pub message_params: MessageParams,
    pub occurred_at: DateTime<Utc>,
}

impl TransferEvent {
    pub fn new(kind: TransferEventKind, file: &ManagedFile) -> Self {
        Self {
            kind,
            file: file.clone(),
            message: None,
            message_params: MessageParams::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.message_params.insert(key.into(), value.into());
        self
    }
}

/// Send an event, ignoring a listener that has gone away.
pub fn emit(events: &EventSender, event: TransferEvent) {
    if events.send(event).is_err() {
        tracing::trace!("Transfer event listener dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawSource;

    #[test]
    fn event_carries_snapshot_and_params() {
        let file = ManagedFile::from_source(RawSource::new(&b"abc"[..], "a.txt")).unwrap();
        let event = TransferEvent::new(TransferEventKind::ValidationError, &file)
            .with_message("file.validation.size_exceeded")
            .with_param("size", 3u64)
            .with_param("max", 1u64);

        assert_eq!(event.file.name(), file.name());
        assert_eq!(event.message.as_deref(), Some("file.validation.size_exceeded"));
        assert_eq!(event.message_params["size"], serde_json::json!(3));
    }

    #[test]
    fn terminal_kinds() {
        assert!(TransferEventKind::UploadSuccess.is_upload_terminal());
        assert!(TransferEventKind::UploadCanceled.is_upload_terminal());
        assert!(!TransferEventKind::UploadProgress.is_upload_terminal());
        assert!(!TransferEventKind::DeleteEnd.is_upload_terminal());
    }

    #[tokio::test]
    async fn emit_tolerates_dropped_listener() {
        let file = ManagedFile::from_source(RawSource::new(&b"abc"[..], "a.txt")).unwrap();
        let (tx, rx) = event_channel();
        drop(rx);
        emit(&tx, TransferEvent::new(TransferEventKind::Load, &file));
    }
}
