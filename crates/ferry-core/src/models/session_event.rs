//! Aggregate events over a batch of managed files.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

use super::managed_file::{FileStatus, ManagedFile};

/// Identifier of one upload session, assigned once and stable for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Load,
    ValidationError,
    UploadStart,
    UploadProgress,
    UploadEnd,
    DeleteStart,
    DeleteEnd,
}

impl Display for SessionEventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            SessionEventKind::Load => "load",
            SessionEventKind::ValidationError => "validation_error",
            SessionEventKind::UploadStart => "upload_start",
            SessionEventKind::UploadProgress => "upload_progress",
            SessionEventKind::UploadEnd => "upload_end",
            SessionEventKind::DeleteStart => "delete_start",
            SessionEventKind::DeleteEnd => "delete_end",
        };
        f.write_str(s)
    }
}

/// Notification about the whole enrolled set. Counters are derived from the file
/// snapshots when the event is built.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub id: SessionId,
    pub kind: SessionEventKind,
    pub files: Vec<ManagedFile>,
    pub message: Option<String>,
    pub uploading_count: usize,
    pub uploaded_count: usize,
    pub progress: u8,
    pub occurred_at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(id: SessionId, kind: SessionEventKind, files: Vec<ManagedFile>) -> Self {
        let uploading_count = count_status(&files, FileStatus::Uploading);
        let uploaded_count = count_status(&files, FileStatus::Uploaded);
        let progress = aggregate_progress(&files);

        Self {
            id,
            kind,
            files,
            message: None,
            uploading_count,
            uploaded_count,
            progress,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }
}

pub fn count_status(files: &[ManagedFile], status: FileStatus) -> usize {
    files.iter().filter(|f| f.status() == status).count()
}

/// `floor(sum(percentages) / (n * 100) * 100)`, computed in integers. Empty sets are 0.
pub fn aggregate_progress(files: &[ManagedFile]) -> u8 {
    if files.is_empty() {
        return 0;
    }
    let sum: u64 = files
        .iter()
        .map(|f| u64::from(f.uploaded_percentage()))
        .sum();
    (sum * 100 / (files.len() as u64 * 100)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawSource;

    fn file_at(percentage: u64) -> ManagedFile {
        let mut file =
            ManagedFile::from_source(RawSource::new(vec![0u8; 100], "f.bin")).unwrap();
        file.begin_upload().unwrap();
        file.record_progress(percentage, 100);
        file
    }

    #[test]
    fn aggregate_progress_floors() {
        let files = vec![file_at(100), file_at(50), file_at(0)];
        assert_eq!(aggregate_progress(&files), 50);

        let files = vec![file_at(33), file_at(34), file_at(34)];
        assert_eq!(aggregate_progress(&files), 33);

        assert_eq!(aggregate_progress(&[]), 0);
    }

    #[test]
    fn counters_follow_snapshots() {
        let mut done = file_at(100);
        done.complete_upload("k", "loc");
        let event = SessionEvent::new(
            SessionId::generate(),
            SessionEventKind::UploadProgress,
            vec![done, file_at(10)],
        );
        assert_eq!(event.uploaded_count, 1);
        assert_eq!(event.uploading_count, 1);
        assert_eq!(event.progress, 55);
    }

    #[test]
    fn session_ids_are_distinct_hex() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
