//! Session aggregator
//!
//! Folds the per-file events of an enrolled set of files into session-level events. The
//! aggregator owns nothing but snapshots: every observed event replaces the stored copy of
//! its file, and the session decisions are made on those copies.

use ferry_core::{
    FileStatus, ManagedFile, SessionEvent, SessionEventKind, SessionId, TransferEvent,
    TransferEventKind,
};

#[derive(Debug, Clone)]
pub struct UploadSession {
    id: SessionId,
    files: Vec<ManagedFile>,
    upload_started: bool,
}

impl UploadSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::generate(),
            files: Vec::new(),
            upload_started: false,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn files(&self) -> &[ManagedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn is_enrolled(&self, name: &str) -> bool {
        self.files.iter().any(|f| f.name() == name)
    }

    /// Add a file to the session. Returns `false` if a file with the same name is already
    /// enrolled.
    pub fn enroll(&mut self, file: &ManagedFile) -> bool {
        if self.is_enrolled(file.name()) {
            return false;
        }
        self.files.push(file.clone());
        true
    }

    /// Session event of `kind` over the current snapshots.
    pub fn event(&self, kind: SessionEventKind) -> SessionEvent {
        SessionEvent::new(self.id.clone(), kind, self.files.clone())
    }

    fn any_with_status(&self, status: FileStatus, except: Option<usize>) -> bool {
        self.files
            .iter()
            .enumerate()
            .any(|(i, f)| Some(i) != except && f.status() == status)
    }

    /// Fold one per-file event into the session.
    ///
    /// Validation errors are forwarded even for files that are not enrolled, since
    /// validation runs before enrollment. Every other event of an unknown file is ignored.
    pub fn observe(&mut self, event: &TransferEvent) -> Option<SessionEvent> {
        let Some(index) = self.files.iter().position(|f| f.name() == event.file.name()) else {
            return match event.kind {
                TransferEventKind::ValidationError => Some(
                    self.event(SessionEventKind::ValidationError)
                        .with_message(event.message.clone()),
                ),
                _ => None,
            };
        };

        let others_uploading = self.any_with_status(FileStatus::Uploading, Some(index));
        let others_deleting = self.any_with_status(FileStatus::Deleting, Some(index));
        self.files[index] = event.file.clone();

        let derived = match event.kind {
            TransferEventKind::UploadStart if others_uploading && !self.upload_started => {
                self.upload_started = true;
                Some(SessionEventKind::UploadStart)
            }
            TransferEventKind::UploadProgress => Some(SessionEventKind::UploadProgress),
            kind if kind.is_upload_terminal()
                && self.files.iter().all(|f| f.status() == FileStatus::Uploaded) =>
            {
                Some(SessionEventKind::UploadEnd)
            }
            TransferEventKind::ValidationError => Some(SessionEventKind::ValidationError),
            TransferEventKind::DeleteStart if !others_deleting => {
                Some(SessionEventKind::DeleteStart)
            }
            TransferEventKind::DeleteEnd if !self.any_with_status(FileStatus::Deleting, None) => {
                Some(SessionEventKind::DeleteEnd)
            }
            _ => None,
        };

        if !self.any_with_status(FileStatus::Uploading, None) {
            self.upload_started = false;
        }

        derived.map(|kind| {
            let session_event = self.event(kind);
            match kind {
                SessionEventKind::ValidationError => {
                    session_event.with_message(event.message.clone())
                }
                _ => session_event,
            }
        })
    }
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::RawSource;

    fn loaded(name: &str) -> ManagedFile {
        ManagedFile::from_source(RawSource::new(&b"0123456789"[..], name)).unwrap()
    }

    fn uploading(file: &ManagedFile) -> ManagedFile {
        let mut f = file.clone();
        f.begin_upload().unwrap();
        f
    }

    fn at(file: &ManagedFile, percentage: u64) -> ManagedFile {
        let mut f = file.clone();
        f.record_progress(percentage, 100);
        f
    }

    fn done(file: &ManagedFile) -> ManagedFile {
        let mut f = file.clone();
        f.complete_upload(format!("uploads/{}", f.name()), "memory://x");
        f
    }

    fn event(kind: TransferEventKind, file: &ManagedFile) -> TransferEvent {
        TransferEvent::new(kind, file)
    }

    fn session_of(files: &[&ManagedFile]) -> UploadSession {
        let mut session = UploadSession::new();
        for f in files {
            assert!(session.enroll(f));
        }
        session
    }

    #[test]
    fn id_is_stable_and_32_hex_chars() {
        let mut session = UploadSession::new();
        let id = session.id().clone();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        session.enroll(&loaded("a.txt"));
        assert_eq!(session.event(SessionEventKind::Load).id, id);
    }

    #[test]
    fn enroll_rejects_duplicates() {
        let a = loaded("a.txt");
        let mut session = session_of(&[&a]);
        assert!(!session.enroll(&a));
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn second_concurrent_start_triggers_session_start() {
        let (a, b, c) = (loaded("a"), loaded("b"), loaded("c"));
        let mut session = session_of(&[&a, &b, &c]);

        let a_up = uploading(&a);
        assert!(session.observe(&event(TransferEventKind::UploadStart, &a_up)).is_none());

        let started = session
            .observe(&event(TransferEventKind::UploadStart, &uploading(&b)))
            .unwrap();
        assert_eq!(started.kind, SessionEventKind::UploadStart);
        assert_eq!(started.uploading_count, 2);

        // Latched until nothing is uploading.
        assert!(session
            .observe(&event(TransferEventKind::UploadStart, &uploading(&c)))
            .is_none());
    }

    #[test]
    fn latch_rearms_when_nothing_is_uploading() {
        let (a, b) = (loaded("a"), loaded("b"));
        let mut session = session_of(&[&a, &b]);

        session.observe(&event(TransferEventKind::UploadStart, &uploading(&a)));
        session.observe(&event(TransferEventKind::UploadStart, &uploading(&b)));
        session.observe(&event(TransferEventKind::UploadCanceled, &a));
        session.observe(&event(TransferEventKind::UploadCanceled, &b));

        session.observe(&event(TransferEventKind::UploadStart, &uploading(&a)));
        let again = session.observe(&event(TransferEventKind::UploadStart, &uploading(&b)));
        assert_eq!(again.map(|e| e.kind), Some(SessionEventKind::UploadStart));
    }

    #[test]
    fn progress_aggregates_percentages() {
        let (a, b, c) = (loaded("a"), loaded("b"), loaded("c"));
        let mut session = session_of(&[&a, &b, &c]);

        session.observe(&event(TransferEventKind::UploadSuccess, &done(&uploading(&a))));
        let progress = session
            .observe(&event(TransferEventKind::UploadProgress, &at(&uploading(&b), 50)))
            .unwrap();

        assert_eq!(progress.kind, SessionEventKind::UploadProgress);
        assert_eq!(progress.progress, 50);
        assert_eq!(progress.uploaded_count, 1);
        assert_eq!(progress.uploading_count, 1);
    }

    #[test]
    fn upload_end_only_when_all_uploaded() {
        let (a, b) = (loaded("a"), loaded("b"));
        let mut session = session_of(&[&a, &b]);

        assert!(session
            .observe(&event(TransferEventKind::UploadSuccess, &done(&uploading(&a))))
            .is_none());
        assert!(session
            .observe(&event(TransferEventKind::UploadFailed, &b))
            .is_none());

        let end = session
            .observe(&event(TransferEventKind::UploadSuccess, &done(&uploading(&b))))
            .unwrap();
        assert_eq!(end.kind, SessionEventKind::UploadEnd);
        assert_eq!(end.uploaded_count, 2);
        assert_eq!(end.progress, 100);
    }

    #[test]
    fn validation_errors_are_forwarded_with_message() {
        let a = loaded("a");
        let stranger = loaded("z");
        let mut session = session_of(&[&a]);

        let forwarded = session
            .observe(
                &event(TransferEventKind::ValidationError, &stranger)
                    .with_message("file.validation.size_exceeded"),
            )
            .unwrap();
        assert_eq!(forwarded.kind, SessionEventKind::ValidationError);
        assert_eq!(
            forwarded.message.as_deref(),
            Some("file.validation.size_exceeded")
        );
        assert_eq!(forwarded.files.len(), 1);
    }

    #[test]
    fn unknown_files_are_ignored() {
        let mut session = session_of(&[&loaded("a")]);
        let stranger = uploading(&loaded("z"));
        assert!(session
            .observe(&event(TransferEventKind::UploadProgress, &stranger))
            .is_none());
        assert_eq!(session.files()[0].status(), FileStatus::Loaded);
    }

    #[test]
    fn delete_start_and_end_bracket_overlapping_deletes() {
        let (a, b) = (done(&uploading(&loaded("a"))), done(&uploading(&loaded("b"))));
        let mut session = session_of(&[&a, &b]);

        let deleting = |f: &ManagedFile| {
            let mut f = f.clone();
            f.begin_delete().unwrap();
            f
        };
        let deleted = |f: &ManagedFile| {
            let mut f = deleting(f);
            f.complete_delete();
            f
        };

        let start = session.observe(&event(TransferEventKind::DeleteStart, &deleting(&a)));
        assert_eq!(start.map(|e| e.kind), Some(SessionEventKind::DeleteStart));
        assert!(session
            .observe(&event(TransferEventKind::DeleteStart, &deleting(&b)))
            .is_none());
        assert!(session
            .observe(&event(TransferEventKind::DeleteEnd, &deleted(&a)))
            .is_none());
        let end = session.observe(&event(TransferEventKind::DeleteEnd, &deleted(&b)));
        assert_eq!(end.map(|e| e.kind), Some(SessionEventKind::DeleteEnd));
    }
}
