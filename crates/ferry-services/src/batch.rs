//! Batch runner
//!
//! Drives a whole set of files through load, validation, and concurrent upload (or
//! delete), publishing per-file and session events on broadcast channels. Subscribe
//! before starting a batch to see every event.

use crate::error::{FailedTransfer, SessionError};
use crate::options::{DeleteOptions, UploadOptions};
use crate::session::UploadSession;
use crate::transfer::{TransferHandle, TransferService};
use ferry_core::models::event::emit;
use ferry_core::{
    event_channel, EventReceiver, FerryConfig, FileStatus, FileValidator, ManagedFile,
    RawSource, SessionEvent, SessionEventKind, SessionId, TransferEvent, TransferEventKind,
};
use ferry_storage::{object_key, Transport};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// A source that never made it into the session.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub original_name: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub file: ManagedFile,
    pub error: String,
}

impl From<FailedTransfer> for FailedFile {
    fn from(failed: FailedTransfer) -> Self {
        FailedFile {
            error: failed.error.to_string(),
            file: failed.file,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub session_id: SessionId,
    pub uploaded: Vec<ManagedFile>,
    pub failed: Vec<FailedFile>,
    pub cancelled: Vec<ManagedFile>,
    pub rejected: Vec<Rejection>,
}

impl BatchReport {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            uploaded: Vec::new(),
            failed: Vec::new(),
            cancelled: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub session_id: SessionId,
    pub deleted: Vec<ManagedFile>,
    pub failed: Vec<FailedFile>,
}

pub struct BatchRunner {
    transport: Arc<dyn Transport>,
    validator: Arc<dyn FileValidator>,
    upload_dir: String,
    public: bool,
    storage_class: Option<String>,
    cancel: CancellationToken,
    file_events: broadcast::Sender<TransferEvent>,
    session_events: broadcast::Sender<SessionEvent>,
}

impl BatchRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        validator: Arc<dyn FileValidator>,
        config: &FerryConfig,
    ) -> Self {
        let buffer = config.event_buffer_size.max(1);
        let (file_events, _) = broadcast::channel(buffer);
        let (session_events, _) = broadcast::channel(buffer);

        Self {
            transport,
            validator,
            upload_dir: config.upload_dir.clone(),
            public: config.public_files,
            storage_class: config.default_storage_class.clone(),
            cancel: CancellationToken::new(),
            file_events,
            session_events,
        }
    }

    pub fn with_upload_dir(mut self, upload_dir: impl Into<String>) -> Self {
        self.upload_dir = upload_dir.into();
        self
    }

    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub fn with_storage_class(mut self, storage_class: Option<String>) -> Self {
        self.storage_class = storage_class;
        self
    }

    pub fn subscribe_files(&self) -> broadcast::Receiver<TransferEvent> {
        self.file_events.subscribe()
    }

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_events.subscribe()
    }

    /// Cancel every transfer this runner has in flight. Transfers started afterwards are
    /// cancelled immediately.
    pub fn cancel_all(&self) {
        tracing::info!("Cancelling all transfers");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn service(&self) -> TransferService {
        TransferService::new(self.transport.clone()).with_cancellation(self.cancel.clone())
    }

    fn forward(&self, session: &mut UploadSession, event: TransferEvent) {
        let derived = session.observe(&event);
        // Nobody listening is fine.
        let _ = self.file_events.send(event);
        if let Some(session_event) = derived {
            let _ = self.session_events.send(session_event);
        }
    }

    /// Forward events until every handle has resolved, then flush what is left.
    async fn pump(
        &self,
        session: &mut UploadSession,
        events: &mut EventReceiver,
        handles: Vec<TransferHandle>,
    ) -> Vec<Result<ManagedFile, FailedTransfer>> {
        let joined = futures::future::join_all(handles.into_iter().map(TransferHandle::join));
        tokio::pin!(joined);

        let outcomes = loop {
            tokio::select! {
                Some(event) = events.recv() => self.forward(session, event),
                outcomes = &mut joined => break outcomes,
            }
        };
        while let Ok(event) = events.try_recv() {
            self.forward(session, event);
        }
        outcomes
    }

    /// Load, validate and upload `sources` as one session.
    ///
    /// Sources that cannot be loaded or fail validation are reported as rejected and never
    /// transferred. Accepted files go to `<upload_dir>/<name>` concurrently. The batch
    /// errors when any upload failed for a reason other than cancellation.
    pub async fn upload(&self, sources: Vec<RawSource>) -> Result<BatchReport, SessionError> {
        let start = Instant::now();
        let mut session = UploadSession::new();
        let mut report = BatchReport::new(session.id().clone());
        let (events_tx, mut events_rx) = event_channel();
        let mut accepted = Vec::new();

        for source in sources {
            let original_name = source.original_name.clone();
            let mut file = match ManagedFile::from_source(source) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!(error = %e, original_name = %original_name, "Source rejected");
                    report.rejected.push(Rejection {
                        original_name,
                        reasons: vec![e.to_string()],
                    });
                    continue;
                }
            };
            file.set_public(self.public);
            file.set_storage_class(self.storage_class.clone());
            emit(&events_tx, TransferEvent::new(TransferEventKind::Load, &file));

            let (findings_tx, mut findings_rx) = event_channel();
            let valid = self.validator.validate(&file, &findings_tx);
            let mut reasons = Vec::new();
            while let Ok(finding) = findings_rx.try_recv() {
                reasons.extend(finding.message.clone());
                emit(&events_tx, finding);
            }

            if !valid {
                tracing::debug!(
                    file = %file.name(),
                    original_name = %original_name,
                    findings = reasons.len(),
                    "File failed validation"
                );
                report.rejected.push(Rejection {
                    original_name,
                    reasons,
                });
                continue;
            }

            session.enroll(&file);
            accepted.push(file);
        }

        while let Ok(event) = events_rx.try_recv() {
            self.forward(&mut session, event);
        }
        let _ = self
            .session_events
            .send(session.event(SessionEventKind::Load));

        let mut handles = Vec::with_capacity(accepted.len());
        for file in accepted {
            let key = object_key(&self.upload_dir, file.name());
            match self
                .service()
                .upload(file, &key, UploadOptions::default(), events_tx.clone())
            {
                Ok(handle) => handles.push(handle),
                Err(failed) => report.failed.push(failed.into()),
            }
        }
        drop(events_tx);

        for outcome in self.pump(&mut session, &mut events_rx, handles).await {
            match outcome {
                Ok(file) if file.status() == FileStatus::Uploaded => report.uploaded.push(file),
                Ok(file) => report.cancelled.push(file),
                Err(failed) => report.failed.push(failed.into()),
            }
        }

        tracing::info!(
            session = %report.session_id,
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            rejected = report.rejected.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Batch upload finished"
        );

        if !report.failed.is_empty() {
            return Err(SessionError::UploadsFailed {
                failed: report.failed.len(),
                total: session.len(),
                report: Box::new(report),
            });
        }
        Ok(report)
    }

    /// Delete previously uploaded files as one session.
    pub async fn delete(&self, files: Vec<ManagedFile>) -> Result<DeleteReport, SessionError> {
        let start = Instant::now();
        let mut session = UploadSession::new();
        let mut report = DeleteReport {
            session_id: session.id().clone(),
            deleted: Vec::new(),
            failed: Vec::new(),
        };
        let (events_tx, mut events_rx) = event_channel();
        let service = self.service();

        let mut handles = Vec::with_capacity(files.len());
        for file in files {
            session.enroll(&file);
            match service.delete(file, DeleteOptions::default(), events_tx.clone()) {
                Ok(handle) => handles.push(handle),
                Err(failed) => report.failed.push(failed.into()),
            }
        }
        drop(events_tx);

        for outcome in self.pump(&mut session, &mut events_rx, handles).await {
            match outcome {
                Ok(file) => report.deleted.push(file),
                Err(failed) => report.failed.push(failed.into()),
            }
        }

        tracing::info!(
            session = %report.session_id,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Batch delete finished"
        );

        if !report.failed.is_empty() {
            return Err(SessionError::DeletesFailed {
                failed: report.failed.len(),
                total: session.len(),
                report: Box::new(report),
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::ManagedFileValidator;
    use ferry_storage::{MemoryTransport, PutScript};

    fn runner(transport: Arc<MemoryTransport>) -> BatchRunner {
        let validator = Arc::new(ManagedFileValidator::new(1024, Vec::new()));
        BatchRunner::new(transport, validator, &FerryConfig::default())
    }

    fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn two_files_end_after_both_uploaded() {
        let transport = Arc::new(MemoryTransport::new());
        transport.script(".jpg", PutScript::succeed(vec![30, 60, 100]));
        transport.script(".png", PutScript::succeed(vec![50, 100]));
        let runner = runner(transport.clone());
        let mut session_rx = runner.subscribe_session();

        let report = runner
            .upload(vec![
                RawSource::new(&b"first file"[..], "a.jpg"),
                RawSource::new(&b"second file"[..], "b.png"),
            ])
            .await
            .unwrap();

        assert_eq!(report.uploaded.len(), 2);
        assert_eq!(transport.object_count(), 2);
        for file in &report.uploaded {
            assert_eq!(file.path(), Some(format!("uploads/{}", file.name()).as_str()));
        }

        let events = drain(&mut session_rx);
        assert_eq!(events[0].kind, SessionEventKind::Load);
        assert_eq!(events[0].files.len(), 2);

        let ends: Vec<&SessionEvent> = events
            .iter()
            .filter(|e| e.kind == SessionEventKind::UploadEnd)
            .collect();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].uploaded_count, 2);
        assert_eq!(ends[0].progress, 100);
        assert_eq!(events.last().map(|e| e.kind), Some(SessionEventKind::UploadEnd));

        let progress: Vec<u8> = events
            .iter()
            .filter(|e| e.kind == SessionEventKind::UploadProgress)
            .map(|e| e.progress)
            .collect();
        assert_eq!(progress.len(), 5);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(events.iter().all(|e| e.id == report.session_id));
    }

    #[tokio::test]
    async fn per_file_events_are_ordered() {
        let transport = Arc::new(MemoryTransport::new());
        let runner = runner(transport);
        let mut files_rx = runner.subscribe_files();

        let report = runner
            .upload(vec![RawSource::new(&b"payload"[..], "a.txt")])
            .await
            .unwrap();

        let kinds: Vec<TransferEventKind> = drain(&mut files_rx).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TransferEventKind::Load,
                TransferEventKind::UploadStart,
                TransferEventKind::UploadProgress,
                TransferEventKind::UploadSuccess,
            ]
        );
        assert_eq!(report.uploaded[0].status(), FileStatus::Uploaded);
    }

    #[tokio::test]
    async fn invalid_and_oversized_sources_are_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        let runner = runner(transport.clone());
        let mut session_rx = runner.subscribe_session();

        let report = runner
            .upload(vec![
                RawSource::new(&b""[..], "empty.txt"),
                RawSource::new(vec![0u8; 4096], "big.bin"),
                RawSource::new(&b"ok"[..], "ok.txt"),
            ])
            .await
            .unwrap();

        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].original_name, "empty.txt");
        assert_eq!(report.rejected[1].original_name, "big.bin");
        assert_eq!(
            report.rejected[1].reasons,
            vec!["file.validation.size_exceeded".to_string()]
        );
        assert_eq!(transport.put_attempts(), 1);

        let events = drain(&mut session_rx);
        let validation: Vec<&SessionEvent> = events
            .iter()
            .filter(|e| e.kind == SessionEventKind::ValidationError)
            .collect();
        assert_eq!(validation.len(), 1);
        assert_eq!(
            validation[0].message.as_deref(),
            Some("file.validation.size_exceeded")
        );
        let load = events
            .iter()
            .find(|e| e.kind == SessionEventKind::Load)
            .unwrap();
        assert_eq!(load.files.len(), 1);
    }

    #[tokio::test]
    async fn failed_upload_fails_the_batch() {
        let transport = Arc::new(MemoryTransport::new());
        transport.script(".bad", PutScript::fail(vec![], "access denied"));
        let runner = runner(transport);

        let err = runner
            .upload(vec![
                RawSource::new(&b"good"[..], "good.txt"),
                RawSource::new(&b"bad"[..], "x.bad"),
            ])
            .await
            .unwrap_err();

        match err {
            SessionError::UploadsFailed {
                failed,
                total,
                report,
            } => {
                assert_eq!((failed, total), (1, 2));
                assert_eq!(report.uploaded.len(), 1);
                assert!(report.failed[0].error.contains("access denied"));
                assert_eq!(report.failed[0].file.status(), FileStatus::Loaded);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancel_all_cancels_in_flight_uploads() {
        let transport = Arc::new(MemoryTransport::new());
        transport.script(".bin", PutScript::hold(vec![20]));
        let runner = runner(transport.clone());
        let mut session_rx = runner.subscribe_session();

        let (result, _) = tokio::join!(
            runner.upload(vec![
                RawSource::new(&b"one"[..], "one.bin"),
                RawSource::new(&b"two"[..], "two.bin"),
            ]),
            async {
                tokio::task::yield_now().await;
                runner.cancel_all();
            }
        );

        let report = result.unwrap();
        assert_eq!(report.cancelled.len(), 2);
        assert!(report.uploaded.is_empty());
        assert!(report
            .cancelled
            .iter()
            .all(|f| f.status() == FileStatus::Loaded));
        assert_eq!(transport.object_count(), 0);
        assert!(!drain(&mut session_rx)
            .iter()
            .any(|e| e.kind == SessionEventKind::UploadEnd));
    }

    #[tokio::test]
    async fn batch_delete_brackets_with_session_events() {
        let transport = Arc::new(MemoryTransport::new());
        let runner = runner(transport.clone());
        let report = runner
            .upload(vec![
                RawSource::new(&b"one"[..], "one.txt"),
                RawSource::new(&b"two"[..], "two.txt"),
            ])
            .await
            .unwrap();
        let mut session_rx = runner.subscribe_session();

        let deleted = runner.delete(report.uploaded).await.unwrap();

        assert_eq!(deleted.deleted.len(), 2);
        assert!(deleted
            .deleted
            .iter()
            .all(|f| f.status() == FileStatus::Deleted));
        assert_eq!(transport.object_count(), 0);

        let kinds: Vec<SessionEventKind> = drain(&mut session_rx).iter().map(|e| e.kind).collect();
        assert_eq!(kinds.first(), Some(&SessionEventKind::DeleteStart));
        assert_eq!(kinds.last(), Some(&SessionEventKind::DeleteEnd));
    }

    #[tokio::test]
    async fn deleting_never_uploaded_files_fails_the_batch() {
        let transport = Arc::new(MemoryTransport::new());
        let runner = runner(transport);
        let file = ManagedFile::from_source(RawSource::new(&b"x"[..], "x.txt")).unwrap();

        let err = runner.delete(vec![file]).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::DeletesFailed { failed: 1, total: 1, .. }
        ));
    }
}
