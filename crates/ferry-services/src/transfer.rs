//! Transfer service
//!
//! Runs the upload and delete protocols for one file at a time. Each call moves the file
//! into a spawned task, which is its only writer until the task hands it back through the
//! returned [`TransferHandle`]. Observers follow along through the snapshots carried by
//! the per-file events.

use crate::error::{FailedTransfer, TransferError};
use crate::options::{DeleteOptions, UploadOptions, ORIGINAL_NAME_METADATA};
use ferry_core::models::event::emit;
use ferry_core::{EventSender, ManagedFile, TransferEvent, TransferEventKind};
use ferry_storage::{
    normalize_key, progress_channel, ObjectAcl, PutObjectRequest, TransferProgress, Transport,
    TransportError,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type InFlightSlot = Arc<Mutex<Option<CancellationToken>>>;

/// Handle to one running transfer.
///
/// `join` resolves to the file once the transfer ends. A completed or cancelled upload
/// resolves to `Ok` (check the file's status to tell them apart); a failed one resolves to
/// a [`FailedTransfer`] carrying the reverted file.
pub struct TransferHandle {
    name: String,
    cancel: CancellationToken,
    task: JoinHandle<Result<ManagedFile, FailedTransfer>>,
    // Returned if the task dies without handing the file back.
    fallback: ManagedFile,
}

impl TransferHandle {
    pub fn file_name(&self) -> &str {
        &self.name
    }

    /// Request cancellation of this transfer only.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<ManagedFile, FailedTransfer> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, file = %self.name, "Transfer task did not complete");
                Err(FailedTransfer::new(
                    self.fallback,
                    TransferError::Task(e.to_string()),
                ))
            }
        }
    }
}

/// Clears the service's in-flight slot when the upload task ends, however it ends.
struct InFlightGuard {
    slot: InFlightSlot,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

/// Upload/delete protocol driver bound to one transport.
///
/// An instance tracks at most one in-flight upload; use one instance per concurrent
/// upload. Deletes are not tracked and may overlap.
#[derive(Clone)]
pub struct TransferService {
    transport: Arc<dyn Transport>,
    in_flight: InFlightSlot,
    parent_cancel: Option<CancellationToken>,
}

impl TransferService {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            in_flight: Arc::new(Mutex::new(None)),
            parent_cancel: None,
        }
    }

    /// Derive every transfer token from `parent`, so cancelling it cancels all transfers
    /// started by this service.
    pub fn with_cancellation(mut self, parent: CancellationToken) -> Self {
        self.parent_cancel = Some(parent);
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn new_token(&self) -> CancellationToken {
        match self.parent_cancel {
            Some(ref parent) => parent.child_token(),
            None => CancellationToken::new(),
        }
    }

    /// Whether an upload is in flight on this instance.
    pub fn is_busy(&self) -> bool {
        self.in_flight.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Cancel the in-flight upload, if any.
    pub fn cancel(&self) {
        if let Ok(slot) = self.in_flight.lock() {
            if let Some(ref token) = *slot {
                tracing::debug!("Cancelling in-flight upload");
                token.cancel();
            }
        }
    }

    /// Start uploading `file` under the object key `destination`.
    ///
    /// UPLOAD_START has been emitted by the time this returns. The file is handed back
    /// untouched when the upload cannot start.
    pub fn upload(
        &self,
        mut file: ManagedFile,
        destination: &str,
        options: UploadOptions,
        events: EventSender,
    ) -> Result<TransferHandle, FailedTransfer> {
        let key = match normalize_key(options.key.as_deref().unwrap_or(destination)) {
            Ok(key) => key,
            Err(e) => return Err(FailedTransfer::new(file, e)),
        };

        let cancel = self.new_token();
        {
            let mut slot = match self.in_flight.lock() {
                Ok(slot) => slot,
                Err(_) => {
                    return Err(FailedTransfer::new(
                        file,
                        TransferError::Task("in-flight slot poisoned".to_string()),
                    ))
                }
            };
            if slot.is_some() {
                return Err(FailedTransfer::new(file, TransferError::Busy));
            }
            if let Err(e) = file.begin_upload() {
                return Err(FailedTransfer::new(file, e));
            }
            *slot = Some(cancel.clone());
        }
        let guard = InFlightGuard {
            slot: self.in_flight.clone(),
        };

        let request = self.put_request(&file, key, options);
        let mut fallback = file.clone();
        fallback.revert_upload();

        tracing::debug!(
            file = %file.name(),
            bucket = %request.bucket,
            key = %request.key,
            size_bytes = request.content_length,
            "Upload started"
        );
        emit(&events, TransferEvent::new(TransferEventKind::UploadStart, &file));

        let task = tokio::spawn(run_upload(
            self.transport.clone(),
            file,
            request,
            events,
            cancel.clone(),
            guard,
        ));

        Ok(TransferHandle {
            name: fallback.name().to_string(),
            cancel,
            task,
            fallback,
        })
    }

    fn put_request(&self, file: &ManagedFile, key: String, options: UploadOptions) -> PutObjectRequest {
        let mut metadata = BTreeMap::from([(
            ORIGINAL_NAME_METADATA.to_string(),
            urlencoding::encode(file.original_name()).into_owned(),
        )]);
        metadata.extend(options.metadata);

        let body = file.content().clone();
        PutObjectRequest {
            bucket: options
                .bucket
                .unwrap_or_else(|| self.transport.default_bucket().to_string()),
            key,
            content_length: body.len() as u64,
            body,
            content_type: options
                .content_type
                .or_else(|| file.mime_type().map(String::from)),
            acl: options
                .acl
                .unwrap_or_else(|| ObjectAcl::from_public(file.is_public())),
            storage_class: options
                .storage_class
                .or_else(|| file.storage_class().map(String::from)),
            metadata,
        }
    }

    /// Start deleting a previously uploaded file.
    ///
    /// Files that are not `Uploaded` are handed back with `FileError::InvalidState` and
    /// no events are emitted.
    pub fn delete(
        &self,
        mut file: ManagedFile,
        options: DeleteOptions,
        events: EventSender,
    ) -> Result<TransferHandle, FailedTransfer> {
        if let Err(e) = file.begin_delete() {
            return Err(FailedTransfer::new(file, e));
        }

        let raw_key = options
            .key
            .or_else(|| file.path().map(String::from))
            .unwrap_or_else(|| file.name().to_string());
        let key = match normalize_key(&raw_key) {
            Ok(key) => key,
            Err(e) => {
                file.revert_delete();
                return Err(FailedTransfer::new(file, e));
            }
        };
        let bucket = options
            .bucket
            .unwrap_or_else(|| self.transport.default_bucket().to_string());

        let cancel = self.new_token();
        let mut fallback = file.clone();
        fallback.revert_delete();

        emit(&events, TransferEvent::new(TransferEventKind::DeleteStart, &file));

        let task = tokio::spawn(run_delete(
            self.transport.clone(),
            file,
            bucket,
            key,
            events,
            cancel.clone(),
        ));

        Ok(TransferHandle {
            name: fallback.name().to_string(),
            cancel,
            task,
            fallback,
        })
    }
}

fn apply_progress(file: &mut ManagedFile, progress: TransferProgress, events: &EventSender) {
    file.record_progress(progress.loaded, progress.total);
    tracing::debug!(
        file = %file.name(),
        loaded = progress.loaded,
        total = progress.total,
        percentage = file.uploaded_percentage(),
        "Upload progress"
    );
    emit(events, TransferEvent::new(TransferEventKind::UploadProgress, file));
}

async fn run_upload(
    transport: Arc<dyn Transport>,
    mut file: ManagedFile,
    request: PutObjectRequest,
    events: EventSender,
    cancel: CancellationToken,
    guard: InFlightGuard,
) -> Result<ManagedFile, FailedTransfer> {
    let bucket = request.bucket.clone();
    let key = request.key.clone();
    let start = Instant::now();

    let (progress_tx, mut progress_rx) = progress_channel();
    let put = transport.put_object(request, progress_tx, cancel.clone());
    tokio::pin!(put);

    let result = loop {
        tokio::select! {
            biased;
            Some(progress) = progress_rx.recv() => apply_progress(&mut file, progress, &events),
            result = &mut put => break result,
        }
    };
    while let Ok(progress) = progress_rx.try_recv() {
        apply_progress(&mut file, progress, &events);
    }

    // The slot frees up before listeners hear about the end of the upload.
    drop(guard);

    match result {
        Ok(location) => {
            file.complete_upload(key.clone(), location);
            tracing::info!(
                file = %file.name(),
                bucket = %bucket,
                key = %key,
                size_bytes = file.size(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Upload successful"
            );
            emit(&events, TransferEvent::new(TransferEventKind::UploadSuccess, &file));
            Ok(file)
        }
        Err(e) if cancel.is_cancelled() || matches!(e, TransportError::Aborted) => {
            file.revert_upload();
            tracing::warn!(
                file = %file.name(),
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Upload cancelled"
            );
            emit(&events, TransferEvent::new(TransferEventKind::UploadCanceled, &file));
            Ok(file)
        }
        Err(e) => {
            file.revert_upload();
            tracing::error!(
                error = %e,
                file = %file.name(),
                bucket = %bucket,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Upload failed"
            );
            emit(
                &events,
                TransferEvent::new(TransferEventKind::UploadFailed, &file)
                    .with_message(e.to_string())
                    .with_param("key", key),
            );
            Err(FailedTransfer::new(file, e))
        }
    }
}

async fn run_delete(
    transport: Arc<dyn Transport>,
    mut file: ManagedFile,
    bucket: String,
    key: String,
    events: EventSender,
    cancel: CancellationToken,
) -> Result<ManagedFile, FailedTransfer> {
    let start = Instant::now();

    let result = tokio::select! {
        _ = cancel.cancelled() => Err(TransportError::Aborted),
        result = transport.delete_object(&bucket, &key) => result,
    };

    match result {
        Ok(()) => {
            file.complete_delete();
            tracing::info!(
                file = %file.name(),
                bucket = %bucket,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Delete successful"
            );
            emit(&events, TransferEvent::new(TransferEventKind::DeleteEnd, &file));
            emit(&events, TransferEvent::new(TransferEventKind::DeleteSuccess, &file));
            Ok(file)
        }
        Err(e) => {
            file.revert_delete();
            tracing::error!(
                error = %e,
                file = %file.name(),
                bucket = %bucket,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Delete failed"
            );
            emit(
                &events,
                TransferEvent::new(TransferEventKind::DeleteEnd, &file).with_message(e.to_string()),
            );
            Err(FailedTransfer::new(file, e))
        }
    }
}
