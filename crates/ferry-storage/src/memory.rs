//! In-memory transport with scriptable behaviour.
//!
//! Objects live in a map keyed by `(bucket, key)`. Uploads follow a [`PutScript`]: a list
//! of progress percentages reported in order, then an outcome. Scripts are matched by key
//! suffix, so callers can register one per file name before the key is known in full.

use crate::keys::normalize_key;
use crate::traits::{
    report_progress, ObjectAcl, ProgressSender, PutObjectRequest, Transport, TransportError,
    TransportResult,
};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const MEMORY_BUCKET: &str = "memory";

/// How a scripted upload ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Succeed,
    Fail(String),
    /// Keep the request open until its cancellation token fires.
    HoldUntilCancelled,
}

#[derive(Debug, Clone)]
pub struct PutScript {
    pub progress_steps: Vec<u8>,
    pub outcome: ScriptedOutcome,
    pub step_delay: Duration,
}

impl PutScript {
    pub fn succeed(progress_steps: Vec<u8>) -> Self {
        PutScript {
            progress_steps,
            outcome: ScriptedOutcome::Succeed,
            step_delay: Duration::ZERO,
        }
    }

    pub fn fail(progress_steps: Vec<u8>, message: impl Into<String>) -> Self {
        PutScript {
            progress_steps,
            outcome: ScriptedOutcome::Fail(message.into()),
            step_delay: Duration::ZERO,
        }
    }

    pub fn hold(progress_steps: Vec<u8>) -> Self {
        PutScript {
            progress_steps,
            outcome: ScriptedOutcome::HoldUntilCancelled,
            step_delay: Duration::ZERO,
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}

impl Default for PutScript {
    fn default() -> Self {
        PutScript::succeed(vec![100])
    }
}

/// An object as the memory transport stored it.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub acl: ObjectAcl,
    pub storage_class: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Default)]
struct MemoryState {
    objects: HashMap<(String, String), StoredObject>,
    scripts: Vec<(String, PutScript)>,
    failing_deletes: HashSet<String>,
    put_attempts: usize,
}

pub struct MemoryTransport {
    bucket: String,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_bucket(MEMORY_BUCKET)
    }

    pub fn with_bucket(bucket: impl Into<String>) -> Self {
        MemoryTransport {
            bucket: bucket.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> TransportResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| TransportError::BackendError("memory state poisoned".to_string()))
    }

    /// Register a script for every key ending with `key_suffix`. Later scripts win.
    pub fn script(&self, key_suffix: impl Into<String>, script: PutScript) {
        if let Ok(mut state) = self.lock() {
            state.scripts.push((key_suffix.into(), script));
        }
    }

    /// Make deletes of keys ending with `key_suffix` fail.
    pub fn fail_deletes_of(&self, key_suffix: impl Into<String>) {
        if let Ok(mut state) = self.lock() {
            state.failing_deletes.insert(key_suffix.into());
        }
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .ok()?
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().map(|s| s.objects.len()).unwrap_or(0)
    }

    pub fn put_attempts(&self) -> usize {
        self.lock().map(|s| s.put_attempts).unwrap_or(0)
    }

    fn script_for(&self, key: &str) -> TransportResult<PutScript> {
        let mut state = self.lock()?;
        state.put_attempts += 1;
        Ok(state
            .scripts
            .iter()
            .rev()
            .find(|(suffix, _)| key.ends_with(suffix.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_default())
    }

    fn generate_url(&self, bucket: &str, key: &str) -> String {
        format!("memory://{}/{}", bucket, key)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn put_object(
        &self,
        request: PutObjectRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> TransportResult<String> {
        let key = normalize_key(&request.key)?;
        let script = self.script_for(&key)?;
        let total = request.content_length;

        for percentage in &script.progress_steps {
            if !script.step_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransportError::Aborted),
                    _ = tokio::time::sleep(script.step_delay) => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
            if cancel.is_cancelled() {
                return Err(TransportError::Aborted);
            }
            let loaded = total * u64::from((*percentage).min(100)) / 100;
            report_progress(&progress, loaded, total);
        }

        match script.outcome {
            ScriptedOutcome::Succeed => {}
            ScriptedOutcome::Fail(message) => {
                tracing::debug!(key = %key, error = %message, "Scripted upload failure");
                return Err(TransportError::UploadFailed(message));
            }
            ScriptedOutcome::HoldUntilCancelled => {
                cancel.cancelled().await;
                return Err(TransportError::Aborted);
            }
        }

        if cancel.is_cancelled() {
            return Err(TransportError::Aborted);
        }

        let url = self.generate_url(&request.bucket, &key);
        let object = StoredObject {
            body: request.body,
            content_type: request.content_type,
            acl: request.acl,
            storage_class: request.storage_class,
            metadata: request.metadata,
        };
        self.lock()?.objects.insert((request.bucket, key), object);

        Ok(url)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> TransportResult<()> {
        let key = normalize_key(key)?;
        tokio::task::yield_now().await;

        let mut state = self.lock()?;
        if state
            .failing_deletes
            .iter()
            .any(|suffix| key.ends_with(suffix.as_str()))
        {
            return Err(TransportError::DeleteFailed(format!(
                "scripted delete failure for {}",
                key
            )));
        }
        state.objects.remove(&(bucket.to_string(), key));
        Ok(())
    }

    fn default_bucket(&self) -> &str {
        &self.bucket
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
