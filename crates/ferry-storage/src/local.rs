use crate::keys::normalize_key;
use crate::traits::{
    report_progress, ProgressSender, PutObjectRequest, Transport, TransportError,
    TransportResult,
};
use crate::StorageBackend;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem transport
///
/// Buckets map to top-level directories below `base_path`; the default bucket is the
/// base directory itself. ACL, storage class and metadata have no filesystem
/// counterpart and are ignored.
#[derive(Clone)]
pub struct LocalTransport {
    base_path: PathBuf,
    base_url: String,
}

impl LocalTransport {
    /// Create a new LocalTransport instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/ferry/files")
    /// * `base_url` - Base URL under which stored files are served
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> TransportResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            TransportError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalTransport {
            base_path,
            base_url,
        })
    }

    fn object_path(&self, bucket: &str, key: &str) -> TransportResult<(String, PathBuf)> {
        let key = normalize_key(key)?;
        let relative = if bucket.is_empty() {
            key.clone()
        } else {
            format!("{}/{}", normalize_key(bucket)?, key)
        };
        let path = self.key_to_path(&relative)?;
        Ok((relative, path))
    }

    /// Convert a relative key to a filesystem path, rejecting anything that would
    /// escape the base directory.
    fn key_to_path(&self, relative: &str) -> TransportResult<PathBuf> {
        if relative.split('/').any(|segment| segment == "..") || relative.starts_with('/') {
            return Err(TransportError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let path = self.base_path.join(relative);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            TransportError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(TransportError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    fn generate_url(&self, relative: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), relative)
    }

    async fn ensure_parent_dir(&self, path: &Path) -> TransportResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn write_chunks(
        &self,
        path: &Path,
        request: &PutObjectRequest,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        let mut file = fs::File::create(path).await.map_err(|e| {
            TransportError::UploadFailed(format!(
                "Failed to create file {}: {}",
                path.display(),
                e
            ))
        })?;

        let total = request.body.len() as u64;
        let mut loaded = 0u64;
        for chunk in request.body.chunks(WRITE_CHUNK_SIZE) {
            if cancel.is_cancelled() {
                return Err(TransportError::Aborted);
            }
            file.write_all(chunk).await.map_err(|e| {
                TransportError::UploadFailed(format!(
                    "Failed to write file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            loaded += chunk.len() as u64;
            report_progress(progress, loaded, total);
            tokio::task::yield_now().await;
        }

        file.sync_all().await.map_err(|e| {
            TransportError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        Ok(())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn put_object(
        &self,
        request: PutObjectRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> TransportResult<String> {
        let (relative, path) = self.object_path(&request.bucket, &request.key)?;
        self.ensure_parent_dir(&path).await?;

        let start = Instant::now();

        if let Err(e) = self.write_chunks(&path, &request, &progress, &cancel).await {
            // Never leave a partial object behind.
            let _ = fs::remove_file(&path).await;
            tracing::warn!(
                error = %e,
                path = %path.display(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Local storage upload stopped"
            );
            return Err(e);
        }

        tracing::info!(
            path = %path.display(),
            key = %relative,
            size_bytes = request.content_length,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(self.generate_url(&relative))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> TransportResult<()> {
        let (relative, path) = self.object_path(bucket, key)?;
        let start = Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key = %relative, "Local storage delete of missing object");
                return Ok(());
            }
            Err(e) => {
                return Err(TransportError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %relative,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    fn default_bucket(&self) -> &str {
        ""
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use crate::traits::{progress_channel, ObjectAcl};
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn request(bucket: &str, key: &str, body: Vec<u8>) -> PutObjectRequest {
        PutObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_length: body.len() as u64,
            body: Bytes::from(body),
            content_type: Some("text/plain".to_string()),
            acl: ObjectAcl::Private,
            storage_class: None,
            metadata: BTreeMap::new(),
        }
    }

    async fn transport(dir: &TempDir) -> LocalTransport {
        LocalTransport::new(dir.path(), "http://localhost:3000/files".to_string())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_upload_reports_progress() {
        let temp_dir = TempDir::new().unwrap();
        let transport = transport(&temp_dir).await;
        let body = vec![7u8; WRITE_CHUNK_SIZE * 2 + 10];
        let (tx, mut rx) = progress_channel();

        let url = transport
            .put_object(request("", "uploads/a.txt", body.clone()), tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(url, "http://localhost:3000/files/uploads/a.txt");
        let stored = std::fs::read(temp_dir.path().join("uploads/a.txt")).unwrap();
        assert_eq!(stored, body);

        let mut reports = Vec::new();
        while let Ok(p) = rx.try_recv() {
            reports.push(p.loaded);
        }
        assert_eq!(reports.len(), 3);
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*reports.last().unwrap(), body.len() as u64);
    }

    #[tokio::test]
    async fn test_bucket_maps_to_directory() {
        let temp_dir = TempDir::new().unwrap();
        let transport = transport(&temp_dir).await;
        let (tx, _rx) = progress_channel();

        transport
            .put_object(request("archive", "/x.txt", b"x".to_vec()), tx, CancellationToken::new())
            .await
            .unwrap();

        assert!(temp_dir.path().join("archive/x.txt").exists());
        transport.delete_object("archive", "x.txt").await.unwrap();
        assert!(!temp_dir.path().join("archive/x.txt").exists());
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let transport = transport(&temp_dir).await;
        let (tx, _rx) = progress_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = transport
            .put_object(request("", "uploads/c.txt", vec![1u8; 1024]), tx, cancel)
            .await;

        assert!(matches!(result, Err(TransportError::Aborted)));
        assert!(!temp_dir.path().join("uploads/c.txt").exists());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let transport = transport(&temp_dir).await;

        let result = transport.delete_object("", "../etc/passwd").await;
        assert!(matches!(result, Err(TransportError::InvalidKey(_))));

        let result = transport.delete_object("..", "passwd").await;
        assert!(matches!(result, Err(TransportError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_local_delete_nonexistent_succeeds() {
        let temp_dir = TempDir::new().unwrap();
        let transport = transport(&temp_dir).await;

        transport
            .delete_object("", "nonexistent/file.txt")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dots_inside_segments_are_allowed() {
        let temp_dir = TempDir::new().unwrap();
        let transport = transport(&temp_dir).await;
        let (tx, _rx) = progress_channel();

        let url = transport
            .put_object(
                request("", "uploads/v1..final.txt", b"v1".to_vec()),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(url, "http://localhost:3000/files/uploads/v1..final.txt");
        assert!(temp_dir.path().join("uploads/v1..final.txt").exists());
        transport
            .delete_object("", "uploads/v1..final.txt")
            .await
            .unwrap();
    }
}
