#[cfg(feature = "storage-local")]
use crate::LocalTransport;
#[cfg(feature = "storage-memory")]
use crate::MemoryTransport;
#[cfg(feature = "storage-s3")]
use crate::S3Transport;
use crate::{StorageBackend, Transport, TransportError, TransportResult};
use ferry_core::FerryConfig;
use std::sync::Arc;

/// Create a transport based on configuration
pub async fn create_transport(config: &FerryConfig) -> TransportResult<Arc<dyn Transport>> {
    match config.storage_backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .ok_or_else(|| TransportError::ConfigError("S3_BUCKET not configured".to_string()))?;
            let region = config.s3_region().map(String::from).ok_or_else(|| {
                TransportError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
            })?;
            let endpoint = config.s3_endpoint.clone();
            let part_size = usize::try_from(config.upload_part_size_bytes).map_err(|_| {
                TransportError::ConfigError("UPLOAD_PART_SIZE_MB out of range".to_string())
            })?;

            let transport = S3Transport::new(bucket, region, endpoint, part_size)?;
            Ok(Arc::new(transport))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(TransportError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let base_path = config.local_storage_path.clone().ok_or_else(|| {
                TransportError::ConfigError("LOCAL_STORAGE_PATH not configured".to_string())
            })?;
            let base_url = config
                .local_storage_base_url
                .clone()
                .unwrap_or_else(|| format!("file://{}", base_path.trim_end_matches('/')));

            let transport = LocalTransport::new(base_path, base_url).await?;
            Ok(Arc::new(transport))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(TransportError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-memory")]
        StorageBackend::Memory => Ok(Arc::new(MemoryTransport::new())),

        #[cfg(not(feature = "storage-memory"))]
        StorageBackend::Memory => Err(TransportError::ConfigError(
            "Memory storage backend not available (storage-memory feature not enabled)".to_string(),
        )),
    }
}
