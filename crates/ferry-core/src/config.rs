//! Configuration module
//!
//! Settings for the storage transport, upload defaults, and the validator, read from the
//! environment (and a `.env` file when present).

use std::env;

use crate::storage_types::StorageBackend;
use crate::validation::CheckKind;

const UPLOAD_DIR: &str = "uploads";
const UPLOAD_PART_SIZE_MB: u64 = 5;
const MIN_UPLOAD_PART_SIZE_MB: u64 = 5;
const MAX_FILE_SIZE_MB: u64 = 100;
const EVENT_BUFFER_SIZE: usize = 256;

#[derive(Clone, Debug)]
pub struct FerryConfig {
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, etc.)
    pub aws_region: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    // Upload defaults
    pub upload_dir: String,
    pub upload_part_size_bytes: u64,
    pub default_storage_class: Option<String>,
    pub public_files: bool,
    pub event_buffer_size: usize,
    // Validation
    pub max_file_size_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub min_image_width: Option<u32>,
    pub min_image_height: Option<u32>,
    pub validation_checks: Vec<CheckKind>,
}

impl FerryConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup. `from_env` passes the process
    /// environment.
    pub fn from_vars<F>(var: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_backend = match var("STORAGE_BACKEND") {
            Some(s) => s.parse()?,
            None => StorageBackend::S3,
        };

        let part_size_mb = var("UPLOAD_PART_SIZE_MB")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(UPLOAD_PART_SIZE_MB)
            .max(MIN_UPLOAD_PART_SIZE_MB);

        let max_file_size_mb = var("MAX_FILE_SIZE_MB")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(MAX_FILE_SIZE_MB);

        let allowed_content_types = var("ALLOWED_CONTENT_TYPES")
            .map(|s| split_list(&s))
            .unwrap_or_default();

        let validation_checks = match var("VALIDATION_CHECKS") {
            Some(s) => split_list(&s)
                .iter()
                .map(|c| c.parse::<CheckKind>())
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![CheckKind::Size],
        };

        Ok(FerryConfig {
            storage_backend,
            s3_bucket: var("S3_BUCKET"),
            s3_region: var("S3_REGION"),
            s3_endpoint: var("S3_ENDPOINT"),
            aws_region: var("AWS_REGION"),
            local_storage_path: var("LOCAL_STORAGE_PATH"),
            local_storage_base_url: var("LOCAL_STORAGE_BASE_URL"),
            upload_dir: var("UPLOAD_DIR")
                .map(|s| s.trim_matches('/').to_string())
                .unwrap_or_else(|| UPLOAD_DIR.to_string()),
            upload_part_size_bytes: part_size_mb * 1024 * 1024,
            default_storage_class: var("DEFAULT_STORAGE_CLASS").filter(|s| !s.is_empty()),
            public_files: var("PUBLIC_FILES")
                .unwrap_or_else(|| "false".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(false),
            event_buffer_size: var("EVENT_BUFFER_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(EVENT_BUFFER_SIZE),
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            allowed_content_types,
            min_image_width: var("MIN_IMAGE_WIDTH").and_then(|s| s.parse().ok()),
            min_image_height: var("MIN_IMAGE_HEIGHT").and_then(|s| s.parse().ok()),
            validation_checks,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    anyhow::bail!("S3_BUCKET must be set when STORAGE_BACKEND=s3");
                }
                if self.s3_region().is_none() {
                    anyhow::bail!("S3_REGION or AWS_REGION must be set when STORAGE_BACKEND=s3");
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    anyhow::bail!("LOCAL_STORAGE_PATH must be set when STORAGE_BACKEND=local");
                }
            }
            StorageBackend::Memory => {}
        }

        if self.event_buffer_size == 0 {
            anyhow::bail!("EVENT_BUFFER_SIZE must be greater than zero");
        }

        Ok(())
    }

    /// S3 region, falling back to the generic AWS region.
    pub fn s3_region(&self) -> Option<&str> {
        self.s3_region.as_deref().or(self.aws_region.as_deref())
    }
}

impl Default for FerryConfig {
    fn default() -> Self {
        FerryConfig {
            storage_backend: StorageBackend::Memory,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            aws_region: None,
            local_storage_path: None,
            local_storage_base_url: None,
            upload_dir: UPLOAD_DIR.to_string(),
            upload_part_size_bytes: UPLOAD_PART_SIZE_MB * 1024 * 1024,
            default_storage_class: None,
            public_files: false,
            event_buffer_size: EVENT_BUFFER_SIZE,
            max_file_size_bytes: MAX_FILE_SIZE_MB * 1024 * 1024,
            allowed_content_types: Vec::new(),
            min_image_width: None,
            min_image_height: None,
            validation_checks: vec![CheckKind::Size],
        }
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
