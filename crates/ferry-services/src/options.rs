//! Per-call overrides for uploads and deletes.

use ferry_storage::ObjectAcl;
use std::collections::BTreeMap;

/// Metadata key carrying the URL-encoded original file name.
pub const ORIGINAL_NAME_METADATA: &str = "originalName";

/// Overrides for one upload. Unset fields fall back to the file's own attributes and the
/// transport's defaults; `metadata` entries are merged over the defaults, caller wins.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub content_type: Option<String>,
    pub acl: Option<ObjectAcl>,
    pub storage_class: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl UploadOptions {
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_acl(mut self, acl: ObjectAcl) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn with_storage_class(mut self, storage_class: impl Into<String>) -> Self {
        self.storage_class = Some(storage_class.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub bucket: Option<String>,
    pub key: Option<String>,
}

impl DeleteOptions {
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}
