use crate::keys::normalize_key;
use crate::traits::{
    report_progress, ObjectAcl, ProgressSender, PutObjectRequest, Transport, TransportError,
    TransportResult,
};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, ClientOptions, MultipartUpload, ObjectStore,
    ObjectStoreExt, PutMultipartOptions, PutOptions, PutPayload,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const ACL_HEADER: &str = "x-amz-acl";

/// S3 transport
///
/// Bodies up to `part_size` go out in one PUT; larger ones use a multipart upload so
/// progress can be reported after every part. The canned ACL travels as a default
/// `x-amz-acl` header, so one client is kept per `(bucket, acl)` pair.
pub struct S3Transport {
    bucket: String,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
    part_size: usize,
    stores: Mutex<HashMap<(String, ObjectAcl), Arc<AmazonS3>>>,
}

impl S3Transport {
    /// Create a new S3Transport instance
    ///
    /// # Arguments
    /// * `bucket` - Default S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    /// * `part_size` - Multipart part size in bytes
    pub fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        part_size: usize,
    ) -> TransportResult<Self> {
        let transport = S3Transport {
            bucket,
            region,
            endpoint_url,
            part_size: part_size.max(1),
            stores: Mutex::new(HashMap::new()),
        };
        // Fail early on bad credentials or endpoint configuration.
        transport.store_for(&transport.bucket, ObjectAcl::Private)?;
        Ok(transport)
    }

    fn build_store(&self, bucket: &str, acl: ObjectAcl) -> TransportResult<AmazonS3> {
        let mut headers = HeaderMap::new();
        headers.insert(ACL_HEADER, HeaderValue::from_static(acl.as_str()));

        let mut builder = AmazonS3Builder::from_env()
            .with_region(self.region.clone())
            .with_bucket_name(bucket.to_string())
            .with_client_options(ClientOptions::new().with_default_headers(headers));

        if let Some(ref endpoint) = self.endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        builder
            .build()
            .map_err(|e| TransportError::ConfigError(e.to_string()))
    }

    fn store_for(&self, bucket: &str, acl: ObjectAcl) -> TransportResult<Arc<AmazonS3>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| TransportError::BackendError("S3 client cache poisoned".to_string()))?;

        let cache_key = (bucket.to_string(), acl);
        if let Some(store) = stores.get(&cache_key) {
            return Ok(store.clone());
        }

        let store = Arc::new(self.build_store(bucket, acl)?);
        stores.insert(cache_key, store.clone());
        Ok(store)
    }

    fn attributes(request: &PutObjectRequest) -> Attributes {
        let mut attributes = Attributes::new();
        if let Some(ref content_type) = request.content_type {
            attributes.insert(
                Attribute::ContentType,
                AttributeValue::from(content_type.clone()),
            );
        }
        if let Some(ref storage_class) = request.storage_class {
            attributes.insert(
                Attribute::StorageClass,
                AttributeValue::from(storage_class.clone()),
            );
        }
        for (name, value) in &request.metadata {
            attributes.insert(
                Attribute::Metadata(Cow::Owned(name.clone())),
                AttributeValue::from(value.clone()),
            );
        }
        attributes
    }

    /// Generate public URL for S3 object
    ///
    /// For AWS S3, uses the standard format: https://{bucket}.s3.{region}.amazonaws.com/{key}
    /// For S3-compatible providers, uses path-style URLs on the endpoint
    fn generate_url(&self, bucket: &str, key: &str) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            let base_url = endpoint.trim_end_matches('/');
            format!("{}/{}/{}", base_url, bucket, key)
        } else {
            format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.region, key)
        }
    }

    async fn put_single(
        &self,
        store: &AmazonS3,
        location: &Path,
        body: Bytes,
        attributes: Attributes,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        let total = body.len() as u64;
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Aborted),
            result = store.put_opts(location, PutPayload::from(body), options) => {
                result.map_err(|e| TransportError::UploadFailed(e.to_string()))?;
            }
        }

        report_progress(progress, total, total);
        Ok(())
    }

    async fn put_multipart(
        &self,
        store: &AmazonS3,
        location: &Path,
        body: Bytes,
        attributes: Attributes,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        let total = body.len() as u64;
        let options = PutMultipartOptions {
            attributes,
            ..Default::default()
        };

        let mut upload = store
            .put_multipart_opts(location, options)
            .await
            .map_err(|e| TransportError::UploadFailed(e.to_string()))?;

        let mut offset = 0usize;
        while offset < body.len() {
            let end = (offset + self.part_size).min(body.len());
            let part = PutPayload::from(body.slice(offset..end));

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                result = upload.put_part(part) => Some(result),
            };

            match outcome {
                None => {
                    abort_quietly(&mut upload, location).await;
                    return Err(TransportError::Aborted);
                }
                Some(Err(e)) => {
                    abort_quietly(&mut upload, location).await;
                    return Err(TransportError::UploadFailed(e.to_string()));
                }
                Some(Ok(())) => {
                    offset = end;
                    report_progress(progress, offset as u64, total);
                }
            }
        }

        if cancel.is_cancelled() {
            abort_quietly(&mut upload, location).await;
            return Err(TransportError::Aborted);
        }

        upload
            .complete()
            .await
            .map_err(|e| TransportError::UploadFailed(e.to_string()))?;
        Ok(())
    }
}

async fn abort_quietly(upload: &mut Box<dyn MultipartUpload>, location: &Path) {
    if let Err(e) = upload.abort().await {
        tracing::warn!(error = %e, key = %location, "Failed to abort multipart upload");
    }
}

#[async_trait]
impl Transport for S3Transport {
    async fn put_object(
        &self,
        request: PutObjectRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> TransportResult<String> {
        let key = normalize_key(&request.key)?;
        let store = self.store_for(&request.bucket, request.acl)?;
        let location = Path::from(key.clone());
        let attributes = Self::attributes(&request);
        let size = request.content_length;

        let start = Instant::now();

        let result = if request.body.len() <= self.part_size {
            self.put_single(&store, &location, request.body.clone(), attributes, &progress, &cancel)
                .await
        } else {
            self.put_multipart(&store, &location, request.body.clone(), attributes, &progress, &cancel)
                .await
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    bucket = %request.bucket,
                    key = %key,
                    acl = %request.acl,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload successful"
                );
                Ok(self.generate_url(&request.bucket, &key))
            }
            Err(TransportError::Aborted) => {
                tracing::info!(
                    bucket = %request.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload aborted"
                );
                Err(TransportError::Aborted)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %request.bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload failed"
                );
                Err(e)
            }
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> TransportResult<()> {
        let key = normalize_key(key)?;
        let store = self.store_for(bucket, ObjectAcl::Private)?;
        let location = Path::from(key.clone());

        let start = Instant::now();

        store.delete(&location).await.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %bucket,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 delete failed"
            );
            TransportError::DeleteFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    fn default_bucket(&self) -> &str {
        &self.bucket
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
