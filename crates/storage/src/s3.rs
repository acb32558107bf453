//! S3 object store
//!
//! Provides S3-compatible uploads with:
//! - Multipart uploads for large files
//! - Custom endpoint support (for MinIO, LocalStack, etc.)
//!
//! Failures are returned as-is; callers decide whether to retry.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::Builder as S3ConfigBuilder,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use runtime_core::{Error, Result};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument, warn};

use crate::backend::{validate_container, validate_key};
use crate::ObjectStore;

/// Threshold for switching to multipart upload (5 MB)
const MULTIPART_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Part size for multipart uploads (5 MB minimum required by S3)
const MULTIPART_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3-compatible object store
///
/// Supports Amazon S3 and S3-compatible services like MinIO. The container
/// passed to each call is used as the bucket name.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

/// Configuration for S3ObjectStore
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Optional custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// AWS region (default: "us-east-1")
    pub region: Option<String>,
    /// Force path-style addressing (required for MinIO)
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: Some("us-east-1".to_string()),
            force_path_style: false,
        }
    }
}

impl S3ObjectStore {
    /// Create a new S3ObjectStore with default AWS configuration
    ///
    /// Uses environment variables or instance profile for credentials.
    pub async fn new() -> Self {
        Self::with_config(S3Config::default()).await
    }

    /// Create a new S3ObjectStore with custom configuration
    pub async fn with_config(config: S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(
                config.region.unwrap_or_else(|| "us-east-1".to_string()),
            ))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(endpoint) = &config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(s3_config_builder.build()),
        }
    }

    /// Create S3ObjectStore for MinIO (convenience constructor)
    pub async fn minio(endpoint: &str) -> Self {
        Self::with_config(S3Config {
            endpoint_url: Some(endpoint.to_string()),
            force_path_style: true,
            ..Default::default()
        })
        .await
    }

    /// Upload a file in fixed-size parts
    async fn multipart_upload(&self, bucket: &str, key: &str, local_path: &Path) -> Result<u64> {
        let create_result = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to initiate multipart upload: {}", e),
            })?;

        let upload_id = create_result.upload_id().ok_or_else(|| Error::Storage {
            message: "No upload_id returned".to_string(),
        })?;

        debug!(key, upload_id, "Started multipart upload");

        match self.upload_parts(bucket, key, upload_id, local_path).await {
            Ok(size) => {
                debug!(key, size, "Completed multipart upload");
                Ok(size)
            }
            Err(e) => {
                self.abort_multipart_upload(bucket, key, upload_id).await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        local_path: &Path,
    ) -> Result<u64> {
        let mut file = tokio::fs::File::open(local_path).await?;
        let mut completed_parts = Vec::new();
        let mut part_number = 1;
        let mut size = 0u64;

        loop {
            let part = read_part(&mut file, MULTIPART_PART_SIZE).await?;
            if part.is_empty() {
                break;
            }
            let part_len = part.len() as u64;

            let upload_part_result = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(|e| Error::Storage {
                    message: format!("Failed to upload part {}: {}", part_number, e),
                })?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(upload_part_result.e_tag().map(String::from))
                    .build(),
            );

            debug!(part_number, part_len, "Uploaded part");
            size += part_len;
            part_number += 1;
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to complete multipart upload: {}", e),
            })?;

        Ok(size)
    }

    /// Abort a multipart upload (best effort, for cleanup)
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(key, upload_id, error = %e, "Failed to abort multipart upload");
        }
    }
}

/// Fill a buffer of up to `part_size` bytes, short only at end of file
async fn read_part(file: &mut tokio::fs::File, part_size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; part_size];
    let mut filled = 0;
    while filled < part_size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, local_path), fields(backend = "s3"))]
    async fn put(&self, container: &str, key: &str, local_path: &Path) -> Result<u64> {
        validate_container(container)?;
        validate_key(key)?;

        let size = tokio::fs::metadata(local_path).await?.len();
        debug!(key, size, "Uploading to S3");

        if size > MULTIPART_THRESHOLD {
            return self.multipart_upload(container, key, local_path).await;
        }

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to open {:?} for upload: {}", local_path, e),
            })?;

        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Storage {
                message: format!("S3 put_object failed: {}", e),
            })?;

        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, container: &str, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(container)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") || e.to_string().contains("404") {
                    Ok(false)
                } else {
                    Err(Error::Storage {
                        message: format!("S3 head_object failed: {}", e),
                    })
                }
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(container)
                .prefix(prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| Error::Storage {
                message: format!("S3 list_objects failed: {}", e),
            })?;

            results.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(String::from)),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        results.sort();
        debug!(count = results.len(), "Found S3 objects");
        Ok(results)
    }
}
