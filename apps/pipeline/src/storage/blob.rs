use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::storage::{StoreError, StoreResult};

/// Hex SHA-256 of a file's bytes; the identity of a `ResumeFile`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content-addressed key: `resumes/<hash[0..2]>/<hash>.<ext>`.
pub fn blob_key(hash: &str, extension: &str) -> String {
    let prefix = hash.get(..2).unwrap_or(hash);
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() {
        format!("resumes/{prefix}/{hash}")
    } else {
        format!("resumes/{prefix}/{hash}.{ext}")
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Bytes>;
}

/// S3 / MinIO backed blob storage.
#[derive(Clone)]
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> StoreResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StoreError::Blob(format!("put {key}: {e}")))?;
        info!("Uploaded resume blob to s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Blob(format!("get {key}: {e}")))?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Blob(format!("read {key}: {e}")))?;
        Ok(data.into_bytes())
    }
}
