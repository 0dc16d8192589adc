//! `/storage/v1` object uploads and public URLs.

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use super::{SupabaseClient, check};
use crate::backend::{BlobStore, StoreError, UploadOptions};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub(super) fn object_path(bucket: &str, path: &str) -> String {
    format!("/storage/v1/object/{bucket}/{}", path.trim_start_matches('/'))
}

pub(super) fn public_object_url(base: &str, bucket: &str, path: &str) -> String {
    format!("{base}/storage/v1/object/public/{bucket}/{}", path.trim_start_matches('/'))
}

#[async_trait]
impl BlobStore for SupabaseClient {
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, options: UploadOptions) -> Result<(), StoreError> {
        let size = bytes.len();
        let content_type = options.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
        let resp = self
            .request(Method::POST, &object_path(bucket, path))
            .header("Content-Type", content_type)
            .header("x-upsert", if options.upsert { "true" } else { "false" })
            .body(bytes)
            .send()
            .await?;
        check(resp).await?;
        debug!(bucket, path, size, "object uploaded");
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        public_object_url(&self.config.url, bucket, path)
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
