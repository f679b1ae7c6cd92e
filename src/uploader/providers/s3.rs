//! Amazon S3 multipart adapter
//!
//! Each chunk is one part, PUT to the presigned URL the control plane issued
//! for it at initialize. Part numbers are 1-based (`chunk index + 1`) and
//! finalize submits the collected ETags sorted ascending.

use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::providers::{
    ChunkMeta, ChunkReceipt, ChunkTarget, CompletedPart, ProviderKind, StorageAdapter,
    abort_via_control_plane,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client as HttpClient;
use skylift_api::api::UploadApi;
use skylift_api::models::upload::{FinalizePart, FinalizeUploadRequest, StorageType};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct S3Adapter {
    http: HttpClient,
    api: Arc<skylift_api::Client>,
    upload_id: String,
    /// One presigned PUT URL per part, in part order
    chunk_urls: Vec<String>,
    #[allow(dead_code)]
    object_key: Option<String>,
}

impl S3Adapter {
    pub fn new(
        http: HttpClient,
        api: Arc<skylift_api::Client>,
        upload_id: String,
        chunk_urls: Vec<String>,
        object_key: Option<String>,
    ) -> Self {
        Self {
            http,
            api,
            upload_id,
            chunk_urls,
            object_key,
        }
    }
}

#[async_trait]
impl StorageAdapter for S3Adapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::S3
    }

    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn supports_replanning(&self) -> bool {
        // Presigned part URLs fix the part layout at initialize
        false
    }

    fn chunk_target(&self, meta: &ChunkMeta) -> UploadResult<ChunkTarget> {
        let url = self.chunk_urls.get(meta.index).ok_or_else(|| {
            UploadError::Validation(format!("no presigned URL for part {}", meta.index + 1))
        })?;
        Ok(ChunkTarget {
            url: url.clone(),
            method: "PUT",
            headers: Vec::new(),
        })
    }

    async fn upload_chunk(
        &self,
        data: Bytes,
        meta: &ChunkMeta,
        cancel: &CancellationToken,
    ) -> UploadResult<ChunkReceipt> {
        let target = self.chunk_target(meta)?;

        debug!(
            target: "uploader::s3",
            chunk = meta.index,
            size = data.len(),
            "Uploading part"
        );

        let request = self
            .http
            .put(&target.url)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", data.len())
            .body(data)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = request => result?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::http(status.as_u16(), body));
        }

        // Strong ETag arrives quoted; strip the quotes for the finalize payload
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string());

        Ok(ChunkReceipt { etag })
    }

    async fn finalize(&self, parts: &[CompletedPart]) -> UploadResult<String> {
        let mut finalize_parts = Vec::with_capacity(parts.len());
        for part in parts {
            let etag = part.etag.clone().ok_or_else(|| {
                UploadError::Finalize(format!("part {} completed without an ETag", part.part_number))
            })?;
            finalize_parts.push(FinalizePart {
                part_number: part.part_number,
                etag,
            });
        }
        finalize_parts.sort_by_key(|p| p.part_number);

        debug!(
            target: "uploader::s3",
            upload_id = %self.upload_id,
            parts = finalize_parts.len(),
            "Completing multipart upload"
        );

        let request = FinalizeUploadRequest {
            upload_id: self.upload_id.clone(),
            storage_type: StorageType::S3,
            parts: Some(finalize_parts),
        };
        let response = self
            .api
            .finalize_upload(&request)
            .await
            .map_err(|e| UploadError::Finalize(e.to_string()))?;

        if !response.success {
            return Err(UploadError::Finalize(
                "server rejected multipart completion".to_string(),
            ));
        }
        response
            .final_url
            .ok_or_else(|| UploadError::Finalize("no final URL in completion response".to_string()))
    }

    async fn abort(&self) -> UploadResult<()> {
        abort_via_control_plane(&self.api, &self.upload_id).await
    }
}
