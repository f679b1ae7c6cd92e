//! Google Drive resumable adapter
//!
//! Drive issues one resumable URL per session; every chunk is a ranged PUT
//! against it. The last chunk's 2xx response completes the object; there is
//! no explicit completion call, so finalize only fetches the view URL
//! through the control plane.

use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::providers::resumable::{self, RangedPutOutcome};
use crate::uploader::providers::{
    ChunkMeta, ChunkReceipt, ChunkTarget, CompletedPart, ProviderKind, StorageAdapter,
    abort_via_control_plane,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client as HttpClient;
use skylift_api::api::UploadApi;
use skylift_api::models::upload::{FinalizeUploadRequest, StorageType};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct DriveAdapter {
    http: HttpClient,
    api: Arc<skylift_api::Client>,
    upload_id: String,
    resumable_url: String,
}

impl DriveAdapter {
    pub fn new(
        http: HttpClient,
        api: Arc<skylift_api::Client>,
        upload_id: String,
        resumable_url: String,
    ) -> Self {
        Self {
            http,
            api,
            upload_id,
            resumable_url,
        }
    }
}

#[async_trait]
impl StorageAdapter for DriveAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleDrive
    }

    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn supports_replanning(&self) -> bool {
        // Ranges are computed per request, so any chunk layout works
        true
    }

    fn chunk_target(&self, meta: &ChunkMeta) -> UploadResult<ChunkTarget> {
        Ok(ChunkTarget {
            url: self.resumable_url.clone(),
            method: "PUT",
            headers: vec![(
                "Content-Range".to_string(),
                resumable::content_range(meta.start, meta.end, meta.total_size),
            )],
        })
    }

    async fn upload_chunk(
        &self,
        data: Bytes,
        meta: &ChunkMeta,
        cancel: &CancellationToken,
    ) -> UploadResult<ChunkReceipt> {
        match resumable::put_range(&self.http, &self.resumable_url, data, meta, cancel).await? {
            RangedPutOutcome::Done { etag } => Ok(ChunkReceipt { etag }),
            RangedPutOutcome::Incomplete { next_byte } => {
                Err(UploadError::Incomplete { next_byte })
            }
        }
    }

    async fn finalize(&self, _parts: &[CompletedPart]) -> UploadResult<String> {
        debug!(
            target: "uploader::drive",
            upload_id = %self.upload_id,
            "Looking up Drive file metadata"
        );

        let request = FinalizeUploadRequest {
            upload_id: self.upload_id.clone(),
            storage_type: StorageType::GoogleDrive,
            parts: None,
        };
        let response = self
            .api
            .finalize_upload(&request)
            .await
            .map_err(|e| UploadError::Finalize(e.to_string()))?;

        if !response.success {
            return Err(UploadError::Finalize(
                "Drive metadata lookup reported failure".to_string(),
            ));
        }
        response
            .final_url
            .ok_or_else(|| UploadError::Finalize("no view URL for uploaded file".to_string()))
    }

    async fn abort(&self) -> UploadResult<()> {
        abort_via_control_plane(&self.api, &self.upload_id).await
    }
}
