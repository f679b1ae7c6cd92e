//! Google Cloud Storage resumable adapter
//!
//! GCS resumable sessions behave like Drive's: ranged PUTs against a single
//! session URI, 308 while incomplete, 200/201 on the final range. The object
//! URL comes from a control-plane metadata lookup after the last range lands.

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

pub struct GcsAdapter {
    http: HttpClient,
    api: Arc<skylift_api::Client>,
    upload_id: String,
    session_uri: String,
}

impl GcsAdapter {
    pub fn new(
        http: HttpClient,
        api: Arc<skylift_api::Client>,
        upload_id: String,
        session_uri: String,
    ) -> Self {
        Self {
            http,
            api,
            upload_id,
            session_uri,
        }
    }
}

#[async_trait]
impl StorageAdapter for GcsAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gcs
    }

    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn supports_replanning(&self) -> bool {
        true
    }

    fn chunk_target(&self, meta: &ChunkMeta) -> UploadResult<ChunkTarget> {
        Ok(ChunkTarget {
            url: self.session_uri.clone(),
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
        match resumable::put_range(&self.http, &self.session_uri, data, meta, cancel).await? {
            RangedPutOutcome::Done { etag } => Ok(ChunkReceipt { etag }),
            RangedPutOutcome::Incomplete { next_byte } => {
                Err(UploadError::Incomplete { next_byte })
            }
        }
    }

    async fn finalize(&self, _parts: &[CompletedPart]) -> UploadResult<String> {
        debug!(
            target: "uploader::gcs",
            upload_id = %self.upload_id,
            "Looking up GCS object metadata"
        );

        let request = FinalizeUploadRequest {
            upload_id: self.upload_id.clone(),
            storage_type: StorageType::Gcs,
            parts: None,
        };
        let response = self
            .api
            .finalize_upload(&request)
            .await
            .map_err(|e| UploadError::Finalize(e.to_string()))?;

        if !response.success {
            return Err(UploadError::Finalize(
                "GCS metadata lookup reported failure".to_string(),
            ));
        }
        response
            .final_url
            .ok_or_else(|| UploadError::Finalize("no object URL for uploaded file".to_string()))
    }

    async fn abort(&self) -> UploadResult<()> {
        abort_via_control_plane(&self.api, &self.upload_id).await
    }
}
