//! Storage provider adapters
//!
//! Each supported backend implements the same capability set
//! (initialize / upload_chunk / finalize / abort) behind the
//! [`StorageAdapter`] trait; [`ProviderKind`] is the tag that selects which
//! adapter gets built. Adapters hold only per-session immutable state and
//! never retry internally; retries belong to the chunk scheduler.

mod drive;
mod gcs;
mod resumable;
mod s3;

pub use drive::DriveAdapter;
pub use gcs::GcsAdapter;
pub use s3::S3Adapter;

use crate::uploader::error::{UploadError, UploadResult};
use async_trait::async_trait;
use bytes::Bytes;
use skylift_api::api::UploadApi;
use skylift_api::models::upload::{
    AbortUploadRequest, InitializeUploadRequest, StorageType, UploadOptions,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Supported storage providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Amazon S3 multipart upload via per-part presigned URLs
    S3,
    /// Google Drive resumable upload
    GoogleDrive,
    /// Google Cloud Storage resumable upload
    Gcs,
}

impl ProviderKind {
    /// Convert from a user-facing selector string
    pub fn parse(s: &str) -> Option<Self> {
        StorageType::parse(s).map(Self::from)
    }

    pub fn as_str(&self) -> &'static str {
        self.storage_type().as_str()
    }

    /// The control-plane representation of this provider
    pub fn storage_type(&self) -> StorageType {
        match self {
            ProviderKind::S3 => StorageType::S3,
            ProviderKind::GoogleDrive => StorageType::GoogleDrive,
            ProviderKind::Gcs => StorageType::Gcs,
        }
    }
}

impl From<StorageType> for ProviderKind {
    fn from(value: StorageType) -> Self {
        match value {
            StorageType::S3 => ProviderKind::S3,
            StorageType::GoogleDrive => ProviderKind::GoogleDrive,
            StorageType::Gcs => ProviderKind::Gcs,
        }
    }
}

/// File-level information handed to initialize
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub filename: String,
    pub total_size: u64,
    /// Lowercase hex SHA-256 of the whole file, when already computed
    pub file_hash: Option<String>,
    pub chunk_count: usize,
    pub mime_type: Option<String>,
}

/// Byte-range metadata for one chunk transfer
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub index: usize,
    /// First byte to send; a 308 continuation moves this past the bytes the
    /// provider already holds
    pub start: u64,
    /// One past the last byte of the chunk
    pub end: u64,
    pub total_size: u64,
    /// Lowercase hex SHA-256 of the chunk bytes
    pub chunk_hash: Option<String>,
}

/// Where one chunk must be sent
#[derive(Debug, Clone)]
pub struct ChunkTarget {
    pub url: String,
    pub method: &'static str,
    /// Headers the provider requires beyond Content-Type/Content-Length
    pub headers: Vec<(String, String)>,
}

/// Successful chunk transfer result
#[derive(Debug, Clone)]
pub struct ChunkReceipt {
    /// Strong ETag with surrounding quotes stripped (S3 providers)
    pub etag: Option<String>,
}

/// One part of an S3 finalize payload
#[derive(Debug, Clone)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: usize,
    pub etag: Option<String>,
}

/// The capability set every provider adapter implements.
///
/// Calls take the session's cancellation token and must honor it on the
/// in-flight transfer.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Provider-side session identity
    fn upload_id(&self) -> &str;

    /// Whether chunk boundaries may be rebuilt mid-session. Providers that
    /// pin one presigned URL per part at initialize cannot accept a
    /// different part layout afterwards.
    fn supports_replanning(&self) -> bool;

    /// Resolve the transfer target for a chunk
    fn chunk_target(&self, meta: &ChunkMeta) -> UploadResult<ChunkTarget>;

    /// Transfer one chunk. An incomplete ranged upload surfaces as
    /// [`UploadError::Incomplete`] carrying the next expected byte.
    async fn upload_chunk(
        &self,
        data: Bytes,
        meta: &ChunkMeta,
        cancel: &CancellationToken,
    ) -> UploadResult<ChunkReceipt>;

    /// Complete the session and return the final object URL
    async fn finalize(&self, parts: &[CompletedPart]) -> UploadResult<String>;

    /// Abort the session. Idempotent; aborting an unknown session succeeds.
    async fn abort(&self) -> UploadResult<()>;
}

/// Create the provider session and build the matching adapter.
///
/// This performs a single initialize attempt; the session controller owns
/// the retry loop around it.
pub async fn initialize(
    kind: ProviderKind,
    api: Arc<skylift_api::Client>,
    http: reqwest::Client,
    info: &FileInfo,
) -> UploadResult<Arc<dyn StorageAdapter>> {
    let request = InitializeUploadRequest {
        filename: info.filename.clone(),
        file_size: info.total_size,
        file_hash: info.file_hash.clone(),
        chunk_count: info.chunk_count,
        storage_type: kind.storage_type(),
        options: Some(UploadOptions {
            mime_type: info.mime_type.clone(),
            chunk_size: None,
        }),
    };

    let response = api.initialize_upload(&request).await?;
    debug!(
        target: "uploader::providers",
        provider = kind.as_str(),
        upload_id = %response.upload_id,
        "Upload session initialized"
    );

    match kind {
        ProviderKind::S3 => {
            if response.chunk_urls.len() < info.chunk_count {
                return Err(UploadError::Initialize(format!(
                    "expected {} presigned part URLs, got {}",
                    info.chunk_count,
                    response.chunk_urls.len()
                )));
            }
            Ok(Arc::new(S3Adapter::new(
                http,
                api,
                response.upload_id,
                response.chunk_urls,
                response.object_key,
            )))
        }
        ProviderKind::GoogleDrive => {
            let resumable_url = response.resumable_url.ok_or_else(|| {
                UploadError::Initialize("no resumable URL in Drive session".to_string())
            })?;
            Ok(Arc::new(DriveAdapter::new(
                http,
                api,
                response.upload_id,
                resumable_url,
            )))
        }
        ProviderKind::Gcs => {
            let resumable_url = response.resumable_url.ok_or_else(|| {
                UploadError::Initialize("no resumable session URI in GCS session".to_string())
            })?;
            Ok(Arc::new(GcsAdapter::new(
                http,
                api,
                response.upload_id,
                resumable_url,
            )))
        }
    }
}

/// Abort helper shared by the adapters: "not found" counts as success
pub(crate) async fn abort_via_control_plane(
    api: &skylift_api::Client,
    upload_id: &str,
) -> UploadResult<()> {
    let request = AbortUploadRequest {
        upload_id: upload_id.to_string(),
    };
    match api.abort_upload(&request).await {
        Ok(_) => Ok(()),
        Err(e) if e.status() == Some(404) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_round_trips_through_strings() {
        for kind in [ProviderKind::S3, ProviderKind::GoogleDrive, ProviderKind::Gcs] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("ftp"), None);
    }
}
