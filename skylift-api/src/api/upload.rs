use crate::client::Client;
use crate::error::ApiResult;
use crate::models::upload::*;
use async_trait::async_trait;

/// Upload session API methods
#[async_trait]
pub trait UploadApi {
    /// Create an upload session, returning per-chunk targets
    async fn initialize_upload(
        &self,
        request: &InitializeUploadRequest,
    ) -> ApiResult<InitializeUploadResponse>;

    /// Finalize a completed session
    async fn finalize_upload(
        &self,
        request: &FinalizeUploadRequest,
    ) -> ApiResult<FinalizeUploadResponse>;

    /// Abort a session; aborting an unknown session is a success
    async fn abort_upload(&self, request: &AbortUploadRequest) -> ApiResult<AbortUploadResponse>;

    /// Fetch server-side status for a session
    async fn upload_status(&self, upload_id: &str) -> ApiResult<UploadStatusResponse>;
}

#[async_trait]
impl UploadApi for Client {
    async fn initialize_upload(
        &self,
        request: &InitializeUploadRequest,
    ) -> ApiResult<InitializeUploadResponse> {
        self.post_json("/api/upload/initialize", request).await
    }

    async fn finalize_upload(
        &self,
        request: &FinalizeUploadRequest,
    ) -> ApiResult<FinalizeUploadResponse> {
        self.post_json("/api/upload/finalize", request).await
    }

    async fn abort_upload(&self, request: &AbortUploadRequest) -> ApiResult<AbortUploadResponse> {
        self.post_json("/api/upload/abort", request).await
    }

    async fn upload_status(&self, upload_id: &str) -> ApiResult<UploadStatusResponse> {
        self.get_json(&format!("/api/upload/status/{}", upload_id))
            .await
    }
}
