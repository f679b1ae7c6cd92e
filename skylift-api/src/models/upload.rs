use serde::{Deserialize, Serialize};

/// Server-side validation limit on file size (10 GiB)
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Server-side validation limit on chunk count
pub const MAX_CHUNK_COUNT: usize = 10_000;

/// Storage backends supported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    S3,
    GoogleDrive,
    Gcs,
}

impl StorageType {
    /// Path segment used by the per-provider endpoint mirrors
    /// (`/api/storage/{segment}/...`)
    pub fn path_segment(&self) -> &'static str {
        match self {
            StorageType::S3 => "s3",
            StorageType::GoogleDrive => "googledrive",
            StorageType::Gcs => "gcs",
        }
    }

    /// Parse from a user-facing selector string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "s3" => Some(StorageType::S3),
            "google_drive" | "googledrive" | "drive" => Some(StorageType::GoogleDrive),
            "gcs" => Some(StorageType::Gcs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::S3 => "s3",
            StorageType::GoogleDrive => "google_drive",
            StorageType::Gcs => "gcs",
        }
    }
}

/// Provider-specific options forwarded at session creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
}

/// Request body for `POST /api/upload/initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeUploadRequest {
    pub filename: String,
    pub file_size: u64,
    /// Lowercase hex SHA-256 of the whole file, when available at init time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    pub chunk_count: usize,
    pub storage_type: StorageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<UploadOptions>,
}

/// Response body for `POST /api/upload/initialize`
///
/// S3 sessions carry one presigned PUT URL per chunk in `chunk_urls`;
/// Drive/GCS sessions carry a single `resumable_url` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeUploadResponse {
    pub upload_id: String,
    #[serde(default, alias = "presignedUrls")]
    pub chunk_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumable_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
}

/// One completed part in an S3 finalize payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizePart {
    /// 1-based part number
    pub part_number: usize,
    pub etag: String,
}

/// Request body for `POST /api/upload/finalize`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadRequest {
    pub upload_id: String,
    pub storage_type: StorageType,
    /// S3 multipart parts, sorted by ascending part number; absent for
    /// resumable providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<FinalizePart>>,
}

/// Response body for `POST /api/upload/finalize`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
}

/// Request body for `POST /api/upload/abort`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    pub upload_id: String,
}

/// Response body for `POST /api/upload/abort`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadResponse {
    pub success: bool,
}

/// Response body for `GET /api/upload/status/{uploadId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub status: String,
    pub progress: f64,
    pub completed_chunks: usize,
    pub total_chunks: usize,
    pub failed_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_type_parsing() {
        assert_eq!(StorageType::parse("s3"), Some(StorageType::S3));
        assert_eq!(
            StorageType::parse("google_drive"),
            Some(StorageType::GoogleDrive)
        );
        assert_eq!(StorageType::parse("GCS"), Some(StorageType::Gcs));
        assert_eq!(StorageType::parse("azure"), None);
    }

    #[test]
    fn initialize_request_uses_camel_case() {
        let req = InitializeUploadRequest {
            filename: "video.mp4".to_string(),
            file_size: 5 * 1024 * 1024,
            file_hash: None,
            chunk_count: 5,
            storage_type: StorageType::S3,
            options: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["fileSize"], 5 * 1024 * 1024);
        assert_eq!(json["chunkCount"], 5);
        assert_eq!(json["storageType"], "s3");
        assert!(json.get("fileHash").is_none());
    }

    #[test]
    fn initialize_response_accepts_presigned_urls_alias() {
        let body = r#"{"uploadId":"u1","presignedUrls":["https://a","https://b"]}"#;
        let res: InitializeUploadResponse = serde_json::from_str(body).unwrap();
        assert_eq!(res.upload_id, "u1");
        assert_eq!(res.chunk_urls.len(), 2);
        assert!(res.resumable_url.is_none());
    }
}
