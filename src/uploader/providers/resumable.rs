//! Shared ranged-PUT transport for resumable providers (Drive, GCS)

use crate::uploader::error::{UploadError, UploadResult};
use crate::uploader::providers::ChunkMeta;
use bytes::Bytes;
use reqwest::Client as HttpClient;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of one ranged PUT
#[derive(Debug)]
pub(crate) enum RangedPutOutcome {
    /// 200/201: the provider acknowledged the range (and, for the last
    /// chunk, the whole object)
    Done { etag: Option<String> },
    /// 308: the provider expects more bytes, starting at `next_byte`
    Incomplete { next_byte: u64 },
}

/// `Content-Range` value for a chunk: `bytes S-E/T` with E inclusive.
/// A zero-size range (empty file) uses the `bytes */T` form.
pub(crate) fn content_range(start: u64, end_exclusive: u64, total_size: u64) -> String {
    if end_exclusive == start {
        format!("bytes */{}", total_size)
    } else {
        format!("bytes {}-{}/{}", start, end_exclusive - 1, total_size)
    }
}

/// Parse a `Range: bytes=0-N` response header into the next expected byte
/// (N + 1)
pub(crate) fn parse_next_byte(range_header: &str) -> Option<u64> {
    let spec = range_header.trim().strip_prefix("bytes=")?;
    let (_, last) = spec.split_once('-')?;
    last.trim().parse::<u64>().ok().map(|n| n + 1)
}

/// Issue one ranged PUT to a resumable session URL
pub(crate) async fn put_range(
    http: &HttpClient,
    url: &str,
    data: Bytes,
    meta: &ChunkMeta,
    cancel: &CancellationToken,
) -> UploadResult<RangedPutOutcome> {
    let range = content_range(meta.start, meta.end, meta.total_size);
    debug!(
        target: "uploader::resumable",
        chunk = meta.index,
        range = %range,
        "Uploading chunk range"
    );

    let request = http
        .put(url)
        .header("Content-Type", "application/octet-stream")
        .header("Content-Length", data.len())
        .header("Content-Range", &range)
        .body(data)
        .send();

    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(UploadError::Cancelled),
        result = request => result?,
    };

    let status = response.status();
    if status.is_success() {
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string());
        return Ok(RangedPutOutcome::Done { etag });
    }

    if status.as_u16() == 308 {
        // The provider reports how much it holds; absent Range means none of
        // this chunk arrived and the whole window is resent
        let next_byte = response
            .headers()
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_byte)
            .unwrap_or(meta.start);
        debug!(
            target: "uploader::resumable",
            chunk = meta.index,
            next_byte,
            "Provider reported incomplete range"
        );
        return Ok(RangedPutOutcome::Incomplete { next_byte });
    }

    let body = response.text().await.unwrap_or_default();
    Err(UploadError::http(status.as_u16(), body))
}
