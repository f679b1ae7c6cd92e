//! SHA-256 digest computation off the controller task.
//!
//! Digests are CPU-bound, so every request runs on the blocking thread pool
//! and resolves through its own completion handle; nothing is routed through
//! a shared listener, and a digest can never be delivered to the wrong
//! requester.

use crate::uploader::error::{UploadError, UploadResult};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io::Read;
use std::path::PathBuf;
use tokio::sync::oneshot;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Handle to a digest request in flight
pub struct HashHandle {
    index: Option<usize>,
    rx: oneshot::Receiver<UploadResult<[u8; 32]>>,
}

impl HashHandle {
    /// Await the digest for this request
    pub async fn digest(self) -> UploadResult<[u8; 32]> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(UploadError::Hash {
                index: self.index,
                message: "hash worker dropped before completing".to_string(),
            }),
        }
    }
}

/// Background digest service
#[derive(Debug, Clone, Copy, Default)]
pub struct Hasher;

impl Hasher {
    pub fn new() -> Self {
        Self
    }

    /// Digest a chunk already resident in memory; addressed by chunk index
    pub fn hash_chunk(&self, index: usize, data: Bytes) -> HashHandle {
        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let mut hasher = Sha256::new();
            hasher.update(&data);
            let _ = tx.send(Ok(hasher.finalize().into()));
        });
        HashHandle {
            index: Some(index),
            rx,
        }
    }

    /// Digest a whole file by streaming it from disk
    pub fn hash_file(&self, path: PathBuf) -> HashHandle {
        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let _ = tx.send(hash_file_blocking(&path));
        });
        HashHandle { index: None, rx }
    }
}

fn hash_file_blocking(path: &PathBuf) -> UploadResult<[u8; 32]> {
    let mut file = std::fs::File::open(path).map_err(|e| UploadError::Hash {
        index: None,
        message: format!("failed to open {}: {}", path.display(), e),
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| UploadError::Hash {
            index: None,
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Render a digest as lowercase hex, the form used on the wire
pub fn hex_digest(digest: &[u8; 32]) -> String {
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
