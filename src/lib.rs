//! skylift: a parallel chunked upload engine for cloud object stores.
//!
//! The engine splits a file into fixed-size chunks, transfers them with
//! bounded concurrency to provider-specific resumable endpoints (S3
//! multipart, Google Drive and GCS resumable sessions), and coordinates
//! retries, progress, adaptive chunk sizing, and the initialize/finalize
//! session lifecycle. Sessions are in-memory only; a process restart loses
//! progress.

pub mod config;
pub mod logging;
pub mod uploader;
