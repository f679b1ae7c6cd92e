//! Typed client for the skylift upload control-plane API.
//!
//! The control plane issues upload sessions (presigned part URLs for S3,
//! resumable URLs for Google Drive / GCS), finalizes and aborts them, and
//! reports session status. Data-plane transfers go directly to the storage
//! provider and are not handled by this crate.

pub mod api;
pub mod client;
pub mod error;
pub mod models;

pub use client::{Client, ClientConfig};
pub use error::{ApiError, ApiResult};
