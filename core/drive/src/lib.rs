//! Google Drive client for photo uploads.
//!
//! This crate authenticates against Google with an installed-app OAuth2 flow
//! and exposes the handful of Drive v3 calls a photo uploader needs: listing
//! files, finding and creating folders, and uploading content from URLs,
//! buffers or streams.
//!
//! # Design Principles
//! - Every operation returns `Result` and records failures in an [`ErrorLog`]
//! - Upload content is streamed, never buffered whole
//! - Batch uploads retry per item under a configurable [`RetryPolicy`]

pub mod auth;
pub mod batch;
pub mod callback;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod query;
pub mod retry;
pub mod source;

pub use auth::{Authenticator, ClientSecrets, StaticToken, TokenCache, TokenManager, TokenSource, Tokens};
pub use batch::{BatchReport, UploadOutcome};
pub use client::{DriveClient, FilePage, FileRecord};
pub use config::DriveConfig;
pub use diagnostics::{failure_report, ErrorLog, ErrorRecord};
pub use retry::{Backoff, RetryConfig, RetryPolicy};
pub use source::UploadSource;

pub use photodrive_common::{Error, FileId, PageSize, Result};
