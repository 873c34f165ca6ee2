//! The seam between the engine and the remote API.
//!
//! The Graph crate implements [`Transport`] over HTTP; dry runs use
//! [`RecordingTransport`](crate::dry_run::RecordingTransport). Using a trait
//! keeps uploader logic decoupled from the wire and testable with mocks.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use docpush_transfer::ChunkRange;
use serde::Serialize;

use crate::error::UploadError;
use crate::token::AccessToken;
use crate::types::ConflictBehavior;

/// Boxed future returned by every transport call.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// The remote item a finished upload produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedItem {
    pub id: Option<String>,
    /// Path of the item relative to the library root.
    pub remote_path: String,
    pub size: Option<u64>,
    pub web_url: Option<String>,
}

/// A freshly created upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub upload_url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What the remote side reports about an existing session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    /// First byte the server still needs; `None` if it did not say.
    pub next_expected: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Response to one byte-range PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeAck {
    /// Range stored; more bytes expected.
    Accepted {
        next_expected: Option<u64>,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Final range stored; the item exists remotely.
    Completed(UploadedItem),
}

/// Remote operations the uploaders need.
///
/// Session URLs are pre-authenticated, so range, status and cancel calls
/// take no token.
pub trait Transport: Send + Sync {
    /// Checks that the target library exists before anything is uploaded.
    fn check_target<'a>(&'a self, _token: &'a AccessToken) -> TransportFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// False when the transport only looks at sizes and ranges, so file
    /// contents need not be read.
    fn reads_payload(&self) -> bool {
        true
    }

    /// Makes sure `folder` (relative to the library root) exists.
    fn ensure_folder<'a>(&'a self, token: &'a AccessToken, folder: &'a str)
    -> TransportFuture<'a, ()>;

    /// Writes a whole file of `size` bytes in one request.
    ///
    /// `data` is empty when [`Self::reads_payload`] is false.
    fn put_content<'a>(
        &'a self,
        token: &'a AccessToken,
        remote_path: &'a str,
        content_type: &'a str,
        conflict: ConflictBehavior,
        size: u64,
        data: Vec<u8>,
    ) -> TransportFuture<'a, UploadedItem>;

    /// Opens an upload session for `size` bytes at `remote_path`.
    fn create_session<'a>(
        &'a self,
        token: &'a AccessToken,
        remote_path: &'a str,
        size: u64,
        conflict: ConflictBehavior,
    ) -> TransportFuture<'a, SessionInfo>;

    /// Sends one byte range of a session.
    fn put_range<'a>(
        &'a self,
        upload_url: &'a str,
        range: ChunkRange,
        total: u64,
        data: Vec<u8>,
    ) -> TransportFuture<'a, RangeAck>;

    /// Asks which bytes the session still expects.
    fn session_status<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, SessionStatus>;

    /// Discards a session.
    fn cancel_session<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, ()>;
}
