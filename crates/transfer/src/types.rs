use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A regular file discovered under the upload root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalFile {
    /// Absolute path on the local filesystem.
    pub path: PathBuf,
    /// Size in bytes at discovery time.
    pub size: u64,
    /// Path relative to the upload root, `/`-separated.
    pub relative_path: String,
}

/// Client-side view of a remote upload session.
///
/// One session belongs to one file and is driven by one worker, so no
/// interior locking is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    upload_url: String,
    expected_size: u64,
    acked: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl UploadSession {
    /// Opens bookkeeping for a fresh session with nothing acknowledged.
    pub fn new(upload_url: String, expected_size: u64, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            upload_url,
            expected_size,
            acked: 0,
            expires_at,
        }
    }

    /// Starts the session at `offset` instead of 0 (bytes retained remotely).
    pub fn with_retained(mut self, offset: u64) -> Self {
        self.acked = offset.min(self.expected_size);
        self
    }

    /// Records the remote side's acknowledged offset.
    ///
    /// The offset never moves backwards and never passes the expected size.
    /// Returns the offset in effect after the update.
    pub fn acknowledge(&mut self, offset: u64) -> u64 {
        let clamped = offset.min(self.expected_size);
        if clamped > self.acked {
            self.acked = clamped;
        }
        self.acked
    }

    /// Replaces the expiry with a newer one reported by the server.
    pub fn refresh_expiry(&mut self, expires_at: Option<DateTime<Utc>>) {
        if expires_at.is_some() {
            self.expires_at = expires_at;
        }
    }

    /// True when the stored expiry is within `margin` of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        now + margin >= expires_at
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// Highest acknowledged offset.
    pub fn acked(&self) -> u64 {
        self.acked
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}
