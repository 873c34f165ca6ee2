//! Upload error taxonomy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use docpush_transfer::TransferError;
use serde::Serialize;

/// Coarse error class reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    TransientHttp,
    PermanentHttp,
    SessionExpired,
    LocalIo,
    Config,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::TransientHttp => "transient-http",
            Self::PermanentHttp => "permanent-http",
            Self::SessionExpired => "session-expired",
            Self::LocalIo => "local-io",
            Self::Config => "config",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Errors produced while uploading.
///
/// Each variant is resolved at the lowest level that can decide between
/// retrying and failing; only [`UploadError::Auth`] aborts sibling work.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transient HTTP failure: {message}")]
    TransientHttp {
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("HTTP request failed: {message}")]
    PermanentHttp {
        status: Option<u16>,
        message: String,
    },

    #[error("upload session expired: {0}")]
    SessionExpired(String),

    #[error("I/O error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Wraps an I/O error with the path it happened on.
    pub fn local_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Maps a transfer-crate error for the file at `path`.
    pub fn from_transfer(path: impl AsRef<Path>, err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => Self::local_io(path, e),
            TransferError::RangeOutOfBounds { .. } => Self::local_io(
                path,
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err.to_string()),
            ),
            TransferError::InvalidPath(msg) => Self::local_io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, msg),
            ),
            TransferError::InvalidConfig(msg) => Self::Config(msg),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::TransientHttp { .. } => ErrorKind::TransientHttp,
            Self::PermanentHttp { .. } => ErrorKind::PermanentHttp,
            Self::SessionExpired(_) => ErrorKind::SessionExpired,
            Self::LocalIo { .. } => ErrorKind::LocalIo,
            Self::Config(_) => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True for failures expected to succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientHttp { .. })
    }

    /// True for failures that must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Server-supplied delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TransientHttp { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TransientHttp { status, .. } | Self::PermanentHttp { status, .. } => *status,
            _ => None,
        }
    }
}
