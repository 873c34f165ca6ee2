//! Transfer planning and bookkeeping for document-library uploads.
//!
//! Everything in this crate is free of network I/O: it decides how a file
//! is sent (one request or an ordered series of byte ranges), reads those
//! ranges from disk, and tracks what the remote side has acknowledged.

mod chunked;
mod content_type;
mod plan;
mod progress;
mod types;
mod validation;

pub use chunked::{RangeReader, checksum_bytes};
pub use content_type::detect_content_type;
pub use plan::{ChunkRange, PlannerConfig, Strategy, TransferPlan, plan};
pub use progress::ThroughputMeter;
pub use types::{LocalFile, UploadSession};
pub use validation::{join_remote_path, normalize_folder, validate_relative_path};

/// Default small-upload threshold: 4 MiB.
///
/// Files at or below this size go up in a single PUT.
pub const DEFAULT_SMALL_UPLOAD_MAX: u64 = 4 * 1024 * 1024;

/// Byte unit every non-final chunk must be a multiple of: 320 KiB.
pub const DEFAULT_CHUNK_ALIGNMENT: u64 = 320 * 1024;

/// Default chunk size: 10 MiB (32 × 320 KiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 32 * DEFAULT_CHUNK_ALIGNMENT;

/// Largest byte range the remote API accepts in one request: 60 MiB.
pub const MAX_CHUNK_SIZE: u64 = 60 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("range {start}+{len} exceeds file size {size}")]
    RangeOutOfBounds { start: u64, len: u64, size: u64 },
}
