//! Strategy selection and chunk boundaries.

use serde::Serialize;

use crate::types::LocalFile;
use crate::{
    DEFAULT_CHUNK_ALIGNMENT, DEFAULT_CHUNK_SIZE, DEFAULT_SMALL_UPLOAD_MAX, MAX_CHUNK_SIZE,
    TransferError,
};

/// How a file is sent to the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Whole file in one request.
    Simple,
    /// Ordered byte ranges inside an upload session.
    Chunked,
}

/// A contiguous byte range `[start, start + len)` sent as one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkRange {
    pub start: u64,
    pub len: u64,
}

impl ChunkRange {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Value for the `Content-Range` header, e.g. `bytes 0-9/20`.
    pub fn content_range(&self, total: u64) -> String {
        format!(
            "bytes {}-{}/{}",
            self.start,
            self.end().saturating_sub(1),
            total
        )
    }
}

/// Planner settings, validated once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Files of this size or smaller use [`Strategy::Simple`].
    pub small_upload_max: u64,
    /// Upper bound on a chunk's length.
    pub chunk_size: u64,
    /// Every non-final chunk must be a multiple of this many bytes.
    pub alignment: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            small_upload_max: DEFAULT_SMALL_UPLOAD_MAX,
            chunk_size: DEFAULT_CHUNK_SIZE,
            alignment: DEFAULT_CHUNK_ALIGNMENT,
        }
    }
}

impl PlannerConfig {
    /// Rejects chunk sizes the remote API would refuse.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.alignment == 0 {
            return Err(TransferError::InvalidConfig(
                "chunk alignment must be non-zero".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfig(
                "chunk size must be non-zero".into(),
            ));
        }
        if self.chunk_size % self.alignment != 0 {
            return Err(TransferError::InvalidConfig(format!(
                "chunk size {} is not a multiple of {} bytes",
                self.chunk_size, self.alignment
            )));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(TransferError::InvalidConfig(format!(
                "chunk size {} exceeds the {} byte maximum",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        Ok(())
    }
}

/// The decided transfer for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub file: LocalFile,
    pub strategy: Strategy,
    /// Partition of `[0, size)`; empty for [`Strategy::Simple`].
    pub ranges: Vec<ChunkRange>,
    pub chunk_size: u64,
}

impl TransferPlan {
    /// Total bytes to transfer.
    pub fn size(&self) -> u64 {
        self.file.size
    }

    /// Number of chunk requests a clean run issues.
    pub fn chunk_count(&self) -> usize {
        self.ranges.len()
    }

    /// The range beginning at `offset`, or `None` once the file is covered.
    ///
    /// When resuming, `offset` is whatever the remote side acknowledged, so
    /// the returned range is not necessarily one of [`Self::ranges`].
    pub fn range_at(&self, offset: u64) -> Option<ChunkRange> {
        if offset >= self.file.size {
            return None;
        }
        Some(ChunkRange {
            start: offset,
            len: self.chunk_size.min(self.file.size - offset),
        })
    }
}

/// Plans the transfer of `file`.
///
/// Pure: the same inputs always produce the same plan, which is what lets a
/// dry run report exactly what a real run would send. `config` is expected
/// to have passed [`PlannerConfig::validate`].
pub fn plan(file: LocalFile, config: &PlannerConfig) -> TransferPlan {
    if file.size <= config.small_upload_max {
        return TransferPlan {
            file,
            strategy: Strategy::Simple,
            ranges: Vec::new(),
            chunk_size: config.chunk_size,
        };
    }

    let ranges = split(0, file.size, config.chunk_size);
    TransferPlan {
        file,
        strategy: Strategy::Chunked,
        ranges,
        chunk_size: config.chunk_size,
    }
}

fn split(start: u64, end: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let mut ranges = Vec::new();
    let mut offset = start;
    while offset < end {
        let len = chunk_size.min(end - offset);
        ranges.push(ChunkRange { start: offset, len });
        offset += len;
    }
    ranges
}
