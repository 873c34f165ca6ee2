use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::plan::ChunkRange;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// RangeReader
// ---------------------------------------------------------------------------

/// Reads arbitrary byte ranges of one file.
///
/// Ranges are read with an explicit seek, so resuming from an offset the
/// server reported is the same operation as reading the next chunk.
pub struct RangeReader {
    file: std::fs::File,
    file_size: u64,
}

impl RangeReader {
    /// Opens `path` for range reads.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self { file, file_size })
    }

    /// Reads exactly `range.len` bytes starting at `range.start`.
    pub fn read_range(&mut self, range: ChunkRange) -> Result<Vec<u8>, TransferError> {
        if range.end() > self.file_size {
            return Err(TransferError::RangeOutOfBounds {
                start: range.start,
                len: range.len,
                size: self.file_size,
            });
        }
        self.file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; range.len as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Size of the file when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
    }

    #[test]
    fn checksum_bytes_different_data() {
        assert_ne!(checksum_bytes(b"hello"), checksum_bytes(b"world"));
    }

    #[test]
    fn read_range_returns_requested_bytes() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let mut reader = RangeReader::open(&path).unwrap();
        assert_eq!(reader.file_size(), 10);

        let first = reader.read_range(ChunkRange { start: 0, len: 4 }).unwrap();
        assert_eq!(&first, b"AABB");
        let last = reader.read_range(ChunkRange { start: 8, len: 2 }).unwrap();
        assert_eq!(&last, b"EE");
        // Going backwards is fine: every read seeks.
        let middle = reader.read_range(ChunkRange { start: 4, len: 4 }).unwrap();
        assert_eq!(&middle, b"CCDD");
    }

    #[test]
    fn read_range_past_end_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = RangeReader::open(&path).unwrap();
        let err = reader
            .read_range(ChunkRange { start: 6, len: 8 })
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::RangeOutOfBounds { size: 10, .. }
        ));
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let result = RangeReader::open(&dir.path().join("nope.bin"));
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn ranges_reassemble_original() {
        let dir = TempDir::new().unwrap();
        let original = b"The quick brown fox jumps over the lazy dog";
        let path = create_test_file(dir.path(), "test.txt", original);

        let mut reader = RangeReader::open(&path).unwrap();
        let mut rebuilt = Vec::new();
        let mut offset = 0u64;
        while offset < reader.file_size() {
            let len = 10.min(reader.file_size() - offset);
            rebuilt.extend(reader.read_range(ChunkRange { start: offset, len }).unwrap());
            offset += len;
        }
        assert_eq!(checksum_bytes(&rebuilt), checksum_bytes(original));
    }
}
