use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Slice plan
// ---------------------------------------------------------------------------

/// Number of slices for a file: `ceil(file_size / chunk_size)`.
///
/// Returns 0 when `chunk_size` is 0.
pub fn slice_count(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// Byte range covered by slice `index`.
pub fn slice_range(
    index: u64,
    file_size: u64,
    chunk_size: u64,
) -> Result<Range<u64>, TransferError> {
    let count = slice_count(file_size, chunk_size);
    if index >= count {
        return Err(TransferError::SliceOutOfRange { index, count });
    }
    let start = index * chunk_size;
    let end = std::cmp::min(start + chunk_size, file_size);
    Ok(start..end)
}

/// Length in bytes of slice `index`.
pub fn slice_len(index: u64, file_size: u64, chunk_size: u64) -> Result<u64, TransferError> {
    slice_range(index, file_size, chunk_size).map(|r| r.end - r.start)
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-1 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-1 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// SliceReader
// ---------------------------------------------------------------------------

/// Random-access reader returning whole slices of a local file.
pub struct SliceReader {
    file: std::fs::File,
    chunk_size: u64,
    file_size: u64,
}

impl SliceReader {
    /// Opens `path` for slice reads with the given chunk size.
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            chunk_size,
            file_size,
        })
    }

    /// Reads the full contents of slice `index`.
    pub fn read_slice(&mut self, index: u64) -> Result<Vec<u8>, TransferError> {
        let range = slice_range(index, self.file_size, self.chunk_size)?;
        self.file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// SHA-1 hex digest of slice `index`.
    pub fn slice_checksum(&mut self, index: u64) -> Result<String, TransferError> {
        let data = self.read_slice(index)?;
        Ok(checksum_bytes(&data))
    }

    /// Total number of slices.
    pub fn slice_count(&self) -> u64 {
        slice_count(self.file_size, self.chunk_size)
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
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
    fn slice_count_rounds_up() {
        assert_eq!(slice_count(10, 4), 3);
        assert_eq!(slice_count(8, 4), 2);
        assert_eq!(slice_count(1, 1024), 1);
        assert_eq!(slice_count(10 * 1024 * 1024, 3 * 1024 * 1024), 4);
        assert_eq!(slice_count(10, 0), 0);
    }

    #[test]
    fn slice_range_last_is_short() {
        assert_eq!(slice_range(0, 10, 4).unwrap(), 0..4);
        assert_eq!(slice_range(2, 10, 4).unwrap(), 8..10);
        assert_eq!(slice_len(2, 10, 4).unwrap(), 2);
        assert!(matches!(
            slice_range(3, 10, 4),
            Err(TransferError::SliceOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn checksum_bytes_known_vector() {
        assert_eq!(
            checksum_bytes(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(checksum_bytes(b"").len(), 40);
    }

    #[test]
    fn calculate_file_checksum_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let data = b"test content for checksum";
        let path = create_test_file(dir.path(), "test.bin", data);

        let file_cs = calculate_file_checksum(&path).unwrap();
        assert_eq!(file_cs, checksum_bytes(data));
    }

    #[test]
    fn slice_reader_reads_any_order() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let mut reader = SliceReader::open(&path, 4).unwrap();
        assert_eq!(reader.file_size(), 10);
        assert_eq!(reader.slice_count(), 3);

        assert_eq!(reader.read_slice(2).unwrap(), b"EE");
        assert_eq!(reader.read_slice(0).unwrap(), b"AABB");
        assert_eq!(reader.read_slice(1).unwrap(), b"CCDD");
        assert!(reader.read_slice(3).is_err());
    }

    #[test]
    fn slice_checksum_matches_slice_bytes() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = SliceReader::open(&path, 4).unwrap();
        assert_eq!(reader.slice_checksum(1).unwrap(), checksum_bytes(b"4567"));
    }
}
