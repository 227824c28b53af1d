use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::error::StorageError;

/// Indexed piece read/write against a backing file. The core treats this as an opaque
/// byte-array-by-index interface; the only implementation shipped here is `FileStorage`.
pub trait StorageAdapter: Send + Sync {
    fn read_piece(&self, index: usize) -> Result<Vec<u8>, StorageError>;
    fn write_piece(&self, index: usize, data: &[u8]) -> Result<(), StorageError>;
}

/// Sparse-file backed storage. Pieces are addressed at `[index * piece_size, index * piece_size +
/// piece_len)`, where the last piece is shorter than `piece_size` whenever `file_size` is not a
/// multiple of it.
pub struct FileStorage {
    file: Mutex<File>,
    file_size: u64,
    piece_size: u32,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>, file_size: u64, piece_size: u32) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| StorageError::Open {
                path: path.display().to_string(),
                source,
            })?;

        // Pre-size the file so every piece offset is valid to seek+write into, even before the
        // corresponding piece has ever been received (a sparse file costs no real disk until
        // written).
        file.set_len(file_size).map_err(|source| StorageError::Open {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Self {
            file: Mutex::new(file),
            file_size,
            piece_size,
        })
    }

    fn piece_len(&self, index: usize) -> usize {
        let offset = index as u64 * self.piece_size as u64;
        self.piece_size.min((self.file_size - offset) as u32) as usize
    }

    fn piece_offset(&self, index: usize) -> u64 {
        index as u64 * self.piece_size as u64
    }
}

impl StorageAdapter for FileStorage {
    fn read_piece(&self, index: usize) -> Result<Vec<u8>, StorageError> {
        let mut buf = vec![0u8; self.piece_len(index)];
        let mut file = self.file.lock().expect("storage mutex poisoned");
        file.seek(SeekFrom::Start(self.piece_offset(index)))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|source| StorageError::Read { index, source })?;
        Ok(buf)
    }

    fn write_piece(&self, index: usize, data: &[u8]) -> Result<(), StorageError> {
        let mut file = self.file.lock().expect("storage mutex poisoned");
        file.seek(SeekFrom::Start(self.piece_offset(index)))
            .and_then(|_| file.write_all(data))
            .map_err(|source| StorageError::Write { index, source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_like::temp_file_path;

    #[test]
    fn round_trips_a_full_size_piece() {
        let path = temp_file_path("storage-roundtrip-full");
        let storage = FileStorage::open(&path, 32, 16).unwrap();
        storage.write_piece(0, &[7u8; 16]).unwrap();
        assert_eq!(storage.read_piece(0).unwrap(), vec![7u8; 16]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn last_piece_is_short_when_file_size_not_a_multiple() {
        let path = temp_file_path("storage-roundtrip-short");
        let storage = FileStorage::open(&path, 20, 16).unwrap();
        assert_eq!(storage.piece_len(1), 4);
        storage.write_piece(1, &[1, 2, 3, 4]).unwrap();
        assert_eq!(storage.read_piece(1).unwrap(), vec![1, 2, 3, 4]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn creates_file_as_sparse_of_file_size_when_missing() {
        let path = temp_file_path("storage-creates-missing");
        let _ = std::fs::remove_file(&path);
        let storage = FileStorage::open(&path, 100, 16).unwrap();
        drop(storage);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 100);
        let _ = std::fs::remove_file(path);
    }

    /// Minimal stand-in for a temp-file helper: this repository has no dependency on `tempfile`,
    /// so tests build unique paths under `std::env::temp_dir()` directly.
    mod tempfile_like {
        use std::path::PathBuf;
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub fn temp_file_path(prefix: &str) -> PathBuf {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            std::env::temp_dir().join(format!("{prefix}-{}-{}", std::process::id(), n))
        }
    }
}
