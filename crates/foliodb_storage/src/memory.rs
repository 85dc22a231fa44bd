//! In-memory log backend for testing.

use crate::backend::AppendLog;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory append-only log.
///
/// Suitable for unit tests, integration tests, and ephemeral stores that
/// do not need persistence.
///
/// # Example
///
/// ```rust
/// use foliodb_storage::{AppendLog, MemoryLog};
///
/// let mut log = MemoryLog::new();
/// let offset = log.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(log.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct MemoryLog {
    data: RwLock<Vec<u8>>,
}

impl MemoryLog {
    /// Creates a new empty in-memory log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory log with pre-existing content.
    ///
    /// Useful for testing replay scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the full log content.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl AppendLog for MemoryLog {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::OutOfBounds { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn reset(&mut self) -> StorageResult<()> {
        self.data.write().clear();
        Ok(())
    }
}
