//! Append-only log trait definition.

use crate::error::StorageResult;

/// A low-level append-only byte log for FolioDB.
///
/// Logs are **opaque byte stores**. The document store frames its own
/// journal records on top of them - backends never interpret content.
///
/// # Invariants
///
/// - `append` returns the offset where the data begins
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` pushes buffered writes to the OS; `sync` makes them durable
/// - `reset` discards all content (used when the journal is compacted)
/// - Implementations must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::MemoryLog`] - For testing
/// - [`super::FileLog`] - For persistent storage
pub trait AppendLog: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`super::StorageError::OutOfBounds`] if the read would
    /// extend beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the log.
    ///
    /// Returns the offset where the data was written.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes buffered writes to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Ensures all appended data survives process termination.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the log in bytes.
    ///
    /// This is the offset where the next `append` will write.
    fn size(&self) -> StorageResult<u64>;

    /// Discards all content, resetting the log to empty.
    fn reset(&mut self) -> StorageResult<()>;
}
