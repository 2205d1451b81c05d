//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for Relog segment data.
///
/// Storage backends are **opaque byte stores**. They provide simple operations
/// for reading, appending, and flushing data. Relog owns all file format
/// interpretation - backends do not understand records, headers, or events.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `sync` ensures all appended data is durable
/// - `size` reflects appends made through *any* handle on the same store,
///   not just this one - tailing readers poll it to observe the writer
/// - Backends must be `Send` for per-thread handle ownership
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is read-only or an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This must observe appends made through other handles on the same
    /// underlying store, so that a reader handle can detect a writer
    /// extending the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// After this returns successfully, all previously appended data is
    /// guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is read-only or the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// This removes all data after the specified offset. Used only during
    /// recovery repair and boundary deletes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The handle is read-only
    /// - `new_size` is greater than current size
    /// - The truncation fails
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Returns whether this handle may append and truncate.
    fn writable(&self) -> bool;
}
