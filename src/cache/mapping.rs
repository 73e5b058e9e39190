use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::trace;

use crate::cache::file::{CachedFile, FileCache};
use crate::cache::weak::WeakTable;
use crate::cache::CacheError;

/// A read-only memory map of a whole file.
///
/// The mapping keeps its underlying [`CachedFile`] alive.
#[derive(Debug)]
pub struct CachedMapping {
    map: Mmap,
    file: Arc<CachedFile>,
}

impl CachedMapping {
    pub fn new(file: Arc<CachedFile>) -> Result<Self, CacheError> {
        // SAFETY: the map is read-only. Truncating the file on disk while it
        // is mapped is outside what the server guards against.
        let map = unsafe { Mmap::map(file.file()) }.map_err(|source| CacheError::Map {
            path: file.path().to_path_buf(),
            source,
        })?;
        Ok(Self { map, file })
    }

    /// Mapped length, clamped to the size recorded when the file was opened.
    pub fn len(&self) -> usize {
        self.map.len().min(self.file.len() as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map[..self.len()]
    }

    /// A bounds-checked view of `len` bytes starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], CacheError> {
        let size = self.len();
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(&self.map[offset..end]),
            _ => Err(CacheError::OutOfBounds { offset, len, size }),
        }
    }

    pub fn file(&self) -> &Arc<CachedFile> {
        &self.file
    }
}

/// Cache of whole-file memory maps keyed by path.
///
/// Files are opened through the shared [`FileCache`], so a path that is both
/// sent and mapped uses a single descriptor.
pub struct MappingCache {
    files: Arc<FileCache>,
    table: WeakTable<CachedMapping>,
}

impl MappingCache {
    pub fn new(files: Arc<FileCache>) -> Self {
        Self {
            files,
            table: WeakTable::new(),
        }
    }

    /// Returns the mapping of `path`. A live mapping is reused only while it
    /// maps the file the file cache currently holds for that path.
    pub fn get(&self, path: &Path) -> Result<Arc<CachedMapping>, CacheError> {
        let file = self.files.get(path)?;
        self.table.get_valid_or_try_insert(
            path,
            |mapping| Arc::ptr_eq(mapping.file(), &file),
            || {
                trace!(path = %path.display(), "mapping file");
                CachedMapping::new(file.clone())
            },
        )
    }

    /// Number of mappings currently held by in-flight replies.
    pub fn mapped_count(&self) -> usize {
        self.table.live_count()
    }
}
