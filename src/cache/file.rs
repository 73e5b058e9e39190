use std::fs::{self, File, Metadata};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::trace;

use crate::cache::weak::WeakTable;
use crate::cache::CacheError;

/// A read-only open file shared between concurrent replies.
///
/// The length is taken once when the file is opened; a transfer never runs
/// past it even if the file grows afterwards.
#[derive(Debug)]
pub struct CachedFile {
    file: File,
    path: PathBuf,
    len: u64,
    identity: FileIdentity,
}

/// Device and inode of an opened file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    fn of(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }
}

impl CachedFile {
    /// Opens `path` read-only. Directories and other non-regular files are
    /// rejected.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let file = File::open(path).map_err(|source| CacheError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let meta = file.metadata().map_err(|source| CacheError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        if !meta.is_file() {
            return Err(CacheError::NotAFile {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len: meta.len(),
            identity: FileIdentity::of(&meta),
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRawFd for CachedFile {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Cache of open file handles keyed by path.
#[derive(Default)]
pub struct FileCache {
    table: WeakTable<CachedFile>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared read-only handle for `path`, opening it on a miss.
    ///
    /// A live handle is reused only while `path` still names the file it
    /// opened; once the path is replaced or removed, callers get a fresh
    /// handle (or the open error) while older replies keep the old one.
    pub fn get(&self, path: &Path) -> Result<Arc<CachedFile>, CacheError> {
        let on_disk = fs::metadata(path).ok().map(|meta| FileIdentity::of(&meta));
        self.table.get_valid_or_try_insert(
            path,
            |file| Some(file.identity) == on_disk,
            || {
                trace!(path = %path.display(), "opening file");
                CachedFile::open(path)
            },
        )
    }

    /// Number of files currently held open by in-flight replies.
    pub fn open_count(&self) -> usize {
        self.table.live_count()
    }
}
