//! Process-wide caches of open files, memory maps and gzip artifacts.
//!
//! Every cache hands out `Arc` handles and holds only weak references
//! itself, so a resource is released as soon as the last in-flight reply
//! using it is dropped. The caches are built once at startup and shared
//! with every reactor through [`ResourceCaches`].

pub mod compressed;
pub mod file;
pub mod mapping;
pub mod weak;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::compressed::CompressionCache;
use crate::cache::file::FileCache;
use crate::cache::mapping::MappingCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is not a regular file")]
    NotAFile { path: PathBuf },

    #[error("failed to map {path}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to stage compressed artifact {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("range {offset}+{len} exceeds mapping of {size} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },
}

impl CacheError {
    /// Whether the error means the requested file does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            CacheError::Open { source, .. } | CacheError::Stat { source, .. } => {
                source.kind() == io::ErrorKind::NotFound
            }
            CacheError::NotAFile { .. } => true,
            _ => false,
        }
    }

    /// Whether the error is a permission failure.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            CacheError::Open { source, .. } | CacheError::Stat { source, .. } => {
                source.kind() == io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

/// The shared cache set used by request handlers.
pub struct ResourceCaches {
    pub files: Arc<FileCache>,
    pub mappings: MappingCache,
    /// Present only when a compression directory is configured.
    pub compressed: Option<CompressionCache>,
}

impl ResourceCaches {
    pub fn new(compressed: Option<CompressionCache>) -> Self {
        let files = Arc::new(FileCache::new());
        Self {
            mappings: MappingCache::new(files.clone()),
            files,
            compressed,
        }
    }
}
