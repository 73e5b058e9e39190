//! Gzip artifacts of static files, produced in the background.
//!
//! A request for a compressible file never waits on compression. The first
//! request claims a `.tmp` staging file (exclusive create, so concurrent
//! requests and other processes agree on a single producer), hands a job to
//! the worker thread and is served uncompressed. Once the worker renames the
//! staging file into place, later requests get the artifact.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime};

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::cache::weak::WeakTable;
use crate::cache::CacheError;

const ARTIFACT_PREFIX: &str = "gzip.";
const STAGING_SUFFIX: &str = ".tmp";

/// MIME types worth compressing besides `text/*`.
const TEXT_LIKE: &[&str] = &[
    "application/javascript",
    "application/json",
    "application/xml",
    "application/xhtml+xml",
    "image/svg+xml",
];

/// A finished gzip artifact on disk.
#[derive(Debug)]
pub struct CompressedArtifact {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

impl CompressedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn is_fresh(&self, source_modified: SystemTime) -> bool {
        self.modified >= source_modified
    }
}

/// Result of asking for a file's artifact.
#[derive(Debug)]
pub enum Lookup {
    /// The artifact is current and can be served.
    Ready(Arc<CompressedArtifact>),
    /// Compression is in progress; serve the original for now.
    Pending,
}

enum Miss {
    Pending,
    Failed(CacheError),
}

struct Job {
    source: PathBuf,
    staging: PathBuf,
    target: PathBuf,
    output: File,
}

/// Cache of gzip artifacts stored in a dedicated directory.
pub struct CompressionCache {
    dir: PathBuf,
    min_size: u64,
    table: WeakTable<CompressedArtifact>,
    jobs: Option<UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl CompressionCache {
    /// Opens the artifact directory, creating it if needed, clears staging
    /// files left by an earlier run and starts the worker thread.
    pub fn new(dir: impl Into<PathBuf>, level: u32, min_size: u64) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        remove_stale_staging(&dir)?;

        let (tx, rx) = unbounded_channel();
        let level = Compression::new(level.min(9));
        let worker = std::thread::Builder::new()
            .name("gzip-worker".to_string())
            .spawn(move || run_worker(rx, level))?;

        Ok(Self {
            dir,
            min_size,
            table: WeakTable::new(),
            jobs: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the artifact for a document-root-relative path lives.
    ///
    /// The relative path is form-urlencoded into a single file name, so
    /// distinct paths never share an artifact.
    pub fn artifact_path(&self, relative: &str) -> PathBuf {
        let encoded: String = form_urlencoded::byte_serialize(relative.as_bytes()).collect();
        self.dir.join(format!("{ARTIFACT_PREFIX}{encoded}"))
    }

    /// Whether a file of this type and size should be served compressed.
    pub fn should_compress(&self, mime: &str, len: u64) -> bool {
        len >= self.min_size && is_text_like(mime)
    }

    /// Looks up the artifact for `source`, scheduling compression on a miss.
    pub fn get(&self, source: &Path, relative: &str) -> Result<Lookup, CacheError> {
        let source_modified = modified(source)?;
        let target = self.artifact_path(relative);

        let found = self.table.get_valid_or_try_insert(
            &target,
            |artifact| artifact.is_fresh(source_modified),
            || self.acquire(source, &target, source_modified),
        );

        match found {
            Ok(artifact) => Ok(Lookup::Ready(artifact)),
            Err(Miss::Pending) => Ok(Lookup::Pending),
            Err(Miss::Failed(e)) => Err(e),
        }
    }

    fn acquire(
        &self,
        source: &Path,
        target: &Path,
        source_modified: SystemTime,
    ) -> Result<CompressedArtifact, Miss> {
        if let Ok(meta) = fs::metadata(target) {
            match meta.modified() {
                Ok(artifact_modified) if artifact_modified >= source_modified => {
                    return Ok(CompressedArtifact {
                        path: target.to_path_buf(),
                        len: meta.len(),
                        modified: artifact_modified,
                    });
                }
                _ => {
                    debug!(artifact = %target.display(), "discarding stale artifact");
                    let _ = fs::remove_file(target);
                }
            }
        }

        let staging = staging_path(target);
        let output = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(Miss::Pending),
            Err(source) => {
                return Err(Miss::Failed(CacheError::Stage {
                    path: staging,
                    source,
                }));
            }
        };

        let job = Job {
            source: source.to_path_buf(),
            staging: staging.clone(),
            target: target.to_path_buf(),
            output,
        };
        let sent = self.jobs.as_ref().map(|jobs| jobs.send(job).is_ok());
        if sent != Some(true) {
            let _ = fs::remove_file(&staging);
            return Err(Miss::Failed(CacheError::Stage {
                path: staging,
                source: io::Error::new(io::ErrorKind::BrokenPipe, "compression worker stopped"),
            }));
        }

        debug!(source = %source.display(), "scheduled compression");
        Err(Miss::Pending)
    }
}

impl Drop for CompressionCache {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish queued jobs and exit.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// `text/*` plus a few structured text formats.
pub fn is_text_like(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or("").trim();
    essence.starts_with("text/") || TEXT_LIKE.contains(&essence)
}

fn modified(path: &Path) -> Result<SystemTime, CacheError> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| CacheError::Stat {
            path: path.to_path_buf(),
            source,
        })
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

fn remove_stale_staging(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.to_string_lossy().ends_with(STAGING_SUFFIX) {
            debug!(path = %path.display(), "removing stale staging file");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn run_worker(mut jobs: UnboundedReceiver<Job>, level: Compression) {
    while let Some(job) = jobs.blocking_recv() {
        let started = Instant::now();
        let source = job.source.clone();
        let staging = job.staging.clone();

        match compress(job, level) {
            Ok(len) => info!(
                source = %source.display(),
                bytes = len,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "compressed artifact ready"
            ),
            Err(e) => {
                warn!(source = %source.display(), error = %e, "compression failed");
                let _ = fs::remove_file(&staging);
            }
        }
    }
}

fn compress(job: Job, level: Compression) -> io::Result<u64> {
    let mut input = BufReader::new(File::open(&job.source)?);
    let mut encoder = GzEncoder::new(BufWriter::new(job.output), level);
    io::copy(&mut input, &mut encoder)?;

    let mut writer = encoder.finish()?;
    writer.flush()?;
    let output = writer.into_inner().map_err(|e| e.into_error())?;
    output.sync_all()?;
    let len = output.metadata()?.len();

    fs::rename(&job.staging, &job.target)?;
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_like_types() {
        assert!(is_text_like("text/html"));
        assert!(is_text_like("application/json; charset=utf-8"));
        assert!(!is_text_like("image/png"));
    }

    #[test]
    fn staging_suffix_is_appended() {
        assert_eq!(
            staging_path(Path::new("/c/gzip.a%2Fb")),
            PathBuf::from("/c/gzip.a%2Fb.tmp")
        );
    }
}
