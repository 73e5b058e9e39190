//! Request dispatch: registered routes first, static files otherwise.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::cache::compressed::{CompressedArtifact, Lookup};
use crate::cache::{CacheError, ResourceCaches};
use crate::http::body::BodyReader;
use crate::http::decode::{resolve_under, url_decode};
use crate::http::mime::mime_type;
use crate::http::reply::{Reply, StatusCode};
use crate::http::request::Request;
use crate::http::route::Route;
use crate::http::transport::TransportKind;
use crate::transmit::{self, Transmit};

const INDEX_FILE: &str = "index.html";

/// Turns parsed requests into replies.
///
/// One handler is built at startup and shared by every connection.
pub struct RequestHandler {
    doc_root: PathBuf,
    routes: Vec<Route>,
    caches: Arc<ResourceCaches>,
    gzip_level: Compression,
}

impl RequestHandler {
    pub fn new(doc_root: impl Into<PathBuf>, caches: Arc<ResourceCaches>) -> Self {
        Self {
            doc_root: doc_root.into(),
            routes: Vec::new(),
            caches,
            gzip_level: Compression::default(),
        }
    }

    /// Compression level for gzipped dynamic content.
    pub fn with_gzip_level(mut self, level: u32) -> Self {
        self.gzip_level = Compression::new(level.min(9));
        self
    }

    /// Registers a route. Routes are matched in registration order.
    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.add_route(route);
        self
    }

    /// Produces the reply for a request.
    ///
    /// The reply always carries a `Connection` header reflecting whether
    /// the connection stays open afterwards.
    pub fn handle(
        &self,
        req: &mut Request,
        body: &mut BodyReader<'_>,
        transport: TransportKind,
    ) -> Reply {
        match self.routes.iter().find(|route| route.matches(req)) {
            Some(route) => self.handle_route(route, req, body),
            None => self.serve_static(req, transport),
        }
    }

    fn handle_route(&self, route: &Route, req: &mut Request, body: &mut BodyReader<'_>) -> Reply {
        let mut reply = Reply::default();
        route.invoke(req, &mut reply, body);

        if reply.status == StatusCode::Ok {
            self.fill_defaults(req, &mut reply);
        }
        finish_connection(req, &mut reply);
        reply
    }

    fn fill_defaults(&self, req: &Request, reply: &mut Reply) {
        if reply.header("Content-Encoding").is_none() {
            let compress = req.accepts_gzip()
                && !reply.content.is_empty()
                && !reply.transmit.is_zero_copy()
                && reply.header("Content-Length").is_none();

            let encoding = if compress {
                match gzip(&reply.content, self.gzip_level) {
                    Ok(compressed) => {
                        reply.content = compressed;
                        reply.add_header("Vary", "Accept-Encoding");
                        "gzip"
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to compress reply");
                        "identity"
                    }
                }
            } else {
                "identity"
            };
            reply.add_header("Content-Encoding", encoding);
        }

        if reply.header("Content-Length").is_none() {
            let len = reply.body_len();
            reply.add_header("Content-Length", len.to_string());
        }
        if reply.header("Content-Type").is_none() {
            reply.add_header("Content-Type", "text/plain");
        }
    }

    fn serve_static(&self, req: &Request, transport: TransportKind) -> Reply {
        let raw_path = req.uri.split('?').next().unwrap_or("");
        let Some(mut path) = url_decode(raw_path) else {
            return stock(req, StatusCode::BadRequest);
        };
        if path.is_empty() || !path.starts_with('/') || path.contains("..") {
            return stock(req, StatusCode::BadRequest);
        }
        if path.ends_with('/') {
            path.push_str(INDEX_FILE);
        }

        let Some(full) = resolve_under(&self.doc_root, &path) else {
            return stock(req, StatusCode::BadRequest);
        };
        let relative = &path[1..];
        let meta = match fs::metadata(&full) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return stock(req, StatusCode::NotFound),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return stock(req, StatusCode::Forbidden);
            }
            Err(_) => return stock(req, StatusCode::NotFound),
        };

        let mime = mime_type(&full);
        let artifact = if req.accepts_gzip() {
            self.compressed_artifact(&full, relative, &mime, meta.len())
        } else {
            None
        };

        let served = match &artifact {
            Some(artifact) => self
                .attach(artifact.path(), transport)
                .map(|t| (t, "gzip"))
                .or_else(|e| {
                    debug!(error = %e, "artifact vanished, serving original");
                    self.attach(&full, transport).map(|t| (t, "identity"))
                }),
            None => self.attach(&full, transport).map(|t| (t, "identity")),
        };
        let (transmit, encoding) = match served {
            Ok(served) => served,
            Err(e) => return cache_failure(req, &e),
        };

        let mut reply = Reply::new(StatusCode::Ok);
        reply.transmit = transmit;
        if encoding == "gzip" {
            reply.artifact = artifact;
        }
        let len = reply.body_len();
        reply.add_header("Content-Length", len.to_string());
        reply.add_header("Content-Encoding", encoding);
        reply.add_header("Content-Type", mime);
        if self.caches.compressed.is_some() {
            reply.add_header("Vary", "Accept-Encoding");
        }
        finish_connection(req, &mut reply);
        reply
    }

    fn compressed_artifact(
        &self,
        full: &Path,
        relative: &str,
        mime: &str,
        len: u64,
    ) -> Option<Arc<CompressedArtifact>> {
        let cache = self.caches.compressed.as_ref()?;
        if !cache.should_compress(mime, len) {
            return None;
        }
        match cache.get(full, relative) {
            Ok(Lookup::Ready(artifact)) => Some(artifact),
            Ok(Lookup::Pending) => None,
            Err(e) => {
                warn!(path = %full.display(), error = %e, "compressed artifact lookup failed");
                None
            }
        }
    }

    /// Picks the zero-copy strategy the transport can use for `path`.
    fn attach(&self, path: &Path, transport: TransportKind) -> Result<Transmit, CacheError> {
        match transport {
            TransportKind::Plain if transmit::sendfile::SUPPORTED => {
                self.caches.files.get(path).map(Transmit::SendFile)
            }
            _ => self.caches.mappings.get(path).map(Transmit::MemoryMap),
        }
    }
}

/// Sets `Connection` from the reply's own choice if it made one, else from
/// the request.
fn finish_connection(req: &Request, reply: &mut Reply) {
    let keep_alive = match reply.header("Connection") {
        Some(_) => reply.keep_alive(),
        None => req.keep_alive(),
    };
    reply.set_keep_alive(keep_alive);
}

fn stock(req: &Request, status: StatusCode) -> Reply {
    let mut reply = Reply::stock(status);
    reply.set_keep_alive(req.keep_alive());
    reply
}

fn cache_failure(req: &Request, err: &CacheError) -> Reply {
    if err.is_not_found() {
        stock(req, StatusCode::NotFound)
    } else if err.is_permission_denied() {
        stock(req, StatusCode::Forbidden)
    } else {
        warn!(error = %err, "failed to prepare file");
        stock(req, StatusCode::InternalServerError)
    }
}

fn gzip(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), level);
    encoder.write_all(data)?;
    encoder.finish()
}
