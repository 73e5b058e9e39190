//! Request routing.
//!
//! A [`Route`] pairs a [`Matcher`] with an action that fills in a reply.
//! Routes are tried in registration order and the first match wins;
//! requests no route claims fall through to static file serving.

use std::fmt;
use std::path::PathBuf;

use regex::Regex;

use crate::http::body::BodyReader;
use crate::http::decode::{resolve_under, url_decode};
use crate::http::reply::Reply;
use crate::http::request::Request;

/// Action invoked for a matched request.
///
/// It may complete the request body through the [`BodyReader`] and fills
/// in the reply. A reply left at status 200 gets default headers added
/// afterwards.
pub type Action = Box<dyn Fn(&mut Request, &mut Reply, &mut BodyReader<'_>) + Send + Sync>;

/// Predicate deciding whether a route handles a request.
pub enum Matcher {
    /// The method equals `method` and the whole URI matches `pattern`.
    Pattern { method: String, pattern: Regex },
    /// A GET whose decoded path names a directory under `doc_root`.
    Directory { doc_root: PathBuf },
    /// Arbitrary predicate.
    Custom(Box<dyn Fn(&Request) -> bool + Send + Sync>),
}

impl Matcher {
    /// Builds a pattern matcher. The pattern must match the entire URI.
    pub fn pattern(method: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Matcher::Pattern {
            method: method.into(),
            pattern: Regex::new(&format!("^(?:{pattern})$"))?,
        })
    }

    pub fn directory(doc_root: impl Into<PathBuf>) -> Self {
        Matcher::Directory {
            doc_root: doc_root.into(),
        }
    }

    pub fn custom(predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        Matcher::Custom(Box::new(predicate))
    }

    pub fn matches(&self, req: &Request) -> bool {
        match self {
            Matcher::Pattern { method, pattern } => {
                req.method == *method && pattern.is_match(&req.uri)
            }
            Matcher::Directory { doc_root } => {
                if req.method != "GET" {
                    return false;
                }
                let path = req.uri.split('?').next().unwrap_or("");
                url_decode(path)
                    .and_then(|path| resolve_under(doc_root, &path))
                    .is_some_and(|dir| dir.is_dir())
            }
            Matcher::Custom(predicate) => predicate(req),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Pattern { method, pattern } => f
                .debug_struct("Pattern")
                .field("method", method)
                .field("pattern", &pattern.as_str())
                .finish(),
            Matcher::Directory { doc_root } => f
                .debug_struct("Directory")
                .field("doc_root", doc_root)
                .finish(),
            Matcher::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// A matcher and its action.
pub struct Route {
    matcher: Matcher,
    action: Action,
}

impl Route {
    pub fn new(
        matcher: Matcher,
        action: impl Fn(&mut Request, &mut Reply, &mut BodyReader<'_>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            matcher,
            action: Box::new(action),
        }
    }

    /// Shorthand for a GET route on a URI pattern.
    pub fn get(
        pattern: &str,
        action: impl Fn(&mut Request, &mut Reply, &mut BodyReader<'_>) + Send + Sync + 'static,
    ) -> Result<Self, regex::Error> {
        Ok(Self::new(Matcher::pattern("GET", pattern)?, action))
    }

    pub fn matches(&self, req: &Request) -> bool {
        self.matcher.matches(req)
    }

    pub fn invoke(&self, req: &mut Request, reply: &mut Reply, body: &mut BodyReader<'_>) {
        (self.action)(req, reply, body)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}
