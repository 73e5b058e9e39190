//! HTML directory listings.

use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use tracing::warn;
use url::form_urlencoded;

use crate::http::body::BodyReader;
use crate::http::decode::{resolve_under, url_decode};
use crate::http::reply::{Reply, StatusCode};
use crate::http::request::Request;
use crate::http::route::{Matcher, Route};

/// A route listing any directory under `doc_root` requested with GET.
pub fn listing_route(doc_root: &Path) -> Route {
    let root = doc_root.to_path_buf();
    Route::new(
        Matcher::directory(root.clone()),
        move |req: &mut Request, reply: &mut Reply, _body: &mut BodyReader<'_>| {
            list_directory(req, reply, &root)
        },
    )
}

/// Fills `reply` with a listing of the directory the request names,
/// newest entries first.
pub fn list_directory(req: &Request, reply: &mut Reply, doc_root: &Path) {
    match render(req, doc_root) {
        Ok(html) => {
            reply.content = html.into_bytes();
            reply.add_header("Cache-Control", "max-age=60");
            reply.add_header("Content-Type", "text/html");
        }
        Err(e) => {
            warn!(uri = %req.uri, error = %e, "directory listing failed");
            *reply = Reply::stock(StatusCode::InternalServerError);
            reply.add_header("Cache-Control", "no-cache");
        }
    }
}

fn render(req: &Request, doc_root: &Path) -> io::Result<String> {
    let uri = req.uri.split('?').next().unwrap_or("");
    let bad_path = || io::Error::new(io::ErrorKind::InvalidInput, "bad directory path");
    let path = url_decode(uri).ok_or_else(bad_path)?;
    let dir = resolve_under(doc_root, &path).ok_or_else(bad_path)?;

    let mut entries = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_dir() && !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push((modified, name, meta.is_dir()));
    }
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let base = if path.ends_with('/') {
        path.clone()
    } else {
        format!("{path}/")
    };

    let mut html = format!("<h1>Directory listing of {}</h1>", escape(&path));
    if let Some(parent) = parent_link(&base) {
        html.push_str(&format!("<a href=\"{}\">..</a><br/>", encode_path(&parent)));
    }
    for (_, name, is_dir) in entries {
        let slash = if is_dir { "/" } else { "" };
        html.push_str(&format!(
            "<a href=\"{}{}{slash}\">{}{slash}</a><br/>",
            encode_path(&base),
            encode_path(&name),
            escape(&name),
        ));
    }
    Ok(html)
}

/// Link to the parent of a directory path ending in '/', none at the root.
fn parent_link(base: &str) -> Option<String> {
    let trimmed = base.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let cut = trimmed.rfind('/').map(|i| i + 1).unwrap_or(1);
    Some(trimmed[..cut].to_string())
}

/// Percent-encodes each `/`-separated segment for use in an `href`.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| form_urlencoded::byte_serialize(segment.as_bytes()).collect::<String>())
        .collect::<Vec<_>>()
        .join("/")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}
