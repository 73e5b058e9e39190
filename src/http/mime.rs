use std::path::Path;
use std::process::Command;

use tracing::debug;

const FALLBACK: &str = "text/plain";

/// Determines the MIME type of a file.
///
/// Well-known extensions are answered from a built-in table. Anything else
/// is handed to `file --mime-type`, and if that fails the type is
/// `text/plain`.
pub fn mime_type(path: &Path) -> String {
    if let Some(known) = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(from_extension)
    {
        return known.to_string();
    }
    sniff(path).unwrap_or_else(|| FALLBACK.to_string())
}

/// Looks up an extension (without the dot, any case) in the built-in table.
pub fn from_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "xhtml" => "application/xhtml+xml",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "gz" => "application/gzip",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => return None,
    };
    Some(mime)
}

fn sniff(path: &Path) -> Option<String> {
    let output = Command::new("file")
        .arg("--mime-type")
        .arg("-b")
        .arg(path)
        .output()
        .map_err(|e| debug!(error = %e, "file(1) unavailable"))
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let mime = String::from_utf8(output.stdout).ok()?;
    let mime = mime.trim();
    if mime.is_empty() || !mime.contains('/') {
        return None;
    }
    Some(mime.to_string())
}
