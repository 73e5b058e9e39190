use std::path::{Component, Path, PathBuf};

/// Decodes a percent-encoded request path.
///
/// `%XX` becomes the byte `0xXX` and `+` becomes a space. Returns `None`
/// for a truncated or non-hex escape, or when the decoded bytes are not
/// UTF-8.
///
/// # Example
///
/// ```
/// # use filament::http::decode::url_decode;
/// assert_eq!(url_decode("/a%20b+c").as_deref(), Some("/a b c"));
/// assert_eq!(url_decode("/bad%2"), None);
/// ```
pub fn url_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = hex_value(*bytes.get(i + 1)?)?;
                let lo = hex_value(*bytes.get(i + 2)?)?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8(out).ok()
}

/// Maps a decoded, `/`-rooted request path onto a file under `root`.
///
/// Every segment after the leading slash must be a plain file name: empty
/// segments (`//`), `.` and `..` are refused, so the result never leaves
/// `root`. A single trailing slash is allowed.
///
/// ```
/// # use std::path::Path;
/// # use filament::http::decode::resolve_under;
/// let root = Path::new("/srv/www");
/// assert_eq!(resolve_under(root, "/a/b.txt"), Some(root.join("a/b.txt")));
/// assert_eq!(resolve_under(root, "//etc/passwd"), None);
/// ```
pub fn resolve_under(root: &Path, path: &str) -> Option<PathBuf> {
    let rest = path.strip_prefix('/')?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);

    let mut full = root.to_path_buf();
    if rest.is_empty() {
        return Some(full);
    }
    for segment in rest.split('/') {
        let mut parts = Path::new(segment).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(name)), None) if name.to_str() == Some(segment) => {
                full.push(name)
            }
            _ => return None,
        }
    }
    Some(full)
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_escapes_and_plus() {
        assert_eq!(url_decode("/%7Euser/a+b").as_deref(), Some("/~user/a b"));
    }

    #[test]
    fn resolves_plain_segments_only() {
        let root = Path::new("/srv");

        assert_eq!(resolve_under(root, "/"), Some(PathBuf::from("/srv")));
        assert_eq!(resolve_under(root, "/docs/"), Some(PathBuf::from("/srv/docs")));
        assert_eq!(resolve_under(root, "//etc/passwd"), None);
        assert_eq!(resolve_under(root, "/a//b"), None);
        assert_eq!(resolve_under(root, "/a/./b"), None);
        assert_eq!(resolve_under(root, "/a/../b"), None);
        assert_eq!(resolve_under(root, "relative"), None);
    }

    #[test]
    fn rejects_bad_escapes() {
        assert_eq!(url_decode("/x%"), None);
        assert_eq!(url_decode("/x%zz"), None);
    }
}
