use std::io;

use crate::http::body::BodyReader;

/// A single HTTP header line.
///
/// Header lists never enforce unique names; duplicate names are legal and
/// lookups return the first match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Returns the first header named `name` (ASCII case-insensitive).
pub(crate) fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a Header> {
    headers.iter().find(|h| h.name.eq_ignore_ascii_case(name))
}

/// Represents an HTTP request received from a client.
///
/// Requests are created empty at the start of each parse cycle and filled in
/// incrementally by the [`RequestParser`](crate::http::parser::RequestParser).
/// The body holds whatever bytes arrived together with the headers; the rest
/// of a declared body is pulled on demand through a [`BodyReader`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// The request method token, e.g. "GET"
    pub method: String,
    /// The raw request target, e.g. "/index.html?x=1"
    pub uri: String,
    pub http_version_major: u32,
    pub http_version_minor: u32,
    /// Headers in the order they were received
    pub headers: Vec<Header>,
    /// Body bytes read so far
    pub body: Vec<u8>,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            request: Request {
                method: "GET".to_string(),
                uri: "/".to_string(),
                http_version_major: 1,
                http_version_minor: 1,
                ..Request::default()
            },
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.request.method = method.into();
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.request.uri = uri.into();
        self
    }

    pub fn version(mut self, major: u32, minor: u32) -> Self {
        self.request.http_version_major = major;
        self.request.http_version_minor = minor;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push(Header::new(name, value));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.request.body = body;
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieves a header value by name.
    ///
    /// Names compare ASCII case-insensitively. When the same name appears
    /// more than once, the first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name).map(|h| h.value.as_str())
    }

    /// The declared Content-Length, if present and a valid number.
    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// Only an explicit `Connection: close` turns keep-alive off, whatever
    /// the request's HTTP version.
    pub fn keep_alive(&self) -> bool {
        self.header("Connection")
            .map(|v| !v.trim().eq_ignore_ascii_case("close"))
            .unwrap_or(true)
    }

    /// Whether `Accept-Encoding` lists gzip.
    pub fn accepts_gzip(&self) -> bool {
        self.header("Accept-Encoding")
            .map(|v| {
                v.split(',')
                    .map(|coding| coding.split(';').next().unwrap_or("").trim())
                    .any(|coding| coding.eq_ignore_ascii_case("gzip"))
            })
            .unwrap_or(false)
    }

    /// Completes the body by pulling the remaining declared bytes from the
    /// connection. Returns the full body.
    pub fn read_body(&mut self, reader: &mut BodyReader<'_>) -> io::Result<&[u8]> {
        reader.read_into(&mut self.body)?;
        Ok(&self.body)
    }

    /// Clears all fields so the request can be reused for the next message
    /// on a kept-alive connection.
    pub fn reset(&mut self) {
        self.method.clear();
        self.uri.clear();
        self.http_version_major = 0;
        self.http_version_minor = 0;
        self.headers.clear();
        self.body.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_duplicate_header_wins() {
        let req = RequestBuilder::new()
            .header("Content-Length", "3")
            .header("content-length", "9")
            .build();

        assert_eq!(req.header("CONTENT-LENGTH"), Some("3"));
        assert_eq!(req.content_length(), Some(3));
    }

    #[test]
    fn reset_clears_everything() {
        let mut req = RequestBuilder::new()
            .header("Host", "example.com")
            .body(b"abc".to_vec())
            .build();
        req.reset();

        assert_eq!(req, Request::default());
    }
}
