use std::sync::Arc;

use crate::cache::compressed::CompressedArtifact;
use crate::http::request::{find_header, Header};
use crate::transmit::Transmit;

/// HTTP status codes the server can answer with.
///
/// Each code has a canned HTML body used by [`Reply::stock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusCode {
    /// 200 OK
    #[default]
    Ok,
    /// 201 Created
    Created,
    /// 202 Accepted
    Accepted,
    /// 204 No Content
    NoContent,
    /// 300 Multiple Choices
    MultipleChoices,
    /// 301 Moved Permanently
    MovedPermanently,
    /// 302 Moved Temporarily
    MovedTemporarily,
    /// 304 Not Modified
    NotModified,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 502 Bad Gateway
    BadGateway,
    /// 503 Service Unavailable
    ServiceUnavailable,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use filament::http::reply::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::Accepted => 202,
            StatusCode::NoContent => 204,
            StatusCode::MultipleChoices => 300,
            StatusCode::MovedPermanently => 301,
            StatusCode::MovedTemporarily => 302,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::BadGateway => 502,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    /// Returns the reason phrase sent on the status line.
    ///
    /// # Example
    ///
    /// ```
    /// # use filament::http::reply::StatusCode;
    /// assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::MovedTemporarily.reason_phrase(), "Moved Temporarily");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::Accepted => "Accepted",
            StatusCode::NoContent => "No Content",
            StatusCode::MultipleChoices => "Multiple Choices",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::MovedTemporarily => "Moved Temporarily",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// The canned HTML body for this status. Empty for 200.
    pub fn stock_body(&self) -> String {
        match self {
            StatusCode::Ok => String::new(),
            other => {
                let reason = other.reason_phrase();
                format!(
                    "<html><head><title>{reason}</title></head><body><h1>{} {reason}</h1></body></html>",
                    other.as_u16()
                )
            }
        }
    }
}

/// An outgoing HTTP response.
///
/// The body comes either from `content` or from a zero-copy `transmit`
/// strategy attached by the static file path. When a strategy is attached it
/// takes precedence and `content` is not sent.
#[derive(Debug, Default)]
pub struct Reply {
    pub status: StatusCode,
    /// Headers in emission order; duplicates are allowed
    pub headers: Vec<Header>,
    pub content: Vec<u8>,
    pub transmit: Transmit,
    /// Keeps a compressed artifact cached while this reply is in flight.
    pub(crate) artifact: Option<Arc<CompressedArtifact>>,
}

/// Builder for constructing replies in a fluent style.
///
/// ```ignore
/// let reply = ReplyBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .content(b"{}".to_vec())
///     .build();
/// ```
pub struct ReplyBuilder {
    reply: Reply,
}

impl ReplyBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            reply: Reply::new(status),
        }
    }

    /// Appends a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.reply.add_header(name, value);
        self
    }

    pub fn content(mut self, content: Vec<u8>) -> Self {
        self.reply.content = content;
        self
    }

    /// Builds the reply, adding Content-Length from the content if missing.
    pub fn build(mut self) -> Reply {
        if self.reply.header("Content-Length").is_none() {
            let len = self.reply.content.len();
            self.reply.add_header("Content-Length", len.to_string());
        }
        self.reply
    }
}

impl Reply {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// A canned reply: the status page body with Content-Length and an HTML
    /// Content-Type. Connection handling is left to the caller.
    pub fn stock(status: StatusCode) -> Self {
        let content = status.stock_body().into_bytes();
        ReplyBuilder::new(status)
            .header("Content-Length", content.len().to_string())
            .header("Content-Type", "text/html")
            .content(content)
            .build()
    }

    /// First header named `name`, ASCII case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name).map(|h| h.value.as_str())
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header::new(name, value));
    }

    /// Replaces the value of the first header named `name`, or appends it.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        match self
            .headers
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
        {
            Some(h) => h.value = value.into(),
            None => self.headers.push(Header::new(name, value)),
        }
    }

    /// Sets `Connection` to `Keep-Alive` or `Close`.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.set_header("Connection", if keep_alive { "Keep-Alive" } else { "Close" });
    }

    /// Whether the connection stays open after this reply.
    ///
    /// A missing `Connection` header means keep-alive; only `close` ends it.
    pub fn keep_alive(&self) -> bool {
        self.header("Connection")
            .map(|v| !v.trim().eq_ignore_ascii_case("close"))
            .unwrap_or(true)
    }

    /// Number of body bytes this reply will put on the wire.
    pub fn body_len(&self) -> u64 {
        match &self.transmit {
            Transmit::None => self.content.len() as u64,
            Transmit::SendFile(file) => file.len(),
            Transmit::MemoryMap(mapping) => mapping.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_not_found_has_html_body_and_length() {
        let reply = Reply::stock(StatusCode::NotFound);
        let expected = "<html><head><title>Not Found</title></head><body><h1>404 Not Found</h1></body></html>";

        assert_eq!(reply.content, expected.as_bytes());
        assert_eq!(reply.header("content-length"), Some(expected.len().to_string().as_str()));
        assert_eq!(reply.header("Content-Type"), Some("text/html"));
    }

    #[test]
    fn set_header_replaces_first_match() {
        let mut reply = Reply::new(StatusCode::Ok);
        reply.add_header("Connection", "keep-alive");
        reply.set_keep_alive(false);

        assert_eq!(reply.headers.len(), 1);
        assert!(!reply.keep_alive());
    }
}
