//! Incremental HTTP/1.x request-head parser.
//!
//! The parser is a byte-at-a-time state machine, so a request head may be
//! fed in arbitrary chunks: feeding a head in one call or split across many
//! produces the same [`Request`]. Body bytes are never consumed here.

use crate::http::request::{Header, Request};

/// Outcome of feeding bytes to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// The head is complete; bytes after the consumed count belong to the body
    /// or to the next request.
    Complete,
    /// The input is not a valid request head.
    Invalid,
    /// All input was consumed without reaching the end of the head.
    NeedMoreData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    MethodStart,
    Method,
    Uri,
    VersionH,
    VersionT1,
    VersionT2,
    VersionP,
    VersionSlash,
    MajorStart,
    Major,
    MinorStart,
    Minor,
    ExpectingNewline1,
    HeaderLineStart,
    HeaderLws,
    HeaderName,
    SpaceBeforeHeaderValue,
    HeaderValue,
    ExpectingNewline2,
    ExpectingNewline3,
}

/// Parser for incoming request heads.
#[derive(Debug)]
pub struct RequestParser {
    state: State,
    // Raw bytes of the URI or header value being read. These may carry
    // non-ASCII bytes, so they are decoded once the field ends.
    pending: Vec<u8>,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: State::MethodStart,
            pending: Vec::new(),
        }
    }

    /// Returns the parser to its initial state.
    pub fn reset(&mut self) {
        self.state = State::MethodStart;
        self.pending.clear();
    }

    /// Feeds `input` into the parser, filling `req` as fields complete.
    ///
    /// Stops at the first definite result. Returns the status together with
    /// the number of bytes consumed; on [`ParseStatus::NeedMoreData`] that is
    /// all of `input`.
    pub fn parse(&mut self, req: &mut Request, input: &[u8]) -> (ParseStatus, usize) {
        for (i, &byte) in input.iter().enumerate() {
            if let Some(status) = self.consume(req, byte) {
                return (status, i + 1);
            }
        }
        (ParseStatus::NeedMoreData, input.len())
    }

    fn consume(&mut self, req: &mut Request, c: u8) -> Option<ParseStatus> {
        use ParseStatus::{Complete, Invalid};

        match self.state {
            State::MethodStart => {
                if !is_token(c) {
                    return Some(Invalid);
                }
                self.state = State::Method;
                req.method.push(c as char);
            }
            State::Method => {
                if c == b' ' {
                    self.state = State::Uri;
                } else if !is_token(c) {
                    return Some(Invalid);
                } else {
                    req.method.push(c as char);
                }
            }
            State::Uri => {
                if c == b' ' {
                    req.uri = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    self.state = State::VersionH;
                } else if is_ctl(c) {
                    return Some(Invalid);
                } else {
                    self.pending.push(c);
                }
            }
            State::VersionH => return self.expect(c, b'H', State::VersionT1),
            State::VersionT1 => return self.expect(c, b'T', State::VersionT2),
            State::VersionT2 => return self.expect(c, b'T', State::VersionP),
            State::VersionP => return self.expect(c, b'P', State::VersionSlash),
            State::VersionSlash => {
                if c != b'/' {
                    return Some(Invalid);
                }
                req.http_version_major = 0;
                req.http_version_minor = 0;
                self.state = State::MajorStart;
            }
            State::MajorStart | State::Major => {
                if c == b'.' && self.state == State::Major {
                    self.state = State::MinorStart;
                } else if c.is_ascii_digit() {
                    match push_digit(req.http_version_major, c) {
                        Some(v) => req.http_version_major = v,
                        None => return Some(Invalid),
                    }
                    self.state = State::Major;
                } else {
                    return Some(Invalid);
                }
            }
            State::MinorStart | State::Minor => {
                if c == b'\r' && self.state == State::Minor {
                    self.state = State::ExpectingNewline1;
                } else if c.is_ascii_digit() {
                    match push_digit(req.http_version_minor, c) {
                        Some(v) => req.http_version_minor = v,
                        None => return Some(Invalid),
                    }
                    self.state = State::Minor;
                } else {
                    return Some(Invalid);
                }
            }
            State::ExpectingNewline1 => return self.expect(c, b'\n', State::HeaderLineStart),
            State::HeaderLineStart => {
                if c == b'\r' {
                    self.state = State::ExpectingNewline3;
                } else if !req.headers.is_empty() && (c == b' ' || c == b'\t') {
                    self.state = State::HeaderLws;
                } else if !is_token(c) {
                    return Some(Invalid);
                } else {
                    let mut header = Header::default();
                    header.name.push(c as char);
                    req.headers.push(header);
                    self.state = State::HeaderName;
                }
            }
            State::HeaderLws => {
                if c == b'\r' {
                    self.state = State::ExpectingNewline2;
                } else if c == b' ' || c == b'\t' {
                    // folded whitespace is dropped
                } else if is_ctl(c) {
                    return Some(Invalid);
                } else {
                    self.pending.push(c);
                    self.state = State::HeaderValue;
                }
            }
            State::HeaderName => {
                if c == b':' {
                    self.state = State::SpaceBeforeHeaderValue;
                } else if !is_token(c) {
                    return Some(Invalid);
                } else if let Some(header) = req.headers.last_mut() {
                    header.name.push(c as char);
                }
            }
            State::SpaceBeforeHeaderValue => return self.expect(c, b' ', State::HeaderValue),
            State::HeaderValue => {
                if c == b'\r' {
                    if let Some(header) = req.headers.last_mut() {
                        header.value.push_str(&String::from_utf8_lossy(&self.pending));
                    }
                    self.pending.clear();
                    self.state = State::ExpectingNewline2;
                } else if is_ctl(c) {
                    return Some(Invalid);
                } else {
                    self.pending.push(c);
                }
            }
            State::ExpectingNewline2 => return self.expect(c, b'\n', State::HeaderLineStart),
            State::ExpectingNewline3 => {
                return Some(if c == b'\n' { Complete } else { Invalid });
            }
        }
        None
    }

    fn expect(&mut self, c: u8, wanted: u8, next: State) -> Option<ParseStatus> {
        if c == wanted {
            self.state = next;
            None
        } else {
            Some(ParseStatus::Invalid)
        }
    }
}

fn push_digit(value: u32, digit: u8) -> Option<u32> {
    value.checked_mul(10)?.checked_add(u32::from(digit - b'0'))
}

fn is_char(c: u8) -> bool {
    c <= 127
}

fn is_ctl(c: u8) -> bool {
    c <= 31 || c == 127
}

fn is_tspecial(c: u8) -> bool {
    matches!(
        c,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

/// Valid in method names and header names.
fn is_token(c: u8) -> bool {
    is_char(c) && !is_ctl(c) && !is_tspecial(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let mut parser = RequestParser::new();
        let mut req = Request::new();

        let (status, consumed) = parser.parse(&mut req, raw);

        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(consumed, raw.len());
        assert_eq!(req.uri, "/");
        assert_eq!(req.header("Host"), Some("example.com"));
    }

    #[test]
    fn tab_is_a_separator_in_header_names() {
        let mut parser = RequestParser::new();
        let mut req = Request::new();

        let (status, _) = parser.parse(&mut req, b"GET / HTTP/1.1\r\nBad\tName: x\r\n\r\n");
        assert_eq!(status, ParseStatus::Invalid);
    }

    #[test]
    fn oversized_version_is_invalid() {
        let mut parser = RequestParser::new();
        let mut req = Request::new();

        let (status, _) = parser.parse(&mut req, b"GET / HTTP/99999999999.1\r\n\r\n");
        assert_eq!(status, ParseStatus::Invalid);
    }
}
