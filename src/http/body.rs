//! Deferred request-body access.
//!
//! When a request declares a Content-Length, only the bytes that arrived
//! together with the headers are in [`Request::body`](crate::http::request::Request).
//! A [`BodyReader`] is the capability to pull the rest: it borrows the
//! owning connection's byte source and knows how many declared bytes are
//! still on the wire. Reading is blocking and bounded by that count.

use std::io::{self, Read};

/// Body bytes are copied in pieces of this size, so memory grows with what
/// actually arrives rather than with the declared length.
const CHUNK_SIZE: usize = 16 * 1024;

/// Capability to read the not-yet-received part of a request body.
pub struct BodyReader<'c> {
    source: Option<&'c mut dyn Read>,
    remaining: usize,
}

impl<'c> BodyReader<'c> {
    pub fn new(source: &'c mut dyn Read, remaining: usize) -> Self {
        Self {
            source: Some(source),
            remaining,
        }
    }

    /// A reader for requests without an outstanding body.
    pub fn empty() -> Self {
        Self {
            source: None,
            remaining: 0,
        }
    }

    /// Declared body bytes that have not been read yet.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Reads exactly the remaining declared bytes, appending them to `body`.
    ///
    /// Calling it again once the body is complete is a no-op. A peer that
    /// closes early yields `UnexpectedEof`.
    pub fn read_into(&mut self, body: &mut Vec<u8>) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no body source"))?;

        let start = body.len();
        let mut chunk = [0u8; CHUNK_SIZE];
        while self.remaining > 0 {
            let want = self.remaining.min(CHUNK_SIZE);
            match source.read(&mut chunk[..want]) {
                Ok(0) => {
                    self.remaining = 0;
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed before the declared body was received",
                    ));
                }
                Ok(n) => {
                    body.extend_from_slice(&chunk[..n]);
                    self.remaining -= n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(body.len() - start)
    }
}
