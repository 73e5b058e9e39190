use std::io::{self, IoSlice};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::cache::mapping::CachedMapping;
use crate::http::reply::Reply;
use crate::transmit::Transmit;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes the status line and headers, ending with the blank line.
pub fn serialize_head(reply: &Reply) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);

    // Status line
    buf.put_slice(HTTP_VERSION.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(reply.status.as_u16().to_string().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(reply.status.reason_phrase().as_bytes());
    buf.put_slice(b"\r\n");

    // Headers
    for header in &reply.headers {
        buf.put_slice(header.name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(header.value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    // Header/body separator
    buf.put_slice(b"\r\n");
    buf
}

/// Serializes a whole in-memory reply. Zero-copy bodies are not included.
pub fn serialize_reply(reply: &Reply) -> Vec<u8> {
    let mut buf = serialize_head(reply);
    if let Transmit::None = reply.transmit {
        buf.put_slice(&reply.content);
    }
    buf.to_vec()
}

enum Body {
    Empty,
    Content(Bytes),
    Mapped(Arc<CachedMapping>),
}

impl Body {
    fn as_slice(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Content(bytes) => &bytes[..],
            Body::Mapped(mapping) => mapping.as_slice(),
        }
    }
}

/// Writes a reply's head and in-process body as a gather write.
///
/// Replies using `sendfile` only get their head written here; the file
/// follows through the kernel.
pub struct ResponseWriter {
    head: Bytes,
    body: Body,
    written: usize,
}

impl ResponseWriter {
    /// Prepares the write. The reply's content is moved out, not copied.
    pub fn new(reply: &mut Reply) -> Self {
        let head = serialize_head(reply).freeze();
        let body = match &reply.transmit {
            Transmit::None => Body::Content(Bytes::from(std::mem::take(&mut reply.content))),
            Transmit::MemoryMap(mapping) => Body::Mapped(mapping.clone()),
            Transmit::SendFile(_) => Body::Empty,
        };
        Self {
            head,
            body,
            written: 0,
        }
    }

    /// Total bytes this writer puts on the wire.
    pub fn len(&self) -> usize {
        self.head.len() + self.body.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub async fn write_to<W>(&mut self, stream: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let total = self.len();
        while self.written < total {
            let n = {
                let head = &self.head[..];
                let body = self.body.as_slice();
                let (head_rest, body_rest) = if self.written < head.len() {
                    (&head[self.written..], body)
                } else {
                    (&head[..0], &body[self.written - head.len()..])
                };
                let bufs = [IoSlice::new(head_rest), IoSlice::new(body_rest)];
                stream.write_vectored(&bufs).await?
            };

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            self.written += n;
        }

        stream.flush().await
    }
}
