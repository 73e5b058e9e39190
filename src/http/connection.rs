use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, trace};

use crate::http::body::BodyReader;
use crate::http::handler::RequestHandler;
use crate::http::parser::{ParseStatus, RequestParser};
use crate::http::reply::{Reply, StatusCode};
use crate::http::request::Request;
use crate::http::transport::Transport;
use crate::http::writer::ResponseWriter;
use crate::transmit::{SendFile, Transmit};

/// Default size of a connection's read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 40 * 1024;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("tls handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("sendfile failed: {0}")]
    Transmit(#[source] io::Error),

    #[error("failed to drain request body: {0}")]
    Body(#[source] io::Error),
}

/// Statistics shared by all connections.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently open connections
    pub active_connections: AtomicU64,
    /// Total requests answered
    pub requests_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn request_processed(&self) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: u64) {
        self.bytes_written.fetch_add(count, Ordering::Relaxed);
    }
}

/// What every connection needs from the server.
pub struct ConnectionContext {
    pub handler: Arc<RequestHandler>,
    pub stats: Arc<ConnectionStats>,
    pub read_buffer_size: usize,
}

pub enum ConnectionState {
    /// Accumulating and parsing a request head.
    Reading,
    /// A complete head is parsed; run the handler.
    Dispatching,
    /// Discarding body bytes the handler never read.
    Draining { reply: Reply, remaining: usize },
    /// Writing the head and any in-process body.
    Writing { reply: Reply, writer: ResponseWriter },
    /// Sending a file body with sendfile.
    Transmitting { reply: Reply, sendfile: SendFile },
    Closing,
    Closed,
}

/// One client connection, from first byte to close.
///
/// Requests are served one at a time. After each reply the connection
/// either starts over for the next request (bytes already buffered are
/// kept, so pipelined requests work) or closes.
pub struct Connection {
    transport: Transport,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
    buffer: Box<[u8]>,
    start: usize,
    end: usize,
    parser: RequestParser,
    request: Request,
    state: ConnectionState,
}

/// Serves a freshly accepted socket until it closes, running the TLS
/// handshake first when an acceptor is given.
pub async fn serve(
    socket: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    ctx: Arc<ConnectionContext>,
) -> Result<(), ConnectionError> {
    ctx.stats.connection_opened();
    let result = async {
        let transport = match tls {
            None => Transport::Plain(socket),
            Some(acceptor) => {
                let stream = acceptor
                    .accept(socket)
                    .await
                    .map_err(ConnectionError::Handshake)?;
                Transport::Tls(Box::new(stream))
            }
        };
        Connection::new(transport, peer, ctx.clone()).run().await
    }
    .await;
    ctx.stats.connection_closed();
    result
}

impl Connection {
    pub fn new(transport: Transport, peer: SocketAddr, ctx: Arc<ConnectionContext>) -> Self {
        let size = ctx.read_buffer_size.max(1);
        Self {
            transport,
            peer,
            ctx,
            buffer: vec![0; size].into_boxed_slice(),
            start: 0,
            end: 0,
            parser: RequestParser::new(),
            request: Request::new(),
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        trace!(peer = %self.peer, "connection started");
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
            let next = match state {
                ConnectionState::Reading => self.read_request().await,
                ConnectionState::Dispatching => Ok(self.dispatch()),
                ConnectionState::Draining { reply, remaining } => {
                    self.drain_body(reply, remaining).await
                }
                ConnectionState::Writing { reply, writer } => self.write_reply(reply, writer).await,
                ConnectionState::Transmitting { reply, sendfile } => {
                    self.transmit(reply, sendfile).await
                }
                ConnectionState::Closing => {
                    self.transport.close().await;
                    Ok(ConnectionState::Closed)
                }
                ConnectionState::Closed => break,
            };

            self.state = next.unwrap_or_else(|e| {
                debug!(peer = %self.peer, error = %e, "closing connection");
                ConnectionState::Closing
            });
        }
        trace!(peer = %self.peer, "connection closed");
        Ok(())
    }

    async fn read_request(&mut self) -> Result<ConnectionState, ConnectionError> {
        loop {
            if self.start < self.end {
                let (status, consumed) = self
                    .parser
                    .parse(&mut self.request, &self.buffer[self.start..self.end]);
                self.start += consumed;

                match status {
                    ParseStatus::Complete => return Ok(ConnectionState::Dispatching),
                    ParseStatus::Invalid => {
                        debug!(peer = %self.peer, "malformed request");
                        let mut reply = Reply::stock(StatusCode::BadRequest);
                        reply.set_keep_alive(false);
                        return Ok(begin_write(reply));
                    }
                    ParseStatus::NeedMoreData => {}
                }
            }

            // The parser consumed everything, so the buffer can start over.
            self.start = 0;
            self.end = 0;

            let n = self.transport.read(&mut self.buffer[..]).await?;
            if n == 0 {
                return Ok(ConnectionState::Closing);
            }
            self.end = n;
            self.ctx.stats.bytes_read(n);
        }
    }

    fn dispatch(&mut self) -> ConnectionState {
        let declared = self.request.content_length().unwrap_or(0);
        let buffered = declared.min(self.end - self.start);
        self.request
            .body
            .extend_from_slice(&self.buffer[self.start..self.start + buffered]);
        self.start += buffered;

        let kind = self.transport.kind();
        let (reply, remaining) = {
            let mut source = self.transport.blocking();
            let mut body = BodyReader::new(&mut source, declared - buffered);
            let reply = self.ctx.handler.handle(&mut self.request, &mut body, kind);
            (reply, body.remaining())
        };

        self.ctx.stats.request_processed();
        debug!(
            peer = %self.peer,
            method = %self.request.method,
            uri = %self.request.uri,
            status = reply.status.as_u16(),
            "request handled"
        );

        if remaining > 0 {
            ConnectionState::Draining { reply, remaining }
        } else {
            begin_write(reply)
        }
    }

    async fn drain_body(
        &mut self,
        reply: Reply,
        mut remaining: usize,
    ) -> Result<ConnectionState, ConnectionError> {
        trace!(peer = %self.peer, remaining, "draining unread body");
        // Everything buffered was taken into the body, so the buffer is free.
        self.start = 0;
        self.end = 0;
        while remaining > 0 {
            let want = remaining.min(self.buffer.len());
            let n = self
                .transport
                .read(&mut self.buffer[..want])
                .await
                .map_err(ConnectionError::Body)?;
            if n == 0 {
                return Err(ConnectionError::Body(io::ErrorKind::UnexpectedEof.into()));
            }
            self.ctx.stats.bytes_read(n);
            remaining -= n;
        }
        Ok(begin_write(reply))
    }

    async fn write_reply(
        &mut self,
        reply: Reply,
        mut writer: ResponseWriter,
    ) -> Result<ConnectionState, ConnectionError> {
        writer.write_to(&mut self.transport).await?;
        self.ctx.stats.bytes_written(writer.written() as u64);

        if let Transmit::SendFile(file) = &reply.transmit {
            let sendfile = SendFile::new(file.clone());
            return Ok(ConnectionState::Transmitting { reply, sendfile });
        }
        Ok(self.finish(&reply))
    }

    async fn transmit(
        &mut self,
        reply: Reply,
        mut sendfile: SendFile,
    ) -> Result<ConnectionState, ConnectionError> {
        let sent = sendfile
            .run(self.transport.tcp())
            .await
            .map_err(ConnectionError::Transmit)?;
        self.ctx.stats.bytes_written(sent);

        if sent < reply.body_len() {
            // The file shrank; the client is owed bytes that will never come.
            debug!(peer = %self.peer, sent, expected = reply.body_len(), "short sendfile");
            return Ok(ConnectionState::Closing);
        }
        Ok(self.finish(&reply))
    }

    fn finish(&mut self, reply: &Reply) -> ConnectionState {
        if reply.keep_alive() {
            self.request.reset();
            self.parser.reset();
            ConnectionState::Reading
        } else {
            ConnectionState::Closing
        }
    }
}

fn begin_write(mut reply: Reply) -> ConnectionState {
    let writer = ResponseWriter::new(&mut reply);
    ConnectionState::Writing { reply, writer }
}
