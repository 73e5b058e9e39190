use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use tokio::io::Interest;
use tokio::net::TcpStream;
use tracing::trace;

use crate::cache::file::CachedFile;

/// Whether the platform has a usable `sendfile(2)`.
pub const SUPPORTED: bool = cfg!(any(target_os = "linux", target_os = "android"));

/// Largest chunk handed to a single `sendfile` call.
const MAX_CHUNK: u64 = 1 << 30;

/// An in-progress kernel-side copy of a whole file into a socket.
pub struct SendFile {
    file: Arc<CachedFile>,
    offset: libc::off_t,
    len: u64,
    sent: u64,
}

impl SendFile {
    pub fn new(file: Arc<CachedFile>) -> Self {
        let len = file.len();
        Self {
            file,
            offset: 0,
            len,
            sent: 0,
        }
    }

    /// Bytes still to send.
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.offset as u64)
    }

    /// Runs the copy to completion and returns the number of bytes sent.
    ///
    /// Interrupted calls are retried and a full socket buffer waits for
    /// writability. The transfer stops early if the file turns out shorter
    /// than when it was opened.
    pub async fn run(&mut self, socket: &TcpStream) -> io::Result<u64> {
        let out_fd = socket.as_raw_fd();
        let in_fd = self.file.as_raw_fd();

        while self.remaining() > 0 {
            let count = self.remaining().min(MAX_CHUNK) as usize;
            let offset = &mut self.offset;
            match socket.try_io(Interest::WRITABLE, || sendfile(out_fd, in_fd, offset, count)) {
                Ok(0) => break,
                Ok(n) => self.sent += n as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => socket.writable().await?,
                Err(e) => return Err(e),
            }
        }

        trace!(path = %self.file.path().display(), bytes = self.sent, "sendfile complete");
        Ok(self.sent)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn sendfile(out_fd: RawFd, in_fd: RawFd, offset: &mut libc::off_t, count: usize) -> io::Result<usize> {
    // SAFETY: both descriptors are open for the duration of the call and
    // `offset` is a valid exclusive pointer.
    let n = unsafe { libc::sendfile(out_fd, in_fd, offset, count) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn sendfile(_out_fd: RawFd, _in_fd: RawFd, _offset: &mut libc::off_t, _count: usize) -> io::Result<usize> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "sendfile is not available"))
}
