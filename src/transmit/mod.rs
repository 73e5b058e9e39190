//! Zero-copy body transmission.
//!
//! A static reply carries its body as a [`Transmit`] strategy rather than
//! as bytes. Plaintext connections hand the file straight to the kernel
//! with `sendfile`. TLS connections cannot (the bytes have to be encrypted
//! in user space), so they send from a shared memory map instead.

pub mod sendfile;

use std::sync::Arc;

use crate::cache::file::CachedFile;
use crate::cache::mapping::CachedMapping;

pub use sendfile::SendFile;

/// How a reply's body gets onto the wire.
#[derive(Debug, Default, Clone)]
pub enum Transmit {
    /// Send `Reply::content`.
    #[default]
    None,
    /// Copy the file into the socket in the kernel.
    SendFile(Arc<CachedFile>),
    /// Write from a memory map of the file.
    MemoryMap(Arc<CachedMapping>),
}

impl Transmit {
    pub fn is_zero_copy(&self) -> bool {
        !matches!(self, Transmit::None)
    }
}
