//! Listening sockets, TLS setup and the reactor pool.

pub mod listener;
pub mod pool;
pub mod tls;

pub use listener::{shutdown_signal, Server};
