//! Filament - static and routed HTTP/HTTPS file server
//!
//! Core library: request parsing, routing, zero-copy file transmission and
//! the shared resource caches behind it.

pub mod cache;
pub mod config;
pub mod http;
pub mod listing;
pub mod server;
pub mod transmit;
