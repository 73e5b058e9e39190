//! HTTP/1.x protocol implementation.
//!
//! # Architecture
//!
//! - **`connection`**: Per-connection state machine and stats
//! - **`parser`**: Incremental request-head parser
//! - **`request`** / **`reply`**: Message types
//! - **`body`**: Deferred access to the unread part of a request body
//! - **`handler`**: Route dispatch and static file serving
//! - **`route`**: Matchers and route actions
//! - **`transport`**: Plain TCP or TLS under a connection
//! - **`writer`**: Reply serialization and gather writes
//! - **`decode`** / **`mime`**: Path decoding and content types
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!   ┌───▶│   Reading   │ ← Parse bytes until a request head is complete
//!   │    └──────┬──────┘
//!   │           │ Head complete          (malformed → 400, then close)
//!   │           ▼
//!   │    ┌──────────────────┐
//!   │    │   Dispatching    │ ← Run route or static handler
//!   │    └──────┬───────────┘
//!   │           │ Unread body left?
//!   │           ├─ yes → Draining → Writing
//!   │           ▼
//!   │    ┌──────────────────┐
//!   │    │    Writing       │ ← Head plus in-memory or mapped body
//!   │    └──────┬───────────┘
//!   │           ├─ sendfile body → Transmitting
//!   │           ▼
//!   └─ Keep-Alive          Close → Closing → Closed
//! ```

pub mod body;
pub mod connection;
pub mod decode;
pub mod handler;
pub mod mime;
pub mod parser;
pub mod reply;
pub mod request;
pub mod route;
pub mod transport;
pub mod writer;
