//! # proxykv Dev Server
//!
//! Purpose: A small in-memory RESP2 server that stands in for a store proxy
//! during tests and local development.
//!
//! ## Design Principles
//! 1. **Async I/O**: One tokio task per connection.
//! 2. **Single Keyspace Lock**: Commands run one at a time under a
//!    `parking_lot` mutex, which keeps every command atomic.
//! 3. **Fault Injection**: `drop_next(n)` makes the server hang up instead of
//!    answering, to exercise client retries.

mod commands;
mod db;
mod protocol;
mod server;

pub use commands::execute;
pub use db::{Db, KeyTtl, Value};
pub use protocol::{ProtocolError, Reply, RespParser};
pub use server::{handle_connection, serve, DevServer, DevServerHandle, ServerState};
