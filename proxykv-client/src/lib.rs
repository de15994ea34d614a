//! # proxykv Client
//!
//! Purpose: Blocking client for a sharded key-value store fronted by
//! stateless RESP proxies. Proxies are discovered through a coordination
//! service, connections to them are pooled, and commands are exposed through
//! a typed facade with optional retry and per-environment key namespacing.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections across calls and spread
//!    them round-robin over the live proxies.
//! 2. **Live Discovery**: The backend set follows the coordination service and
//!    is swapped atomically on change.
//! 3. **Typed Failures**: Every error carries a kind; only transport failures
//!    are retried.
//! 4. **Explicit Sharing**: One `SharedPool` per configuration, created by the
//!    application and handed to each `CacheClient`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use proxykv_client::{CacheClient, CacheConfig, SharedPool, StaticCoordinator};
//!
//! # fn main() -> Result<(), proxykv_client::CacheError> {
//! let coordinator = Arc::new(StaticCoordinator::from_addrs("127.0.0.1:19000")?);
//! let client = CacheClient::new(CacheConfig::default(), Arc::new(SharedPool::new()), coordinator)?;
//! client.set("greeting", "hello")?;
//! assert_eq!(client.get("greeting")?.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

mod client;
mod cmd;
mod commands;
mod config;
mod connection;
mod directory;
mod error;
mod namespace;
mod pool;
mod reply;
mod resp;
mod retry;
mod shared;

pub use client::{CacheClient, SortOptions, Ttl};
pub use cmd::{Cmd, ToArg};
pub use commands::{ListPosition, ScoreBound, ScoredMember};
pub use config::{CacheConfig, DEFAULT_FILE_PATH, DEFAULT_RELATIVE_PATH};
pub use connection::{Connector, StoreConnection, TcpConnector};
pub use directory::{
    parse_backends, proxy_node, BackendEndpoint, BackendSet, CoordinationError, Coordinator,
    DirectoryEvent, DirectorySettings, DirectoryWatcher, MemoryCoordinator, StaticCoordinator,
    WatchId, WatchListener,
};
pub use error::{CacheError, CacheResult, ErrorKind};
pub use namespace::{decode, Environment, KeyNamespace};
pub use pool::{ConnectionPool, PoolConfig, PoolStatus, PooledConnection};
pub use reply::FromReply;
pub use resp::RespValue;
pub use retry::{run_with_retry, run_with_retry_observed, RetryPolicy};
pub use shared::{PoolLifecycle, SharedPool};
