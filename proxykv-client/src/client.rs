//! # Cache Client Facade
//!
//! Purpose: Expose a blocking, typed command surface over the pooled proxy
//! connections, with optional key namespacing and bounded retry.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides discovery, pooling and protocol
//!    details behind one method per store command.
//! 2. **One Execute Primitive**: Every command goes through `query`, which
//!    borrows a connection, runs the command and maps the reply.
//! 3. **Typed Absence**: Missing values are `None`, never empty strings or
//!    sentinel numbers.
//! 4. **Retry by Template**: The `*_with_retry` operations share one generic
//!    retry wrapper.
//!
//! String and key commands live here; hashes, lists, sets and sorted sets are
//! in `commands/`.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use crate::cmd::Cmd;
use crate::config::CacheConfig;
use crate::connection::Connector;
use crate::directory::{Coordinator, DirectoryWatcher};
use crate::error::CacheResult;
use crate::namespace::KeyNamespace;
use crate::pool::{ConnectionPool, PoolStatus};
use crate::reply::{self, FromReply};
use crate::resp::RespValue;
use crate::retry::{run_with_retry_observed, RetryPolicy};
use crate::shared::SharedPool;

/// TTL state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl FromReply for Ttl {
    fn from_reply(reply: RespValue) -> Option<Self> {
        match reply {
            RespValue::Integer(-2) => Some(Ttl::Missing),
            RespValue::Integer(-1) => Some(Ttl::NoExpiry),
            RespValue::Integer(secs) if secs >= 0 => Some(Ttl::ExpiresIn(Duration::from_secs(secs as u64))),
            _ => None,
        }
    }
}

/// Modifiers of the SORT command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortOptions {
    by: Option<String>,
    limit: Option<(i64, i64)>,
    get: Vec<String>,
    desc: bool,
    alpha: bool,
}

impl SortOptions {
    pub fn new() -> Self {
        SortOptions::default()
    }

    /// Sorts by the values of external keys matching `pattern`.
    pub fn by(mut self, pattern: impl Into<String>) -> Self {
        self.by = Some(pattern.into());
        self
    }

    pub fn limit(mut self, offset: i64, count: i64) -> Self {
        self.limit = Some((offset, count));
        self
    }

    /// Returns values of external keys matching `pattern`; may repeat.
    pub fn get(mut self, pattern: impl Into<String>) -> Self {
        self.get.push(pattern.into());
        self
    }

    pub fn desc(mut self) -> Self {
        self.desc = true;
        self
    }

    /// Sorts lexicographically instead of numerically.
    pub fn alpha(mut self) -> Self {
        self.alpha = true;
        self
    }

    fn append_to(&self, mut cmd: Cmd) -> Cmd {
        if let Some(pattern) = &self.by {
            cmd = cmd.arg("BY").arg(pattern);
        }
        if let Some((offset, count)) = self.limit {
            cmd = cmd.arg("LIMIT").arg(offset).arg(count);
        }
        for pattern in &self.get {
            cmd = cmd.arg("GET").arg(pattern);
        }
        cmd.arg_if(self.desc, "DESC").arg_if(self.alpha, "ALPHA")
    }
}

/// Blocking cache client.
///
/// Cheap to clone; clones share the same `SharedPool`.
#[derive(Clone)]
pub struct CacheClient {
    config: Arc<CacheConfig>,
    namespace: KeyNamespace,
    shared: Arc<SharedPool>,
    coordinator: Arc<dyn Coordinator>,
    connector: Arc<dyn Connector>,
}

impl CacheClient {
    /// Creates a facade that talks RESP over TCP to the discovered proxies.
    ///
    /// The pool behind `shared` is built on the first command.
    pub fn new(
        config: CacheConfig,
        shared: Arc<SharedPool>,
        coordinator: Arc<dyn Coordinator>,
    ) -> CacheResult<Self> {
        let connector = Arc::new(config.tcp_connector());
        Self::with_connector(config, shared, coordinator, connector)
    }

    /// Creates a facade with a custom transport.
    pub fn with_connector(
        config: CacheConfig,
        shared: Arc<SharedPool>,
        coordinator: Arc<dyn Coordinator>,
        connector: Arc<dyn Connector>,
    ) -> CacheResult<Self> {
        config.validate()?;
        Ok(CacheClient {
            namespace: config.key_namespace(),
            config: Arc::new(config),
            shared,
            coordinator,
            connector,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Pool counters, once the pool exists.
    pub fn pool_status(&self) -> Option<PoolStatus> {
        self.shared.get().map(|pool| pool.status())
    }

    fn pool(&self) -> CacheResult<ConnectionPool> {
        self.shared.get_or_init(|| {
            let watcher =
                DirectoryWatcher::start(Arc::clone(&self.coordinator), &self.config.directory_settings())?;
            ConnectionPool::new(self.config.pool_config(), watcher, Arc::clone(&self.connector))
        })
    }

    /// Applies the namespace to one key argument.
    pub(crate) fn key<'a>(&self, key: &'a str) -> Cow<'a, str> {
        self.namespace.apply(key)
    }

    /// Runs one command and maps its reply into `T`.
    pub(crate) fn query<T: FromReply>(&self, cmd: Cmd) -> CacheResult<T> {
        let result = self
            .execute(&cmd)
            .and_then(|reply| reply::convert(cmd.name(), reply));
        if let Err(err) = &result {
            if self.config.debug {
                tracing::warn!(
                    command = %String::from_utf8_lossy(cmd.name()),
                    error = %err,
                    "cache command failed"
                );
            }
        }
        result
    }

    fn execute(&self, cmd: &Cmd) -> CacheResult<RespValue> {
        let pool = self.pool()?;
        let mut conn = pool.get()?;
        conn.exec(cmd.as_args())
    }

    fn retrying<T, F>(
        &self,
        operation: &'static str,
        retry_times: u32,
        sleep_seconds: u64,
        op: F,
    ) -> CacheResult<T>
    where
        F: FnMut() -> CacheResult<T>,
    {
        let policy = RetryPolicy::new(retry_times, sleep_seconds)?;
        run_with_retry_observed(policy, op, |attempt, err| {
            tracing::warn!(
                operation,
                attempt,
                max_attempts = retry_times,
                error = %err,
                "cache operation attempt failed"
            );
        })
    }

    pub fn ping(&self) -> CacheResult<String> {
        self.query(Cmd::new("PING"))
    }

    pub fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        self.query(Cmd::new("SET").arg(self.key(key)).arg(value))
    }

    /// Returns `None` when the key does not exist.
    pub fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.query(Cmd::new("GET").arg(self.key(key)))
    }

    /// Sets the value only if the key does not exist; true when it was set.
    pub fn setnx(&self, key: &str, value: &str) -> CacheResult<bool> {
        self.query(Cmd::new("SETNX").arg(self.key(key)).arg(value))
    }

    pub fn getset(&self, key: &str, value: &str) -> CacheResult<Option<String>> {
        self.query(Cmd::new("GETSET").arg(self.key(key)).arg(value))
    }

    pub fn exists(&self, key: &str) -> CacheResult<bool> {
        self.query(Cmd::new("EXISTS").arg(self.key(key)))
    }

    /// Sets a TTL in seconds; false when the key does not exist.
    pub fn expire(&self, key: &str, seconds: u64) -> CacheResult<bool> {
        self.query(Cmd::new("EXPIRE").arg(self.key(key)).arg(seconds))
    }

    /// Expires the key at a unix timestamp in seconds.
    pub fn expire_at(&self, key: &str, unix_time: i64) -> CacheResult<bool> {
        self.query(Cmd::new("EXPIREAT").arg(self.key(key)).arg(unix_time))
    }

    pub fn ttl(&self, key: &str) -> CacheResult<Ttl> {
        self.query(Cmd::new("TTL").arg(self.key(key)))
    }

    /// Appends to the string value; returns the new length.
    pub fn append(&self, key: &str, value: &str) -> CacheResult<i64> {
        self.query(Cmd::new("APPEND").arg(self.key(key)).arg(value))
    }

    pub fn strlen(&self, key: &str) -> CacheResult<i64> {
        self.query(Cmd::new("STRLEN").arg(self.key(key)))
    }

    pub fn incr(&self, key: &str) -> CacheResult<i64> {
        self.query(Cmd::new("INCR").arg(self.key(key)))
    }

    pub fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.query(Cmd::new("INCRBY").arg(self.key(key)).arg(delta))
    }

    pub fn decr(&self, key: &str) -> CacheResult<i64> {
        self.query(Cmd::new("DECR").arg(self.key(key)))
    }

    pub fn decr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.query(Cmd::new("DECRBY").arg(self.key(key)).arg(delta))
    }

    /// Deletes keys; returns how many existed.
    pub fn del(&self, keys: &[&str]) -> CacheResult<i64> {
        self.query(Cmd::new("DEL").args(keys.iter().map(|key| self.key(key))))
    }

    /// Substring with inclusive offsets; negative offsets count from the end.
    pub fn getrange(&self, key: &str, start: i64, end: i64) -> CacheResult<String> {
        self.query(Cmd::new("GETRANGE").arg(self.key(key)).arg(start).arg(end))
    }

    /// Overwrites part of the string at `offset`; returns the new length.
    pub fn setrange(&self, key: &str, offset: u64, value: &str) -> CacheResult<i64> {
        self.query(Cmd::new("SETRANGE").arg(self.key(key)).arg(offset).arg(value))
    }

    /// Same as [`getrange`](Self::getrange).
    pub fn substr(&self, key: &str, start: i64, end: i64) -> CacheResult<String> {
        self.getrange(key, start, end)
    }

    /// Sets the value with a TTL in seconds.
    pub fn set_expire(&self, key: &str, seconds: u64, value: &str) -> CacheResult<()> {
        self.query(Cmd::new("SETEX").arg(self.key(key)).arg(seconds).arg(value))
    }

    /// One entry per key, `None` where the key is absent.
    pub fn mget(&self, keys: &[&str]) -> CacheResult<Vec<Option<String>>> {
        self.query(Cmd::new("MGET").args(keys.iter().map(|key| self.key(key))))
    }

    pub fn mset(&self, pairs: &[(&str, &str)]) -> CacheResult<()> {
        let mut cmd = Cmd::new("MSET");
        for (key, value) in pairs {
            cmd = cmd.arg(self.key(key)).arg(*value);
        }
        self.query(cmd)
    }

    /// Type name of the stored value (`string`, `hash`, ..., or `none`).
    pub fn type_of(&self, key: &str) -> CacheResult<String> {
        self.query(Cmd::new("TYPE").arg(self.key(key)))
    }

    /// Sorted elements of a list, set or sorted set.
    pub fn sort(&self, key: &str, options: &SortOptions) -> CacheResult<Vec<Option<String>>> {
        self.query(options.append_to(Cmd::new("SORT").arg(self.key(key))))
    }

    /// Sorts into `destination`; returns the number of stored elements.
    pub fn sort_store(&self, key: &str, options: &SortOptions, destination: &str) -> CacheResult<i64> {
        let cmd = options
            .append_to(Cmd::new("SORT").arg(self.key(key)))
            .arg("STORE")
            .arg(self.key(destination));
        self.query(cmd)
    }

    pub fn set_with_retry(
        &self,
        key: &str,
        value: &str,
        retry_times: u32,
        sleep_seconds: u64,
    ) -> CacheResult<()> {
        self.retrying("set", retry_times, sleep_seconds, || self.set(key, value))
    }

    pub fn set_expire_with_retry(
        &self,
        key: &str,
        seconds: u64,
        value: &str,
        retry_times: u32,
        sleep_seconds: u64,
    ) -> CacheResult<()> {
        self.retrying("set_expire", retry_times, sleep_seconds, || {
            self.set_expire(key, seconds, value)
        })
    }

    pub fn del_with_retry(&self, keys: &[&str], retry_times: u32, sleep_seconds: u64) -> CacheResult<i64> {
        self.retrying("del", retry_times, sleep_seconds, || self.del(keys))
    }

    pub fn expire_with_retry(
        &self,
        key: &str,
        seconds: u64,
        retry_times: u32,
        sleep_seconds: u64,
    ) -> CacheResult<bool> {
        self.retrying("expire", retry_times, sleep_seconds, || self.expire(key, seconds))
    }

    pub fn get_with_retry(
        &self,
        key: &str,
        retry_times: u32,
        sleep_seconds: u64,
    ) -> CacheResult<Option<String>> {
        self.retrying("get", retry_times, sleep_seconds, || self.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    fn args(cmd: &Cmd) -> Vec<String> {
        cmd.as_args()
            .iter()
            .map(|arg| String::from_utf8(arg.clone()).unwrap())
            .collect()
    }

    #[test]
    fn ttl_reply_mapping() {
        assert_eq!(Ttl::from_reply(RespValue::Integer(-2)), Some(Ttl::Missing));
        assert_eq!(Ttl::from_reply(RespValue::Integer(-1)), Some(Ttl::NoExpiry));
        assert_eq!(
            Ttl::from_reply(RespValue::Integer(5)),
            Some(Ttl::ExpiresIn(Duration::from_secs(5)))
        );
        assert_eq!(Ttl::from_reply(RespValue::Integer(-3)), None);
    }

    #[test]
    fn sort_options_render_in_order() {
        let options = SortOptions::new().by("w_*").limit(0, 10).get("#").get("o_*").desc().alpha();
        let cmd = options.append_to(Cmd::new("SORT").arg("k"));
        assert_eq!(
            args(&cmd),
            ["SORT", "k", "BY", "w_*", "LIMIT", "0", "10", "GET", "#", "GET", "o_*", "DESC", "ALPHA"]
        );
    }

    #[test]
    fn rejects_invalid_config_up_front() {
        let config = CacheConfig {
            max_total: 1,
            max_idle: 2,
            ..CacheConfig::default()
        };
        let coordinator = Arc::new(crate::directory::MemoryCoordinator::new());
        let err = CacheClient::new(config, Arc::new(SharedPool::new()), coordinator)
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::Configuration(_)));
    }
}
