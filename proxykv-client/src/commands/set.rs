//! Set commands.

use std::collections::HashSet;

use crate::client::CacheClient;
use crate::cmd::Cmd;
use crate::error::CacheResult;

impl CacheClient {
    /// Adds members; returns how many were not already present.
    pub fn sadd(&self, key: &str, members: &[&str]) -> CacheResult<i64> {
        self.query(Cmd::new("SADD").arg(self.key(key)).args(members))
    }

    pub fn scard(&self, key: &str) -> CacheResult<i64> {
        self.query(Cmd::new("SCARD").arg(self.key(key)))
    }

    pub fn smembers(&self, key: &str) -> CacheResult<HashSet<String>> {
        self.query(Cmd::new("SMEMBERS").arg(self.key(key)))
    }

    /// Removes and returns a random member.
    pub fn spop(&self, key: &str) -> CacheResult<Option<String>> {
        self.query(Cmd::new("SPOP").arg(self.key(key)))
    }

    pub fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.query(Cmd::new("SISMEMBER").arg(self.key(key)).arg(member))
    }

    pub fn srandmember(&self, key: &str) -> CacheResult<Option<String>> {
        self.query(Cmd::new("SRANDMEMBER").arg(self.key(key)))
    }

    /// Distinct random members when `count` is positive; a negative count
    /// allows repeats and returns exactly `|count|` members.
    pub fn srandmember_count(&self, key: &str, count: i64) -> CacheResult<Vec<String>> {
        self.query(Cmd::new("SRANDMEMBER").arg(self.key(key)).arg(count))
    }

    pub fn srem(&self, key: &str, members: &[&str]) -> CacheResult<i64> {
        self.query(Cmd::new("SREM").arg(self.key(key)).args(members))
    }
}
