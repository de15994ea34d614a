//! List commands.

use crate::client::CacheClient;
use crate::cmd::{Cmd, ToArg};
use crate::error::CacheResult;

/// Where LINSERT places the new element relative to the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPosition {
    Before,
    After,
}

impl ListPosition {
    pub fn as_str(self) -> &'static str {
        match self {
            ListPosition::Before => "BEFORE",
            ListPosition::After => "AFTER",
        }
    }
}

impl ToArg for ListPosition {
    fn write_arg(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.as_str().as_bytes().to_vec());
    }
}

impl CacheClient {
    /// Element at `index`; negative indexes count from the tail.
    pub fn lindex(&self, key: &str, index: i64) -> CacheResult<Option<String>> {
        self.query(Cmd::new("LINDEX").arg(self.key(key)).arg(index))
    }

    /// Returns the new length, or -1 when `pivot` was not found.
    pub fn linsert(&self, key: &str, position: ListPosition, pivot: &str, value: &str) -> CacheResult<i64> {
        self.query(
            Cmd::new("LINSERT")
                .arg(self.key(key))
                .arg(position)
                .arg(pivot)
                .arg(value),
        )
    }

    pub fn llen(&self, key: &str) -> CacheResult<i64> {
        self.query(Cmd::new("LLEN").arg(self.key(key)))
    }

    pub fn lpop(&self, key: &str) -> CacheResult<Option<String>> {
        self.query(Cmd::new("LPOP").arg(self.key(key)))
    }

    pub fn lpush(&self, key: &str, values: &[&str]) -> CacheResult<i64> {
        self.query(Cmd::new("LPUSH").arg(self.key(key)).args(values))
    }

    /// Pushes only if the list exists; returns the length (0 when missing).
    pub fn lpushx(&self, key: &str, values: &[&str]) -> CacheResult<i64> {
        self.query(Cmd::new("LPUSHX").arg(self.key(key)).args(values))
    }

    /// Inclusive range; negative indexes count from the tail.
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        self.query(Cmd::new("LRANGE").arg(self.key(key)).arg(start).arg(stop))
    }

    /// Removes up to `count` occurrences (all when 0, from the tail when negative).
    pub fn lrem(&self, key: &str, count: i64, value: &str) -> CacheResult<i64> {
        self.query(Cmd::new("LREM").arg(self.key(key)).arg(count).arg(value))
    }

    pub fn ltrim(&self, key: &str, start: i64, stop: i64) -> CacheResult<()> {
        self.query(Cmd::new("LTRIM").arg(self.key(key)).arg(start).arg(stop))
    }

    pub fn lset(&self, key: &str, index: i64, value: &str) -> CacheResult<()> {
        self.query(Cmd::new("LSET").arg(self.key(key)).arg(index).arg(value))
    }

    pub fn rpop(&self, key: &str) -> CacheResult<Option<String>> {
        self.query(Cmd::new("RPOP").arg(self.key(key)))
    }

    pub fn rpush(&self, key: &str, values: &[&str]) -> CacheResult<i64> {
        self.query(Cmd::new("RPUSH").arg(self.key(key)).args(values))
    }

    pub fn rpushx(&self, key: &str, values: &[&str]) -> CacheResult<i64> {
        self.query(Cmd::new("RPUSHX").arg(self.key(key)).args(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_renders_keyword() {
        let cmd = Cmd::new("LINSERT").arg("k").arg(ListPosition::After);
        assert_eq!(cmd.as_args()[2], b"AFTER".to_vec());
        assert_eq!(ListPosition::Before.as_str(), "BEFORE");
    }
}
