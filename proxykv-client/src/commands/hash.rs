//! Hash commands.

use std::collections::{HashMap, HashSet};

use crate::client::CacheClient;
use crate::cmd::Cmd;
use crate::error::CacheResult;

impl CacheClient {
    /// Sets one field; returns 1 when the field is new, 0 when overwritten.
    pub fn hset(&self, key: &str, field: &str, value: &str) -> CacheResult<i64> {
        self.query(Cmd::new("HSET").arg(self.key(key)).arg(field).arg(value))
    }

    pub fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        self.query(Cmd::new("HGET").arg(self.key(key)).arg(field))
    }

    pub fn hdel(&self, key: &str, fields: &[&str]) -> CacheResult<i64> {
        self.query(Cmd::new("HDEL").arg(self.key(key)).args(fields))
    }

    pub fn hexists(&self, key: &str, field: &str) -> CacheResult<bool> {
        self.query(Cmd::new("HEXISTS").arg(self.key(key)).arg(field))
    }

    /// All fields and values; empty for a missing key.
    pub fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.query(Cmd::new("HGETALL").arg(self.key(key)))
    }

    pub fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        self.query(Cmd::new("HINCRBY").arg(self.key(key)).arg(field).arg(delta))
    }

    pub fn hkeys(&self, key: &str) -> CacheResult<HashSet<String>> {
        self.query(Cmd::new("HKEYS").arg(self.key(key)))
    }

    pub fn hlen(&self, key: &str) -> CacheResult<i64> {
        self.query(Cmd::new("HLEN").arg(self.key(key)))
    }

    /// One entry per field, `None` where the field is absent.
    pub fn hmget(&self, key: &str, fields: &[&str]) -> CacheResult<Vec<Option<String>>> {
        self.query(Cmd::new("HMGET").arg(self.key(key)).args(fields))
    }

    pub fn hmset(&self, key: &str, entries: &[(&str, &str)]) -> CacheResult<()> {
        let mut cmd = Cmd::new("HMSET").arg(self.key(key));
        for (field, value) in entries {
            cmd = cmd.arg(*field).arg(*value);
        }
        self.query(cmd)
    }

    /// Sets the field only if it does not exist; true when it was set.
    pub fn hsetnx(&self, key: &str, field: &str, value: &str) -> CacheResult<bool> {
        self.query(Cmd::new("HSETNX").arg(self.key(key)).arg(field).arg(value))
    }

    pub fn hvals(&self, key: &str) -> CacheResult<Vec<String>> {
        self.query(Cmd::new("HVALS").arg(self.key(key)))
    }
}
