//! # Typed Keyspace
//!
//! Purpose: Hold the dev server's data: one map from key to a typed value
//! with an optional expiration instant.
//!
//! ## Design Principles
//! 1. **TTL on Access**: Expired entries are removed lazily whenever they are
//!    looked up, so reads never observe them.
//! 2. **Fast Hashing**: The top-level map uses `ahash` through `hashbrown`.
//! 3. **Store Semantics**: Empty collections are removed, as the real store
//!    does, so `EXISTS`/`TYPE` agree with it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::{HashMap, HashSet};

/// A stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Vec<u8>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
    Set(HashSet<Vec<u8>>),
    ZSet(HashMap<Vec<u8>, f64>),
}

impl Value {
    /// Name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Hash(_) => "hash",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::ZSet(_) => "zset",
        }
    }

    fn is_empty_collection(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(map) => map.is_empty(),
            Value::List(list) => list.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::ZSet(zset) => zset.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    NoExpiry,
    ExpiresIn(Duration),
}

/// The keyspace.
#[derive(Debug)]
pub struct Db {
    entries: HashMap<Vec<u8>, Entry, RandomState>,
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

impl Db {
    pub fn new() -> Self {
        Db {
            entries: HashMap::with_hasher(RandomState::new()),
        }
    }

    fn purge_expired(&mut self, key: &[u8]) {
        let now = Instant::now();
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map_or(false, |at| at <= now);
        if expired {
            self.entries.remove(key);
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&Value> {
        self.purge_expired(key);
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.purge_expired(key);
        self.entries.get_mut(key).map(|entry| &mut entry.value)
    }

    /// Returns the value, inserting `init()` if the key is absent.
    pub fn get_or_insert_with<F>(&mut self, key: &[u8], init: F) -> &mut Value
    where
        F: FnOnce() -> Value,
    {
        self.purge_expired(key);
        &mut self
            .entries
            .entry(key.to_vec())
            .or_insert_with(|| Entry {
                value: init(),
                expires_at: None,
            })
            .value
    }

    /// Stores `value`, clearing any expiration.
    pub fn insert(&mut self, key: Vec<u8>, value: Value) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: None,
            },
        );
    }

    /// Replaces the value while keeping the key's expiration.
    pub fn replace(&mut self, key: &[u8], value: Value) {
        self.purge_expired(key);
        match self.entries.get_mut(key) {
            Some(entry) => entry.value = value,
            None => self.insert(key.to_vec(), value),
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.purge_expired(key);
        self.entries.remove(key).is_some()
    }

    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Drops the key if it holds an empty collection.
    pub fn remove_if_empty(&mut self, key: &[u8]) {
        if self
            .entries
            .get(key)
            .map_or(false, |entry| entry.value.is_empty_collection())
        {
            self.entries.remove(key);
        }
    }

    /// Sets the expiration instant; false when the key does not exist.
    pub fn expire_at(&mut self, key: &[u8], at: Instant) -> bool {
        self.purge_expired(key);
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn ttl(&mut self, key: &[u8]) -> KeyTtl {
        self.purge_expired(key);
        match self.entries.get(key) {
            None => KeyTtl::Missing,
            Some(Entry { expires_at: None, .. }) => KeyTtl::NoExpiry,
            Some(Entry {
                expires_at: Some(at), ..
            }) => KeyTtl::ExpiresIn(at.saturating_duration_since(Instant::now())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn expired_entries_disappear_on_access() {
        let mut db = Db::new();
        db.insert(b"k".to_vec(), Value::Str(b"v".to_vec()));
        assert!(db.expire_at(b"k", Instant::now() + Duration::from_millis(20)));
        assert!(matches!(db.ttl(b"k"), KeyTtl::ExpiresIn(_)));

        thread::sleep(Duration::from_millis(40));
        assert_eq!(db.get(b"k"), None);
        assert_eq!(db.ttl(b"k"), KeyTtl::Missing);
        assert!(db.is_empty());
    }

    #[test]
    fn replace_keeps_expiration() {
        let mut db = Db::new();
        db.insert(b"k".to_vec(), Value::Str(b"1".to_vec()));
        db.expire_at(b"k", Instant::now() + Duration::from_secs(60));
        db.replace(b"k", Value::Str(b"2".to_vec()));
        assert!(matches!(db.ttl(b"k"), KeyTtl::ExpiresIn(_)));

        db.insert(b"k".to_vec(), Value::Str(b"3".to_vec()));
        assert_eq!(db.ttl(b"k"), KeyTtl::NoExpiry);
    }

    #[test]
    fn empty_collections_are_removed() {
        let mut db = Db::new();
        db.insert(b"l".to_vec(), Value::List(VecDeque::new()));
        db.remove_if_empty(b"l");
        assert!(!db.contains(b"l"));
    }
}
