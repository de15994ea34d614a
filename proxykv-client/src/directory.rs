//! # Backend Directory
//!
//! Purpose: Keep an up-to-date, ordered list of live proxy endpoints by
//! watching a directory path in a coordination service.
//!
//! ## Design Principles
//! 1. **Snapshot Reads**: Readers clone an `Arc` of the current set, so a
//!    replacement is seen either whole or not at all.
//! 2. **Stale but Available**: After startup, coordination failures keep the
//!    last-known set instead of failing callers.
//! 3. **Boundary Trait**: The coordination service is reached only through
//!    `Coordinator`, keeping this module free of any particular client.
//!
//! ## Node Format
//!
//! Every child of the proxy directory carries a JSON document describing one
//! proxy. Only `addr` (alias `proxy_addr`) and `state` are read:
//!
//! ```text
//! {"addr": "10.0.0.7:19000", "state": "online", "id": "proxy_1"}
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use thiserror::Error;

use crate::error::{CacheError, CacheResult};

/// Network address of one proxy in front of the store shards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendEndpoint {
    host: String,
    port: u16,
}

impl BackendEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        BackendEndpoint {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BackendEndpoint {
    type Err = CacheError;

    /// Parses `host:port`; the port is taken after the last `:`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| CacheError::config(format!("endpoint '{raw}' is missing a port")))?;
        if host.is_empty() {
            return Err(CacheError::config(format!("endpoint '{raw}' is missing a host")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| CacheError::config(format!("endpoint '{raw}' has an invalid port")))?;
        Ok(BackendEndpoint::new(host, port))
    }
}

/// Ordered backend list in directory order.
pub type BackendSet = Arc<Vec<BackendEndpoint>>;

/// Failures reported by a coordination-service client.
#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    #[error("coordination service unreachable: {0}")]
    Unreachable(String),
    #[error("no such directory: {0}")]
    NoNode(String),
}

/// Notifications delivered to a directory watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// The children of the watched path changed.
    ChildrenChanged,
    /// The session to the coordination service was lost.
    Disconnected,
    /// The session was re-established; the directory may have changed.
    Reconnected,
}

/// Callback installed by [`Coordinator::watch`].
pub type WatchListener = Box<dyn Fn(DirectoryEvent) + Send + Sync>;

/// Handle of an installed watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Read-only view of a coordination service (list + watch).
pub trait Coordinator: Send + Sync {
    /// Opens the session against the given servers.
    fn connect(&self, servers: &[String], session_timeout: Duration) -> Result<(), CoordinationError>;

    /// Returns the payload of every child of `path`, in directory order.
    fn children(&self, path: &str) -> Result<Vec<Vec<u8>>, CoordinationError>;

    /// Installs a persistent watch on `path`.
    fn watch(&self, path: &str, listener: WatchListener) -> Result<WatchId, CoordinationError>;

    /// Removes a watch. Unknown ids are ignored.
    fn unwatch(&self, _id: WatchId) {}
}

/// Where and how to reach the coordination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySettings {
    /// Comma-separated `host:port` list.
    pub connect_string: String,
    pub session_timeout: Duration,
    /// Directory whose children describe the proxies.
    pub proxy_dir: String,
}

impl DirectorySettings {
    /// Splits the connect string into individual server addresses.
    pub fn servers(&self) -> CacheResult<Vec<String>> {
        let servers: Vec<String> = self
            .connect_string
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if servers.is_empty() {
            return Err(CacheError::config("coordination connect string is empty"));
        }
        Ok(servers)
    }
}

#[derive(Debug, Deserialize)]
struct ProxyInfo {
    #[serde(alias = "proxy_addr")]
    addr: String,
    #[serde(default)]
    state: Option<String>,
}

impl ProxyInfo {
    fn is_online(&self) -> bool {
        self.state
            .as_deref()
            .map_or(true, |state| state.eq_ignore_ascii_case("online"))
    }
}

/// Decodes directory children into the online endpoints they describe.
///
/// Malformed nodes are skipped with a warning.
pub fn parse_backends(children: &[Vec<u8>]) -> Vec<BackendEndpoint> {
    let mut endpoints = Vec::with_capacity(children.len());
    for raw in children {
        let info: ProxyInfo = match serde_json::from_slice(raw) {
            Ok(info) => info,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable proxy node");
                continue;
            }
        };
        if !info.is_online() {
            continue;
        }
        match info.addr.parse::<BackendEndpoint>() {
            Ok(endpoint) if !endpoints.contains(&endpoint) => endpoints.push(endpoint),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "skipping proxy node with bad address"),
        }
    }
    endpoints
}

type Subscriber = Box<dyn Fn(&BackendSet) + Send + Sync>;

/// Live view of the proxy directory.
pub struct DirectoryWatcher {
    coordinator: Arc<dyn Coordinator>,
    proxy_dir: String,
    backends: RwLock<BackendSet>,
    cursor: AtomicUsize,
    subscribers: Mutex<Vec<Subscriber>>,
    // Serializes fetch, swap and notification across refreshes.
    refresh_lock: Mutex<()>,
    watch: Mutex<Option<WatchId>>,
}

impl DirectoryWatcher {
    /// Connects, loads the initial backend list and installs the watch.
    ///
    /// Fails with `DiscoveryUnavailable` if the service cannot be reached or
    /// lists no online proxy.
    pub fn start(
        coordinator: Arc<dyn Coordinator>,
        settings: &DirectorySettings,
    ) -> CacheResult<Arc<Self>> {
        let servers = settings.servers()?;
        coordinator
            .connect(&servers, settings.session_timeout)
            .map_err(|err| CacheError::discovery(err.to_string()))?;

        let initial = fetch(coordinator.as_ref(), &settings.proxy_dir)
            .map_err(|err| CacheError::discovery(err.to_string()))?;
        if initial.is_empty() {
            return Err(CacheError::discovery(format!(
                "no online proxy under {}",
                settings.proxy_dir
            )));
        }

        let watcher = Arc::new(DirectoryWatcher {
            coordinator: Arc::clone(&coordinator),
            proxy_dir: settings.proxy_dir.clone(),
            backends: RwLock::new(Arc::new(initial)),
            cursor: AtomicUsize::new(0),
            subscribers: Mutex::new(Vec::new()),
            refresh_lock: Mutex::new(()),
            watch: Mutex::new(None),
        });

        let weak: Weak<DirectoryWatcher> = Arc::downgrade(&watcher);
        let id = coordinator
            .watch(
                &settings.proxy_dir,
                Box::new(move |event| {
                    if let Some(watcher) = weak.upgrade() {
                        watcher.handle_event(event);
                    }
                }),
            )
            .map_err(|err| CacheError::discovery(err.to_string()))?;
        *watcher.watch.lock() = Some(id);

        tracing::info!(
            proxy_dir = %settings.proxy_dir,
            backends = watcher.backends().len(),
            "backend directory watch established"
        );
        Ok(watcher)
    }

    /// Current backend set.
    pub fn backends(&self) -> BackendSet {
        Arc::clone(&self.backends.read())
    }

    /// Next endpoint in round-robin order over the current set.
    pub fn next_endpoint(&self) -> CacheResult<BackendEndpoint> {
        let snapshot = self.backends();
        if snapshot.is_empty() {
            return Err(CacheError::discovery("backend set is empty"));
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % snapshot.len();
        Ok(snapshot[idx].clone())
    }

    /// Registers a callback run after every backend set replacement.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&BackendSet) + Send + Sync + 'static,
    {
        self.subscribers.lock().push(Box::new(subscriber));
    }

    /// Re-reads the directory and publishes the result if it changed.
    ///
    /// Failures and empty listings keep the previous set. Concurrent
    /// refreshes run one at a time, so subscribers see sets in the order they
    /// were published.
    pub fn refresh(&self) {
        let _serial = self.refresh_lock.lock();
        let fresh = match fetch(self.coordinator.as_ref(), &self.proxy_dir) {
            Ok(list) => list,
            Err(err) => {
                tracing::warn!(
                    proxy_dir = %self.proxy_dir,
                    error = %err,
                    "directory refresh failed, keeping last known backends"
                );
                return;
            }
        };
        if fresh.is_empty() {
            tracing::warn!(
                proxy_dir = %self.proxy_dir,
                "directory lists no online proxy, keeping last known backends"
            );
            return;
        }

        let next = Arc::new(fresh);
        {
            let mut current = self.backends.write();
            if **current == *next {
                return;
            }
            *current = Arc::clone(&next);
        }

        tracing::info!(
            proxy_dir = %self.proxy_dir,
            backends = ?next.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "backend set replaced"
        );
        for subscriber in self.subscribers.lock().iter() {
            subscriber(&next);
        }
    }

    fn handle_event(&self, event: DirectoryEvent) {
        match event {
            DirectoryEvent::ChildrenChanged | DirectoryEvent::Reconnected => self.refresh(),
            DirectoryEvent::Disconnected => tracing::warn!(
                proxy_dir = %self.proxy_dir,
                "coordination session lost, serving last known backends"
            ),
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        if let Some(id) = self.watch.get_mut().take() {
            self.coordinator.unwatch(id);
        }
    }
}

fn fetch(coordinator: &dyn Coordinator, path: &str) -> Result<Vec<BackendEndpoint>, CoordinationError> {
    let children = coordinator.children(path)?;
    Ok(parse_backends(&children))
}

/// Builds the JSON node payload describing one proxy.
pub fn proxy_node(addr: &str, state: &str) -> Vec<u8> {
    serde_json::json!({ "addr": addr, "state": state })
        .to_string()
        .into_bytes()
}

/// Coordinator over a fixed endpoint list, for direct connections.
#[derive(Debug, Clone)]
pub struct StaticCoordinator {
    nodes: Vec<Vec<u8>>,
}

impl StaticCoordinator {
    pub fn new(endpoints: &[BackendEndpoint]) -> Self {
        StaticCoordinator {
            nodes: endpoints
                .iter()
                .map(|endpoint| proxy_node(&endpoint.to_string(), "online"))
                .collect(),
        }
    }

    /// Parses a comma-separated `host:port` list.
    pub fn from_addrs(addrs: &str) -> CacheResult<Self> {
        let endpoints = addrs
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<CacheResult<Vec<BackendEndpoint>>>()?;
        Ok(StaticCoordinator::new(&endpoints))
    }
}

impl Coordinator for StaticCoordinator {
    fn connect(&self, _servers: &[String], _session_timeout: Duration) -> Result<(), CoordinationError> {
        Ok(())
    }

    fn children(&self, _path: &str) -> Result<Vec<Vec<u8>>, CoordinationError> {
        Ok(self.nodes.clone())
    }

    fn watch(&self, _path: &str, _listener: WatchListener) -> Result<WatchId, CoordinationError> {
        Ok(WatchId(0))
    }
}

#[derive(Default)]
struct MemoryState {
    reachable: bool,
    directories: HashMap<String, Vec<Vec<u8>>>,
    listeners: Vec<(WatchId, String, Arc<dyn Fn(DirectoryEvent) + Send + Sync>)>,
    next_watch: u64,
    connects: usize,
}

/// In-process coordinator with a mutable directory.
///
/// Used for embedding and tests: changes made through it are delivered to
/// watchers synchronously on the calling thread.
pub struct MemoryCoordinator {
    state: Mutex<MemoryState>,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        MemoryCoordinator {
            state: Mutex::new(MemoryState {
                reachable: true,
                ..MemoryState::default()
            }),
        }
    }

    /// Replaces every child of `path` and notifies its watchers.
    pub fn set_children(&self, path: &str, children: Vec<Vec<u8>>) {
        let listeners = {
            let mut state = self.state.lock();
            state.directories.insert(path.to_string(), children);
            listeners_for(&state, path)
        };
        for listener in listeners {
            listener(DirectoryEvent::ChildrenChanged);
        }
    }

    /// Replaces the directory with online proxies at the given addresses.
    pub fn set_proxies(&self, path: &str, addrs: &[String]) {
        let children = addrs.iter().map(|addr| proxy_node(addr, "online")).collect();
        self.set_children(path, children);
    }

    /// Makes the service (un)reachable and notifies every watcher.
    pub fn set_reachable(&self, reachable: bool) {
        let listeners: Vec<_> = {
            let mut state = self.state.lock();
            state.reachable = reachable;
            state.listeners.iter().map(|(_, _, l)| Arc::clone(l)).collect()
        };
        let event = if reachable {
            DirectoryEvent::Reconnected
        } else {
            DirectoryEvent::Disconnected
        };
        for listener in listeners {
            listener(event);
        }
    }

    /// Number of `connect` calls seen.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of watches currently installed.
    pub fn watch_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

fn listeners_for(
    state: &MemoryState,
    path: &str,
) -> Vec<Arc<dyn Fn(DirectoryEvent) + Send + Sync>> {
    state
        .listeners
        .iter()
        .filter(|(_, watched, _)| watched == path)
        .map(|(_, _, listener)| Arc::clone(listener))
        .collect()
}

impl Coordinator for MemoryCoordinator {
    fn connect(&self, servers: &[String], _session_timeout: Duration) -> Result<(), CoordinationError> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(CoordinationError::Unreachable(servers.join(",")));
        }
        state.connects += 1;
        Ok(())
    }

    fn children(&self, path: &str) -> Result<Vec<Vec<u8>>, CoordinationError> {
        let state = self.state.lock();
        if !state.reachable {
            return Err(CoordinationError::Unreachable(path.to_string()));
        }
        state
            .directories
            .get(path)
            .cloned()
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    fn watch(&self, path: &str, listener: WatchListener) -> Result<WatchId, CoordinationError> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(CoordinationError::Unreachable(path.to_string()));
        }
        state.next_watch += 1;
        let id = WatchId(state.next_watch);
        state.listeners.push((id, path.to_string(), Arc::from(listener)));
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) {
        self.state.lock().listeners.retain(|(watched, _, _)| *watched != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIR: &str = "/zk/codis/db_test/proxy";

    fn settings() -> DirectorySettings {
        DirectorySettings {
            connect_string: "zk1:2181, zk2:2181".to_string(),
            session_timeout: Duration::from_secs(30),
            proxy_dir: DIR.to_string(),
        }
    }

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_endpoints() {
        let endpoint: BackendEndpoint = "10.0.0.1:19000".parse().unwrap();
        assert_eq!(endpoint.host(), "10.0.0.1");
        assert_eq!(endpoint.port(), 19000);
        assert_eq!(endpoint.to_string(), "10.0.0.1:19000");
        assert!("nohost".parse::<BackendEndpoint>().is_err());
        assert!(":1".parse::<BackendEndpoint>().is_err());
        assert!("h:99999".parse::<BackendEndpoint>().is_err());
    }

    #[test]
    fn parse_backends_keeps_online_in_order() {
        let children = vec![
            proxy_node("b:2", "online"),
            proxy_node("a:1", "offline"),
            br#"{"proxy_addr":"c:3"}"#.to_vec(),
            b"not json".to_vec(),
            proxy_node("b:2", "online"),
        ];
        let endpoints = parse_backends(&children);
        assert_eq!(
            endpoints,
            vec![BackendEndpoint::new("b", 2), BackendEndpoint::new("c", 3)]
        );
    }

    #[test]
    fn splits_connect_string() {
        assert_eq!(settings().servers().unwrap(), addrs(&["zk1:2181", "zk2:2181"]));
        let empty = DirectorySettings {
            connect_string: " , ".into(),
            ..settings()
        };
        assert!(matches!(empty.servers(), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn start_fails_when_unreachable_or_empty() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        coordinator.set_reachable(false);
        let err = DirectoryWatcher::start(coordinator.clone(), &settings()).err().unwrap();
        assert!(matches!(err, CacheError::DiscoveryUnavailable(_)));

        coordinator.set_reachable(true);
        coordinator.set_children(DIR, vec![proxy_node("a:1", "offline")]);
        let err = DirectoryWatcher::start(coordinator, &settings()).err().unwrap();
        assert!(matches!(err, CacheError::DiscoveryUnavailable(_)));
    }

    #[test]
    fn round_robin_over_current_set() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        coordinator.set_proxies(DIR, &addrs(&["a:1", "b:2"]));
        let watcher = DirectoryWatcher::start(coordinator, &settings()).unwrap();

        let picked: Vec<String> = (0..4)
            .map(|_| watcher.next_endpoint().unwrap().to_string())
            .collect();
        assert_eq!(picked, addrs(&["a:1", "b:2", "a:1", "b:2"]));
    }

    #[test]
    fn change_notification_replaces_set_and_notifies() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        coordinator.set_proxies(DIR, &addrs(&["a:1"]));
        let watcher = DirectoryWatcher::start(coordinator.clone(), &settings()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        watcher.subscribe(move |set| sink.lock().push(set.len()));

        coordinator.set_proxies(DIR, &addrs(&["b:2", "c:3"]));
        assert_eq!(
            *watcher.backends(),
            vec![BackendEndpoint::new("b", 2), BackendEndpoint::new("c", 3)]
        );
        assert_eq!(*seen.lock(), vec![2]);

        // Same listing again is not a change.
        coordinator.set_proxies(DIR, &addrs(&["b:2", "c:3"]));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn disconnect_and_empty_listing_keep_stale_set() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        coordinator.set_proxies(DIR, &addrs(&["a:1"]));
        let watcher = DirectoryWatcher::start(coordinator.clone(), &settings()).unwrap();

        coordinator.set_reachable(false);
        assert_eq!(watcher.next_endpoint().unwrap(), BackendEndpoint::new("a", 1));

        coordinator.set_reachable(true);
        coordinator.set_children(DIR, Vec::new());
        assert_eq!(watcher.backends().len(), 1);
    }

    #[test]
    fn static_coordinator_lists_fixed_endpoints() {
        let coordinator = Arc::new(StaticCoordinator::from_addrs("a:1,b:2").unwrap());
        let watcher = DirectoryWatcher::start(coordinator, &settings()).unwrap();
        assert_eq!(watcher.backends().len(), 2);
        assert!(StaticCoordinator::from_addrs("a").is_err());
    }

    #[test]
    fn dropping_watcher_removes_its_watch() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        coordinator.set_proxies(DIR, &addrs(&["a:1"]));
        let watcher = DirectoryWatcher::start(coordinator.clone(), &settings()).unwrap();
        let other = DirectoryWatcher::start(coordinator.clone(), &settings()).unwrap();
        assert_eq!(coordinator.watch_count(), 2);

        drop(watcher);
        assert_eq!(coordinator.watch_count(), 1);
        coordinator.set_proxies(DIR, &addrs(&["b:2"]));
        assert_eq!(other.backends().len(), 1);
        assert_eq!(other.next_endpoint().unwrap(), BackendEndpoint::new("b", 2));
    }

    #[test]
    fn concurrent_refreshes_notify_in_publish_order() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        coordinator.set_proxies(DIR, &addrs(&["a:1"]));
        let watcher = DirectoryWatcher::start(coordinator.clone(), &settings()).unwrap();

        let last = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&last);
        watcher.subscribe(move |set| {
            std::thread::sleep(Duration::from_millis(5));
            *sink.lock() = Some(Arc::clone(set));
        });

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                std::thread::spawn(move || {
                    coordinator.set_proxies(DIR, &[format!("h{i}:1")]);
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let notified = last.lock().clone().unwrap();
        assert_eq!(*notified, *watcher.backends());
    }
}
