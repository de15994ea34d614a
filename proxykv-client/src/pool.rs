//! # Connection Pool
//!
//! Purpose: Reuse proxy connections across calls, spread them round-robin
//! over the live backend set, and bound their number.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving connections in and
//!    out of the idle sets; connect, probe and close happen outside it.
//! 3. **Bounded Waiting**: At capacity, callers wait on a condition variable
//!    until a release or their deadline, never longer.
//! 4. **RAII Release**: `PooledConnection` returns its connection on drop, on
//!    every exit path.
//!
//! ## Structure Overview
//!
//! ```text
//! ConnectionPool
//!   └── inner: Arc<PoolInner>
//!         ├── watcher: Arc<DirectoryWatcher>   (round-robin endpoint source)
//!         ├── connector: Arc<dyn Connector>
//!         ├── state: Mutex<PoolState>
//!         │     ├── idle: endpoint -> stack of IdleConnection (LIFO)
//!         │     └── total / idle_count / waiters
//!         └── available: Condvar
//! ```

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::connection::{Connector, StoreConnection};
use crate::directory::{BackendEndpoint, BackendSet, DirectoryWatcher};
use crate::error::{CacheError, CacheResult};
use crate::resp::RespValue;

/// Pool bounds and maintenance settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Idle floor the evictor never goes below.
    pub min_idle: usize,
    /// Default acquire timeout.
    pub max_wait: Duration,
    /// Period of the background evictor; zero disables it.
    pub idle_eviction_interval: Duration,
    /// Idle time after which a connection may be evicted.
    pub min_evictable_idle: Duration,
    /// Probe idle connections before reuse and during eviction passes.
    pub test_while_idle: bool,
    /// Idle time after which a connection is probed before being handed out.
    pub idle_probe_threshold: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_total: 1000,
            max_idle: 1000,
            min_idle: 0,
            max_wait: Duration::from_millis(20_000),
            idle_eviction_interval: Duration::from_millis(30_000),
            min_evictable_idle: Duration::from_millis(60_000),
            test_while_idle: true,
            idle_probe_threshold: Duration::from_millis(30_000),
        }
    }
}

impl PoolConfig {
    /// Checks `1 <= max_total`, `max_idle <= max_total`, `min_idle <= max_idle`.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_total == 0 {
            return Err(CacheError::config("max_total must be at least 1"));
        }
        if self.max_idle > self.max_total {
            return Err(CacheError::config(format!(
                "max_idle ({}) exceeds max_total ({})",
                self.max_idle, self.max_total
            )));
        }
        if self.min_idle > self.max_idle {
            return Err(CacheError::config(format!(
                "min_idle ({}) exceeds max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }
        Ok(())
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections in existence (idle + borrowed + being opened or probed).
    pub total: usize,
    pub idle: usize,
    /// Callers blocked in `acquire`.
    pub waiters: usize,
    /// Endpoints in the current backend set.
    pub backends: usize,
}

struct IdleConnection {
    conn: Box<dyn StoreConnection>,
    idle_since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<BackendEndpoint, Vec<IdleConnection>>,
    idle_count: usize,
    total: usize,
    waiters: usize,
}

impl PoolState {
    fn pop_idle(&mut self, endpoint: &BackendEndpoint) -> Option<IdleConnection> {
        let conn = self.idle.get_mut(endpoint)?.pop()?;
        self.idle_count -= 1;
        Some(conn)
    }

    // Most recently used idle connection of any endpoint still in `live`.
    fn pop_any_idle(&mut self, live: &BackendSet) -> Option<(BackendEndpoint, IdleConnection)> {
        let endpoint = self
            .idle
            .iter()
            .filter(|(endpoint, _)| live.contains(endpoint))
            .filter_map(|(endpoint, stack)| stack.last().map(|idle| (endpoint, idle.idle_since)))
            .max_by_key(|(_, since)| *since)
            .map(|(endpoint, _)| endpoint.clone())?;
        let conn = self.pop_idle(&endpoint)?;
        Some((endpoint, conn))
    }

    fn push_idle(&mut self, endpoint: BackendEndpoint, idle: IdleConnection) {
        self.idle.entry(endpoint).or_default().push(idle);
        self.idle_count += 1;
    }

    /// Parks `idle` unless its endpoint left `live`; a rejected connection
    /// gives up its slot and is handed back for closing outside the lock.
    fn restore(
        &mut self,
        live: &BackendSet,
        endpoint: BackendEndpoint,
        idle: IdleConnection,
    ) -> Option<IdleConnection> {
        if live.contains(&endpoint) {
            self.push_idle(endpoint, idle);
            None
        } else {
            self.total = self.total.saturating_sub(1);
            Some(idle)
        }
    }
}

/// Wakes the evictor thread early when the pool goes away.
#[derive(Default)]
struct EvictorSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

enum Checkout {
    Idle(BackendEndpoint, IdleConnection),
    Reserved(BackendEndpoint),
}

struct PoolInner {
    config: PoolConfig,
    watcher: Arc<DirectoryWatcher>,
    connector: Arc<dyn Connector>,
    state: Mutex<PoolState>,
    available: Condvar,
    evictor_signal: Arc<EvictorSignal>,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        *self.evictor_signal.stopped.lock() = true;
        self.evictor_signal.wake.notify_all();
    }
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool over the watcher's backend set.
    ///
    /// Requires a valid configuration and at least one known endpoint. Starts
    /// the background evictor when `idle_eviction_interval` is non-zero.
    pub fn new(
        config: PoolConfig,
        watcher: Arc<DirectoryWatcher>,
        connector: Arc<dyn Connector>,
    ) -> CacheResult<Self> {
        config.validate()?;
        if watcher.backends().is_empty() {
            return Err(CacheError::discovery("pool needs at least one backend"));
        }

        let inner = Arc::new(PoolInner {
            config,
            watcher,
            connector,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            evictor_signal: Arc::new(EvictorSignal::default()),
            evictor: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        inner.watcher.subscribe(move |set| {
            if let Some(inner) = weak.upgrade() {
                inner.on_backends_changed(set);
            }
        });
        start_evictor(&inner)?;

        tracing::info!(
            max_total = inner.config.max_total,
            max_idle = inner.config.max_idle,
            min_idle = inner.config.min_idle,
            backends = inner.watcher.backends().len(),
            "connection pool ready"
        );
        Ok(ConnectionPool { inner })
    }

    /// Acquires a connection using the configured `max_wait`.
    pub fn get(&self) -> CacheResult<PooledConnection> {
        self.acquire(self.inner.config.max_wait)
    }

    /// Acquires a connection to the next backend, waiting up to `timeout`.
    ///
    /// The endpoint is picked round-robin over the current backend set. At
    /// `max_total`, when the picked endpoint has nothing idle, the most
    /// recently used idle connection of another current endpoint is handed
    /// out instead, so the round-robin order is not strict under saturation.
    ///
    /// Fails with `PoolExhausted` when the deadline passes; in that case no
    /// slot is held.
    pub fn acquire(&self, timeout: Duration) -> CacheResult<PooledConnection> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            match self.inner.checkout(started, deadline)? {
                Checkout::Idle(endpoint, idle) => {
                    let mut conn = idle.conn;
                    if self.inner.needs_health_check(idle.idle_since) && !conn.ping() {
                        tracing::warn!(endpoint = %endpoint, "idle connection failed liveness probe");
                        drop(conn);
                        self.inner.release_slot();
                        continue;
                    }
                    return Ok(PooledConnection::new(Arc::clone(&self.inner), endpoint, conn));
                }
                Checkout::Reserved(endpoint) => match self.inner.connector.connect(&endpoint) {
                    Ok(conn) => {
                        return Ok(PooledConnection::new(Arc::clone(&self.inner), endpoint, conn))
                    }
                    Err(err) => {
                        self.inner.release_slot();
                        return Err(err);
                    }
                },
            }
        }
    }

    /// Runs one eviction pass immediately.
    pub fn evict_idle(&self) {
        self.inner.evict();
    }

    /// Returns the pool counters.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            total: state.total,
            idle: state.idle_count,
            waiters: state.waiters,
            backends: self.inner.watcher.backends().len(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The directory watcher feeding this pool.
    pub fn watcher(&self) -> &Arc<DirectoryWatcher> {
        &self.inner.watcher
    }
}

impl PoolInner {
    // The endpoint is chosen under the state lock so a backend change
    // published before this point is always observed.
    fn checkout(&self, started: Instant, deadline: Instant) -> CacheResult<Checkout> {
        let mut state = self.state.lock();
        loop {
            let live = self.watcher.backends();
            let endpoint = self.watcher.next_endpoint()?;
            if let Some(idle) = state.pop_idle(&endpoint) {
                return Ok(Checkout::Idle(endpoint, idle));
            }
            if state.total < self.config.max_total {
                state.total += 1;
                return Ok(Checkout::Reserved(endpoint));
            }
            // At capacity: reuse whatever is idle rather than churn sockets.
            if let Some((other, idle)) = state.pop_any_idle(&live) {
                return Ok(Checkout::Idle(other, idle));
            }

            if Instant::now() >= deadline {
                return Err(CacheError::PoolExhausted {
                    waited: started.elapsed(),
                });
            }
            state.waiters += 1;
            self.available.wait_until(&mut state, deadline);
            state.waiters -= 1;
        }
    }

    fn needs_health_check(&self, idle_since: Instant) -> bool {
        self.config.test_while_idle && idle_since.elapsed() >= self.config.idle_probe_threshold
    }

    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    fn return_connection(&self, endpoint: BackendEndpoint, conn: Box<dyn StoreConnection>, valid: bool) {
        let idle = IdleConnection {
            conn,
            idle_since: Instant::now(),
        };
        let mut state = self.state.lock();
        // Checked under the lock: a backend change either happened before
        // (and is seen here) or its cleanup runs after this push.
        let discarded = if valid && state.idle_count < self.config.max_idle {
            state.restore(&self.watcher.backends(), endpoint, idle)
        } else {
            state.total = state.total.saturating_sub(1);
            Some(idle)
        };
        drop(state);
        self.available.notify_one();
        drop(discarded);
    }

    fn on_backends_changed(&self, set: &BackendSet) {
        let mut removed = Vec::new();
        {
            let mut state = self.state.lock();
            state.idle.retain(|endpoint, stack| {
                if set.contains(endpoint) {
                    return true;
                }
                removed.extend(stack.drain(..));
                false
            });
            state.idle_count -= removed.len();
            state.total = state.total.saturating_sub(removed.len());
        }
        if !removed.is_empty() {
            tracing::info!(
                closed = removed.len(),
                "closed idle connections to removed backends"
            );
            self.available.notify_all();
        }
    }

    /// One maintenance pass: evict, probe, top up to `min_idle`.
    fn evict(&self) {
        let now = Instant::now();
        let mut evicted = Vec::new();
        let mut probing = Vec::new();
        {
            let mut state = self.state.lock();
            let mut removable = state.idle_count.saturating_sub(self.config.min_idle);
            for stack in state.idle.values_mut() {
                // Stacks are LIFO, so the oldest entries sit at the front.
                while removable > 0
                    && stack.first().map_or(false, |idle| {
                        now.duration_since(idle.idle_since) > self.config.min_evictable_idle
                    })
                {
                    evicted.push(stack.remove(0));
                    removable -= 1;
                }
            }
            state.idle_count -= evicted.len();
            state.total = state.total.saturating_sub(evicted.len());

            if self.config.test_while_idle {
                for (endpoint, stack) in state.idle.iter_mut() {
                    probing.extend(stack.drain(..).map(|idle| (endpoint.clone(), idle)));
                }
                state.idle_count -= probing.len();
            }
        }

        let evicted_count = evicted.len();
        drop(evicted);

        let mut failed = 0;
        let mut healthy = Vec::with_capacity(probing.len());
        for (endpoint, mut idle) in probing {
            if idle.conn.ping() {
                healthy.push((endpoint, idle));
            } else {
                failed += 1;
            }
        }
        let restored = healthy.len();
        let mut stale = Vec::new();
        {
            let mut state = self.state.lock();
            let live = self.watcher.backends();
            for (endpoint, idle) in healthy {
                stale.extend(state.restore(&live, endpoint, idle));
            }
            state.total = state.total.saturating_sub(failed);
        }
        if evicted_count + failed + restored > 0 {
            self.available.notify_all();
        }
        let stale_count = stale.len();
        drop(stale);

        self.ensure_min_idle();
        tracing::debug!(
            evicted = evicted_count,
            failed_probes = failed,
            removed_backends = stale_count,
            "idle eviction pass"
        );
    }

    fn ensure_min_idle(&self) {
        loop {
            {
                let mut state = self.state.lock();
                if state.idle_count >= self.config.min_idle || state.total >= self.config.max_total {
                    return;
                }
                state.total += 1;
            }

            let opened = self
                .watcher
                .next_endpoint()
                .and_then(|endpoint| Ok((self.connector.connect(&endpoint)?, endpoint)));
            match opened {
                Ok((conn, endpoint)) => {
                    let idle = IdleConnection {
                        conn,
                        idle_since: Instant::now(),
                    };
                    let mut state = self.state.lock();
                    let stale = state.restore(&self.watcher.backends(), endpoint, idle);
                    drop(state);
                    self.available.notify_one();
                    if stale.is_some() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not top up idle connections");
                    self.release_slot();
                    return;
                }
            }
        }
    }
}

fn start_evictor(inner: &Arc<PoolInner>) -> CacheResult<()> {
    let interval = inner.config.idle_eviction_interval;
    if interval.is_zero() {
        return Ok(());
    }

    let weak: Weak<PoolInner> = Arc::downgrade(inner);
    let signal = Arc::clone(&inner.evictor_signal);
    let handle = thread::Builder::new()
        .name("proxykv-evictor".to_string())
        .spawn(move || loop {
            {
                let mut stopped = signal.stopped.lock();
                if !*stopped {
                    signal.wake.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    break;
                }
            }
            match weak.upgrade() {
                Some(inner) => inner.evict(),
                None => break,
            }
        })
        .map_err(|err| CacheError::config(format!("cannot start evictor thread: {err}")))?;
    *inner.evictor.lock() = Some(handle);
    Ok(())
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    endpoint: BackendEndpoint,
    // Taken exactly once, in `drop`.
    conn: ManuallyDrop<Box<dyn StoreConnection>>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, endpoint: BackendEndpoint, conn: Box<dyn StoreConnection>) -> Self {
        PooledConnection {
            pool,
            endpoint,
            conn: ManuallyDrop::new(conn),
            valid: true,
        }
    }

    /// Endpoint this connection talks to.
    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    /// Executes a RESP command and returns the parsed reply.
    pub fn exec(&mut self, args: &[Vec<u8>]) -> CacheResult<RespValue> {
        let response = self.conn.exec(args);
        if let Err(err) = &response {
            if err.poisons_connection() {
                // If IO/protocol fails, do not return this connection to the pool.
                self.valid = false;
            }
        }
        response
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // SAFETY: `conn` is never used again after this call.
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool
            .return_connection(self.endpoint.clone(), conn, self.valid);
    }
}
