//! # Shared Pool Slot
//!
//! Purpose: Hold the one `ConnectionPool` that every facade built from the
//! same configuration shares, and construct it lazily exactly once.
//!
//! ## Design Principles
//! 1. **Explicit Ownership**: Application startup creates the slot and hands
//!    an `Arc<SharedPool>` to each facade; there is no global.
//! 2. **Check-then-act Under a Mutex**: The lifecycle state machine decides
//!    which caller builds; the others wait on a condition variable.
//! 3. **Lock-free Fast Path**: Once ready, the pool is read from a `OnceLock`.

use std::sync::OnceLock;

use parking_lot::{Condvar, Mutex};

use crate::error::CacheResult;
use crate::pool::ConnectionPool;

/// Lifecycle of a `SharedPool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolLifecycle {
    Uninitialized,
    Initializing,
    Ready,
}

/// Lazily initialized pool handle shared by facades.
pub struct SharedPool {
    ready: OnceLock<ConnectionPool>,
    state: Mutex<PoolLifecycle>,
    settled: Condvar,
}

impl Default for SharedPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedPool {
    pub fn new() -> Self {
        SharedPool {
            ready: OnceLock::new(),
            state: Mutex::new(PoolLifecycle::Uninitialized),
            settled: Condvar::new(),
        }
    }

    pub fn lifecycle(&self) -> PoolLifecycle {
        *self.state.lock()
    }

    /// Returns the pool if it has been built.
    pub fn get(&self) -> Option<ConnectionPool> {
        self.ready.get().cloned()
    }

    /// Returns the pool, building it with `init` if no caller has yet.
    ///
    /// Concurrent callers on a cold slot run `init` once; the rest block until
    /// it settles. A failed `init` returns the slot to `Uninitialized` and
    /// the error goes to the caller that ran it; the next caller tries again.
    pub fn get_or_init<F>(&self, init: F) -> CacheResult<ConnectionPool>
    where
        F: FnOnce() -> CacheResult<ConnectionPool>,
    {
        if let Some(pool) = self.ready.get() {
            return Ok(pool.clone());
        }

        let mut state = self.state.lock();
        loop {
            if let Some(pool) = self.ready.get() {
                return Ok(pool.clone());
            }
            if *state == PoolLifecycle::Initializing {
                self.settled.wait(&mut state);
            } else {
                break;
            }
        }
        *state = PoolLifecycle::Initializing;
        drop(state);

        let guard = InitGuard { slot: self };
        let outcome = init();
        std::mem::forget(guard);

        let mut state = self.state.lock();
        match &outcome {
            Ok(pool) => {
                // Only the Initializing owner reaches this point, so the set cannot race.
                let _ = self.ready.set(pool.clone());
                *state = PoolLifecycle::Ready;
            }
            Err(err) => {
                tracing::warn!(error = %err, "shared pool initialization failed");
                *state = PoolLifecycle::Uninitialized;
            }
        }
        drop(state);
        self.settled.notify_all();
        outcome
    }
}

/// Returns the slot to `Uninitialized` if `init` unwinds, so waiters are
/// released and a later caller can build.
struct InitGuard<'a> {
    slot: &'a SharedPool,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        *self.slot.state.lock() = PoolLifecycle::Uninitialized;
        self.slot.settled.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use crate::connection::TcpConnector;
    use crate::directory::{DirectorySettings, DirectoryWatcher, MemoryCoordinator};
    use crate::error::CacheError;
    use crate::pool::PoolConfig;

    const DIR: &str = "/proxy";

    fn build(coordinator: &Arc<MemoryCoordinator>) -> CacheResult<ConnectionPool> {
        let settings = DirectorySettings {
            connect_string: "zk:2181".to_string(),
            session_timeout: Duration::from_secs(1),
            proxy_dir: DIR.to_string(),
        };
        let watcher = DirectoryWatcher::start(coordinator.clone(), &settings)?;
        let config = PoolConfig {
            idle_eviction_interval: Duration::ZERO,
            ..PoolConfig::default()
        };
        ConnectionPool::new(config, watcher, Arc::new(TcpConnector::default()))
    }

    #[test]
    fn concurrent_cold_callers_build_once() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        coordinator.set_proxies(DIR, &["127.0.0.1:6379".to_string()]);
        let shared = Arc::new(SharedPool::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let builds = Arc::clone(&builds);
                let barrier = Arc::clone(&barrier);
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    barrier.wait();
                    shared
                        .get_or_init(|| {
                            builds.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            build(&coordinator)
                        })
                        .map(|_| ())
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.connect_count(), 1);
        assert_eq!(coordinator.watch_count(), 1);
        assert_eq!(shared.lifecycle(), PoolLifecycle::Ready);
    }

    #[test]
    fn failed_init_can_be_retried() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        let shared = SharedPool::new();

        let err = shared.get_or_init(|| build(&coordinator)).err().unwrap();
        assert!(matches!(err, CacheError::DiscoveryUnavailable(_)));
        assert_eq!(shared.lifecycle(), PoolLifecycle::Uninitialized);
        assert!(shared.get().is_none());

        coordinator.set_proxies(DIR, &["127.0.0.1:6379".to_string()]);
        assert!(shared.get_or_init(|| build(&coordinator)).is_ok());
        assert_eq!(shared.lifecycle(), PoolLifecycle::Ready);
        assert!(shared.get().is_some());
    }

    #[test]
    fn panicking_init_leaves_slot_usable() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        coordinator.set_proxies(DIR, &["127.0.0.1:6379".to_string()]);
        let shared = Arc::new(SharedPool::new());

        let waiter = {
            let shared = Arc::clone(&shared);
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                shared.get_or_init(|| build(&coordinator)).map(|_| ())
            })
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            shared.get_or_init(|| {
                thread::sleep(Duration::from_millis(60));
                panic!("coordinator blew up")
            })
        }));
        assert!(outcome.is_err());

        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(shared.lifecycle(), PoolLifecycle::Ready);
        assert_eq!(coordinator.watch_count(), 1);
    }
}
