//! # TCP Server
//!
//! Accept RESP2 connections, parse commands, and dispatch them to the
//! keyspace. Tests drive it through `DevServer::start`, which runs the
//! server on its own thread and runtime.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::commands;
use crate::db::Db;
use crate::protocol::{Reply, RespParser};

/// State shared by every connection of one server.
#[derive(Debug, Default)]
pub struct ServerState {
    db: Mutex<Db>,
    drop_budget: AtomicUsize,
    commands_seen: AtomicUsize,
}

impl ServerState {
    pub fn new() -> Self {
        ServerState::default()
    }

    /// Closes the connection instead of answering the next `count` commands.
    pub fn drop_next(&self, count: usize) {
        self.drop_budget.store(count, Ordering::SeqCst);
    }

    /// Commands received so far, dropped ones included.
    pub fn commands_seen(&self) -> usize {
        self.commands_seen.load(Ordering::SeqCst)
    }

    /// Runs one command against the keyspace.
    pub fn execute(&self, args: &[Vec<u8>]) -> Reply {
        let mut db = self.db.lock();
        commands::execute(&mut db, args)
    }

    fn take_drop(&self) -> bool {
        self.drop_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

/// Handles a single TCP client connection.
pub async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) -> io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => {
                    state.commands_seen.fetch_add(1, Ordering::SeqCst);
                    if state.take_drop() {
                        tracing::debug!("dropping connection instead of replying");
                        return Ok(());
                    }
                    out.clear();
                    state.execute(&args).encode(&mut out);
                    stream.write_all(&out).await?;
                }
                Ok(None) => break,
                Err(err) => {
                    out.clear();
                    Reply::err(err.to_string()).encode(&mut out);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

/// Accepts connections until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, state: Arc<ServerState>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::warn!(%peer, error = %err, "failed to set TCP_NODELAY");
                    }
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, state).await {
                            tracing::debug!(%peer, error = %err, "connection closed with error");
                        }
                    });
                }
                Err(err) => tracing::warn!(error = %err, "accept failed"),
            }
        }
    }
}

/// Entry point for in-process servers.
pub struct DevServer;

impl DevServer {
    /// Binds `addr` (use port 0 for an ephemeral port) and serves it on a
    /// background thread until the handle is dropped.
    pub fn start(addr: &str) -> io::Result<DevServerHandle> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let state = Arc::new(ServerState::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("proxykv-devserver".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            tracing::error!(error = %err, "failed to register listener");
                            return;
                        }
                    };
                    serve(listener, server_state, async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
                });
                // Dropping the runtime cancels in-flight connection tasks.
            })?;

        tracing::info!(addr = %local, "dev server listening");
        Ok(DevServerHandle {
            addr: local,
            state,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// Running server; shuts it down on drop.
pub struct DevServerHandle {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DevServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// See [`ServerState::drop_next`].
    pub fn drop_next(&self, count: usize) {
        self.state.drop_next(count);
    }

    pub fn commands_seen(&self) -> usize {
        self.state.commands_seen()
    }
}

impl Drop for DevServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdStream;
    use std::time::Duration;

    fn roundtrip(stream: &mut StdStream, request: &[u8], expected: &[u8]) {
        stream.write_all(request).unwrap();
        let mut reply = vec![0u8; expected.len()];
        stream.read_exact(&mut reply).unwrap();
        assert_eq!(reply, expected);
    }

    #[test]
    fn serves_commands_over_tcp() {
        let server = DevServer::start("127.0.0.1:0").unwrap();
        let mut stream = StdStream::connect(server.addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        roundtrip(&mut stream, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n", b"+OK\r\n");
        roundtrip(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$1\r\nv\r\n");
        assert_eq!(server.commands_seen(), 2);
    }

    #[test]
    fn drop_next_closes_connection() {
        let server = DevServer::start("127.0.0.1:0").unwrap();
        server.drop_next(1);

        let mut stream = StdStream::connect(server.addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        stream.write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap_or(0), 0);

        let mut stream = StdStream::connect(server.addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        roundtrip(&mut stream, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n");
        assert_eq!(server.commands_seen(), 2);
    }
}
