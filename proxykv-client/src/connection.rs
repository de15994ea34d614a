//! # Store Connections
//!
//! Purpose: Open and drive one connection to one proxy endpoint. The pool
//! only sees the `Connector`/`StoreConnection` traits, so tests can swap the
//! TCP transport for an in-process one.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: The pool is decoupled from the transport.
//! 2. **Buffer Reuse**: Each TCP connection keeps its own read/write buffers.
//! 3. **Low Latency**: Nagle is disabled; writes go straight to the socket.

use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::directory::BackendEndpoint;
use crate::error::{CacheError, CacheResult};
use crate::resp::{encode_command, ReplyReader, RespError, RespValue};

/// One live connection to a store proxy.
pub trait StoreConnection: Send {
    /// Sends one command and reads its reply.
    ///
    /// Error replies come back as `Ok(RespValue::Error(..))`; `Err` means the
    /// transport itself failed.
    fn exec(&mut self, args: &[Vec<u8>]) -> CacheResult<RespValue>;

    /// Cheap liveness check used before reusing long-idle connections.
    fn ping(&mut self) -> bool {
        matches!(
            self.exec(&[b"PING".to_vec()]),
            Ok(RespValue::Simple(_)) | Ok(RespValue::Bulk(Some(_)))
        )
    }
}

/// Opens connections to backend endpoints.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &BackendEndpoint) -> CacheResult<Box<dyn StoreConnection>>;
}

/// RESP2-over-TCP connector.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

impl Connector for TcpConnector {
    fn connect(&self, endpoint: &BackendEndpoint) -> CacheResult<Box<dyn StoreConnection>> {
        let stream = self.connect_stream(endpoint)?;
        let configure = |stream: &TcpStream| -> std::io::Result<()> {
            stream.set_read_timeout(self.read_timeout)?;
            stream.set_write_timeout(self.write_timeout)?;
            // Disable Nagle to keep request latency low for small payloads.
            stream.set_nodelay(true)
        };
        configure(&stream).map_err(|err| CacheError::io(endpoint, err))?;

        tracing::debug!(endpoint = %endpoint, "opened store connection");
        Ok(Box::new(TcpConnection {
            endpoint: endpoint.clone(),
            reader: ReplyReader::new(stream),
            write_buf: Vec::with_capacity(256),
        }))
    }
}

impl TcpConnector {
    fn connect_stream(&self, endpoint: &BackendEndpoint) -> CacheResult<TcpStream> {
        let addrs: Vec<SocketAddr> = (endpoint.host(), endpoint.port())
            .to_socket_addrs()
            .map_err(|err| CacheError::io(endpoint, err))?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }

        let err = last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "endpoint resolved to no address")
        });
        Err(CacheError::io(endpoint, err))
    }
}

/// Single TCP connection with reusable buffers.
struct TcpConnection {
    endpoint: BackendEndpoint,
    // Buffered reads; requests are written straight to the socket.
    reader: ReplyReader<TcpStream>,
    write_buf: Vec<u8>,
}

impl StoreConnection for TcpConnection {
    fn exec(&mut self, args: &[Vec<u8>]) -> CacheResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream
            .write_all(&self.write_buf)
            .and_then(|_| stream.flush())
            .map_err(|err| CacheError::io(&self.endpoint, err))?;

        self.reader.read_reply().map_err(|err| match err {
            RespError::Io(err) => CacheError::io(&self.endpoint, err),
            RespError::Protocol(reason) => CacheError::protocol(&self.endpoint, reason),
        })
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        tracing::debug!(endpoint = %self.endpoint, "closed store connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn tcp_connection_round_trips_ping() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = Vec::new();
            // *1, $4, PING
            for _ in 0..2 {
                line.clear();
                reader.read_until(b'\n', &mut line).unwrap();
            }
            let mut payload = [0u8; 6];
            reader.read_exact(&mut payload).unwrap();
            stream.write_all(b"+PONG\r\n").unwrap();
        });

        let endpoint = BackendEndpoint::new("127.0.0.1", addr.port());
        let connector = TcpConnector {
            connect_timeout: Some(Duration::from_secs(1)),
            read_timeout: Some(Duration::from_secs(1)),
            write_timeout: Some(Duration::from_secs(1)),
        };
        let mut conn = connector.connect(&endpoint).unwrap();
        assert!(conn.ping());
    }

    #[test]
    fn refused_connection_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpConnector::default()
            .connect(&BackendEndpoint::new("127.0.0.1", port))
            .err()
            .unwrap();
        assert!(err.is_retryable());
    }
}
