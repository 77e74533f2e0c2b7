//! TCP connection factory.
//!
//! # Example
//!
//! ```ignore
//! use minirpc::pool::{ConnectionPool, PoolConfig};
//! use minirpc::transport::TcpConnector;
//!
//! let pool = ConnectionPool::new(PoolConfig::default(), TcpConnector::new("127.0.0.1:8081")).await?;
//! ```

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::pool::{BoxFuture, ConnectionFactory};

/// Default timeout for establishing a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Dials a fixed address, bounding each attempt by a timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector for `addr` (e.g. `"127.0.0.1:8081"`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the timeout for each connection attempt.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The address this connector dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl ConnectionFactory for TcpConnector {
    type Connection = TcpStream;

    fn connect(&self) -> BoxFuture<'static, io::Result<TcpStream>> {
        let addr = self.addr.clone();
        let timeout = self.connect_timeout;
        Box::pin(async move {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {addr} timed out after {timeout:?}"),
                    )
                })??;
            // one small request frame per call, don't wait for coalescing
            stream.set_nodelay(true)?;
            tracing::debug!(addr = %addr, "connection established");
            Ok(stream)
        })
    }
}
