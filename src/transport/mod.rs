//! Transport module - stream connections for the pool.
//!
//! Provides [`TcpConnector`], the [`ConnectionFactory`](crate::pool::ConnectionFactory)
//! used by [`Client`](crate::Client) to dial the server.

mod tcp;

pub use tcp::{TcpConnector, DEFAULT_CONNECT_TIMEOUT};
