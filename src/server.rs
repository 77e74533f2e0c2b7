//! TCP server: accepts connections and answers requests from a registry.
//!
//! Each accepted connection gets its own task that loops
//! read frame -> decode request -> dispatch -> write response
//! until the peer closes or sends something unparseable.
//!
//! # Example
//!
//! ```ignore
//! use minirpc::handler::{Outcome, ServiceDescriptor};
//! use minirpc::Server;
//!
//! #[tokio::main]
//! async fn main() -> minirpc::Result<()> {
//!     Server::builder()
//!         .service(ServiceDescriptor::new("greeter").method(
//!             "Hello",
//!             |_ctx, name: String| async move { Outcome::ok(format!("hello, {name}")) },
//!         ))
//!         .build()
//!         .serve("127.0.0.1:8081")
//!         .await
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};

use crate::error::Result;
use crate::handler::{ServiceDescriptor, ServiceRegistry};
use crate::protocol::{read_frame_or_eof, write_frame, Request, DEFAULT_MAX_FRAME_SIZE};

/// Server-side settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest request frame accepted; larger frames close the connection.
    pub max_frame_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Builder for [`Server`].
#[derive(Debug, Default)]
pub struct ServerBuilder {
    registry: ServiceRegistry,
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a builder with no services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service.
    pub fn service(mut self, service: ServiceDescriptor) -> Self {
        self.registry.register(service);
        self
    }

    /// Set the largest accepted request frame.
    ///
    /// Default: 64 MiB
    pub fn max_frame_size(mut self, max: u64) -> Self {
        self.config.max_frame_size = max;
        self
    }

    /// Build the server. The registry is read-only from here on.
    pub fn build(self) -> Server {
        Server {
            registry: Arc::new(self.registry),
            config: self.config,
        }
    }
}

/// An RPC server over a fixed set of services.
#[derive(Debug, Clone)]
pub struct Server {
    registry: Arc<ServiceRegistry>,
    config: ServerConfig,
}

impl Server {
    /// Start building a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Create a server from a populated registry.
    pub fn new(registry: ServiceRegistry, config: ServerConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    /// The registry requests are dispatched to.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Bind a listener without accepting yet.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<BoundServer> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = ?listener.local_addr().ok(), "server listening");
        Ok(BoundServer {
            listener,
            server: self,
        })
    }

    /// Bind and serve until accepting fails.
    pub async fn serve(self, addr: impl ToSocketAddrs) -> Result<()> {
        self.bind(addr).await?.serve().await
    }

    /// Answer requests on one stream until it closes.
    ///
    /// Returns `Ok(())` when the peer closes between frames. A peer that hangs
    /// up partway through a frame is an error ([`RpcError::ShortRead`](crate::RpcError::ShortRead)).
    pub async fn serve_connection<S>(&self, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let max = self.config.max_frame_size;
            let Some(body) = read_frame_or_eof(&mut stream, max).await? else {
                return Ok(());
            };
            let request = Request::decode(&body)?;

            tracing::trace!(
                message_id = request.message_id,
                service = %request.service_name,
                method = %request.method_name,
                "request"
            );

            let response = self.registry.dispatch(&request).await;
            write_frame(&mut stream, &response.encode()?).await?;
        }
    }
}

/// A server with a bound listener.
#[derive(Debug)]
pub struct BoundServer {
    listener: TcpListener,
    server: Server,
}

impl BoundServer {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per connection.
    ///
    /// A failed accept ends the loop and is returned. Per-connection errors
    /// only end that connection.
    pub async fn serve(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed, stopping server");
                    return Err(e.into());
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "set_nodelay failed");
            }
            tracing::debug!(%peer, "connection accepted");

            let server = self.server.clone();
            tokio::spawn(async move {
                match server.serve_connection(stream).await {
                    Ok(()) => tracing::debug!(%peer, "connection closed"),
                    Err(e) => tracing::warn!(%peer, error = %e, "connection terminated"),
                }
            });
        }
    }
}
