//! # minirpc
//!
//! A minimal RPC framework over TCP.
//!
//! ## Architecture
//!
//! - **Pool** ([`pool`]): bounded connection pool with deadlines, idle
//!   reclamation and newest-waiter-first handoff
//! - **Wire** ([`protocol`]): 8-byte big-endian length-prefixed frames carrying
//!   request/response envelopes
//! - **Server** ([`server`], [`handler`]): services registered by name, one task
//!   per connection, errors reported in the response
//! - **Client** ([`client`], [`proxy`]): pooled round trips and typed stubs
//!   synthesized from a service description
//!
//! Payloads are serialized with JSON or MessagePack ([`codec`]) and optionally
//! gzip-compressed ([`compress`]). The library emits [`tracing`] events and
//! never installs a subscriber.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use minirpc::handler::{Outcome, ServiceDescriptor};
//! use minirpc::proxy::{synthesize, ServiceDescription};
//! use minirpc::{Client, Server};
//!
//! #[tokio::main]
//! async fn main() -> minirpc::Result<()> {
//!     let server = Server::builder()
//!         .service(ServiceDescriptor::new("greeter").method(
//!             "Hello",
//!             |_ctx, name: String| async move { Outcome::ok(format!("hello, {name}")) },
//!         ))
//!         .build()
//!         .bind("127.0.0.1:0")
//!         .await?;
//!     let addr = server.local_addr()?;
//!     tokio::spawn(server.serve());
//!
//!     let client = Arc::new(Client::builder(addr.to_string()).build().await?);
//!     let stubs = synthesize(
//!         &ServiceDescription::new("greeter").operation::<String, String>("Hello"),
//!         client,
//!     )?;
//!     let hello = stubs.stub::<String, String>("Hello")?;
//!
//!     let reply = hello.call(&"world".to_string()).await;
//!     assert_eq!(reply.into_result()?, "hello, world");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod compress;
pub mod error;
pub mod handler;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod transport;

pub use client::{Client, ClientBuilder, ClientConfig, Invoker};
pub use codec::Codec;
pub use compress::Compression;
pub use error::{Result, RpcError};
pub use pool::{ConnectionFactory, ConnectionPool, PoolConfig};
pub use proxy::{synthesize, Reply, ServiceDescription, Stub, StubSet};
pub use server::{BoundServer, Server, ServerBuilder, ServerConfig};
