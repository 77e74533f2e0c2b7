//! Transport client and its builder.
//!
//! The [`Client`] performs one request/response round trip per call:
//! 1. Acquire a pooled connection (bounded by the caller's deadline)
//! 2. Write the request frame
//! 3. Read the response frame
//! 4. Release the connection back to the pool
//!
//! A failed write or read leaves the stream in an unknown state, so the
//! connection is discarded instead of released.
//!
//! # Example
//!
//! ```ignore
//! use minirpc::{Client, Codec};
//!
//! #[tokio::main]
//! async fn main() -> minirpc::Result<()> {
//!     let client = Client::builder("127.0.0.1:8081")
//!         .serializer(Codec::MsgPack)
//!         .build()
//!         .await?;
//!
//!     let deadline = client.default_deadline();
//!     let response = client
//!         .call("user-service", "GetById", br#"{"Id":123}"#.to_vec(), deadline)
//!         .await?;
//!     println!("{:?}", response.error);
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::codec::Codec;
use crate::compress::Compression;
use crate::error::{Result, RpcError};
use crate::pool::{BoxFuture, ConnectionFactory, ConnectionPool, PoolConfig};
use crate::protocol::{read_frame, write_frame, Request, Response, PROTOCOL_VERSION};
use crate::transport::{TcpConnector, DEFAULT_CONNECT_TIMEOUT};

/// Default timeout for writing a request and reading its response.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(3);

/// Default deadline applied by [`Client::default_deadline`].
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Client-side settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Pool sizing.
    pub pool: PoolConfig,
    /// Timeout for dialing a new connection.
    pub connect_timeout: Duration,
    /// Fixed timeout for the write + read of one call.
    pub io_timeout: Duration,
    /// Deadline used by stubs when the caller gives none.
    pub call_timeout: Duration,
    /// Serializer stamped into every request.
    pub codec: Codec,
    /// Compressor applied to request payloads.
    pub compression: Compression,
    /// Largest response frame accepted.
    pub max_frame_size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            codec: Codec::default(),
            compression: Compression::default(),
            max_frame_size: crate::protocol::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Builder for a TCP [`Client`].
pub struct ClientBuilder {
    addr: String,
    config: ClientConfig,
}

impl ClientBuilder {
    /// Start building a client for `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            config: ClientConfig::default(),
        }
    }

    /// Set the serializer used for arguments and results.
    ///
    /// Default: JSON
    pub fn serializer(mut self, codec: Codec) -> Self {
        self.config.codec = codec;
        self
    }

    /// Set the payload compressor.
    ///
    /// Default: none
    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Replace the pool configuration.
    pub fn pool_config(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    /// Set the dial timeout.
    ///
    /// Default: 3 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-call network timeout.
    ///
    /// Default: 3 seconds
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    /// Set the default call deadline used by stubs.
    ///
    /// Default: 5 seconds
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Set the largest accepted response frame.
    pub fn max_frame_size(mut self, max: u64) -> Self {
        self.config.max_frame_size = max;
        self
    }

    /// Build the client, opening the pool's initial connections.
    pub async fn build(self) -> Result<Client> {
        let connector = TcpConnector::new(self.addr).connect_timeout(self.config.connect_timeout);
        let pool = ConnectionPool::new(self.config.pool.clone(), connector).await?;
        Ok(Client::with_pool(pool, self.config))
    }
}

/// Issues calls over pooled connections.
///
/// Safe to share between tasks; concurrent calls use separate connections.
pub struct Client<F: ConnectionFactory = TcpConnector> {
    pool: ConnectionPool<F>,
    config: ClientConfig,
    next_message_id: AtomicU64,
}

impl<F: ConnectionFactory> std::fmt::Debug for Client<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.pool)
            .field("codec", &self.config.codec)
            .field("compression", &self.config.compression)
            .finish()
    }
}

impl Client {
    /// Start building a TCP client for `addr`.
    pub fn builder(addr: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(addr)
    }
}

impl<F> Client<F>
where
    F: ConnectionFactory,
    F::Connection: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a client over an existing pool.
    ///
    /// `config.pool` is ignored; the pool keeps its own settings.
    pub fn with_pool(pool: ConnectionPool<F>, config: ClientConfig) -> Self {
        Self {
            pool,
            config,
            next_message_id: AtomicU64::new(1),
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool<F> {
        &self.pool
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `now + call_timeout`.
    pub fn default_deadline(&self) -> Instant {
        Instant::now() + self.config.call_timeout
    }

    /// Perform one round trip.
    ///
    /// `argument` is the already-serialized argument; it is compressed here.
    /// The returned response carries the decompressed result payload.
    ///
    /// # Errors
    ///
    /// Returns a transport error (pool, I/O, framing, message-id mismatch)
    /// when no valid response was obtained. A handler failure is **not** an
    /// error here: it arrives as `Ok(response)` with a non-empty
    /// `response.error`.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        argument: Vec<u8>,
        deadline: Instant,
    ) -> Result<Response> {
        let payload = Bytes::from(self.config.compression.compress(&argument)?);
        let mut lease = Lease {
            pool: &self.pool,
            conn: Some(self.pool.acquire(deadline).await?),
        };

        let request = Request {
            message_id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
            version: PROTOCOL_VERSION,
            compressor_id: self.config.compression.id(),
            serializer_id: self.config.codec.id(),
            service_name: service.to_string(),
            method_name: method.to_string(),
            payload,
        };

        let exchanged = match lease.conn.as_mut() {
            Some(conn) => self.exchange(conn, &request).await,
            None => Err(RpcError::PoolClosed),
        };
        let response = match exchanged {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    service,
                    method,
                    message_id = request.message_id,
                    error = %e,
                    "call failed, discarding connection"
                );
                // dropping the lease discards the connection
                return Err(e);
            }
        };
        lease.release();

        let mut response = response;
        if !response.payload.is_empty() {
            let compression = Compression::from_id(response.compressor_id)?;
            response.payload = Bytes::from(compression.decompress(&response.payload)?);
        }

        tracing::debug!(
            service,
            method,
            message_id = request.message_id,
            business_error = response.is_error(),
            "call completed"
        );
        Ok(response)
    }

    async fn exchange(&self, conn: &mut F::Connection, request: &Request) -> Result<Response> {
        let io = async {
            write_frame(conn, &request.encode()?).await?;
            let body = read_frame(conn, self.config.max_frame_size).await?;
            Response::decode(&body)
        };

        let response = tokio::time::timeout(self.config.io_timeout, io)
            .await
            .map_err(|_| {
                RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no response within {:?}", self.config.io_timeout),
                ))
            })??;

        if response.message_id != request.message_id {
            return Err(RpcError::Protocol(format!(
                "response message id {} does not match request {}",
                response.message_id, request.message_id
            )));
        }
        Ok(response)
    }
}

/// A checked-out connection. Discarded on drop unless released, so a call
/// cancelled mid-exchange frees its pool slot.
struct Lease<'a, F: ConnectionFactory> {
    pool: &'a ConnectionPool<F>,
    conn: Option<F::Connection>,
}

impl<F: ConnectionFactory> Lease<'_, F> {
    fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl<F: ConnectionFactory> Drop for Lease<'_, F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn);
        }
    }
}

/// Round-trip seam used by synthesized stubs.
///
/// [`Client`] implements it; tests can substitute a canned implementation.
pub trait Invoker: Send + Sync + 'static {
    /// Serializer for arguments and results.
    fn codec(&self) -> Codec;

    /// Deadline for a call that did not specify one.
    fn default_deadline(&self) -> Instant;

    /// Perform one round trip, see [`Client::call`].
    fn invoke<'a>(
        &'a self,
        service: &'a str,
        method: &'a str,
        argument: Vec<u8>,
        deadline: Instant,
    ) -> BoxFuture<'a, Result<Response>>;
}

impl<F> Invoker for Client<F>
where
    F: ConnectionFactory,
    F::Connection: AsyncRead + AsyncWrite + Unpin,
{
    fn codec(&self) -> Codec {
        self.config.codec
    }

    fn default_deadline(&self) -> Instant {
        Client::<F>::default_deadline(self)
    }

    fn invoke<'a>(
        &'a self,
        service: &'a str,
        method: &'a str,
        argument: Vec<u8>,
        deadline: Instant,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(self.call(service, method, argument, deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, ENVELOPE_HEADER_SIZE};
    use std::io;
    use std::sync::Arc;
    use tokio::io::DuplexStream;
    use tokio::sync::Mutex;

    type Factory = Box<dyn Fn() -> BoxFuture<'static, io::Result<DuplexStream>> + Send + Sync>;

    /// Factory whose peer ends are answered by `reply`, one frame at a time.
    fn scripted<R>(reply: R) -> (Factory, Arc<Mutex<usize>>)
    where
        R: Fn(Request) -> Option<Response> + Send + Sync + Clone + 'static,
    {
        let dialed = Arc::new(Mutex::new(0usize));
        let counter = dialed.clone();
        let factory: Factory = Box::new(move || -> BoxFuture<'static, io::Result<DuplexStream>> {
            let reply = reply.clone();
            let counter = counter.clone();
            Box::pin(async move {
                *counter.lock().await += 1;
                let (client, mut server) = tokio::io::duplex(64 * 1024);
                tokio::spawn(async move {
                    while let Ok(body) = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE).await {
                        let Ok(req) = Request::decode(&body) else { break };
                        match reply(req) {
                            Some(resp) => {
                                if write_frame(&mut server, &resp.encode().unwrap()).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                });
                Ok(client)
            })
        });
        (factory, dialed)
    }

    fn pool_config() -> PoolConfig {
        PoolConfig {
            initial_count: 0,
            max_idle_count: 2,
            max_count: 2,
            max_idle_duration: Duration::from_secs(60),
        }
    }

    async fn client_with(factory: Factory, config: ClientConfig) -> Client<Factory> {
        let pool = ConnectionPool::new(pool_config(), factory).await.unwrap();
        Client::with_pool(pool, config)
    }

    fn echo(req: Request) -> Option<Response> {
        let mut resp = Response::for_request(&req);
        resp.payload = req.payload.clone();
        Some(resp)
    }

    #[tokio::test]
    async fn test_call_roundtrip_releases_connection() {
        let (factory, dialed) = scripted(echo);
        let client = client_with(factory, ClientConfig::default()).await;

        let resp = client
            .call("svc", "Echo", b"\"hi\"".to_vec(), client.default_deadline())
            .await
            .unwrap();
        assert_eq!(&resp.payload[..], b"\"hi\"");
        assert!(!resp.is_error());
        assert_eq!(client.pool().idle_count(), 1);

        client
            .call("svc", "Echo", b"1".to_vec(), client.default_deadline())
            .await
            .unwrap();
        assert_eq!(*dialed.lock().await, 1, "connection reused");
    }

    #[tokio::test]
    async fn test_request_carries_names_and_ids() {
        let (factory, _) = scripted(|req: Request| {
            let mut resp = Response::for_request(&req);
            let echoed = format!(
                "{}/{}/{}/{}",
                req.service_name, req.method_name, req.serializer_id, req.version
            );
            resp.payload = Bytes::from(echoed);
            Some(resp)
        });
        let config = ClientConfig {
            codec: Codec::MsgPack,
            ..ClientConfig::default()
        };
        let client = client_with(factory, config).await;

        let resp = client
            .call("user-service", "GetById", vec![], client.default_deadline())
            .await
            .unwrap();
        assert_eq!(&resp.payload[..], b"user-service/GetById/2/1");
    }

    #[tokio::test]
    async fn test_business_error_is_not_a_transport_error() {
        let (factory, _) = scripted(|req: Request| {
            let mut resp = Response::for_request(&req).with_error("error");
            resp.payload = Bytes::from_static(br#"{"Msg":"123"}"#);
            Some(resp)
        });
        let client = client_with(factory, ClientConfig::default()).await;

        let resp = client
            .call("svc", "M", vec![], client.default_deadline())
            .await
            .unwrap();
        assert_eq!(resp.error, "error");
        assert_eq!(&resp.payload[..], br#"{"Msg":"123"}"#);
        assert_eq!(client.pool().idle_count(), 1, "connection kept");
    }

    #[tokio::test]
    async fn test_closed_peer_discards_connection() {
        let (factory, _) = scripted(|_req: Request| None);
        let client = client_with(factory, ClientConfig::default()).await;

        let err = client
            .call("svc", "M", vec![], client.default_deadline())
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(client.pool().open_count(), 0);
        assert_eq!(client.pool().idle_count(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_message_id_is_protocol_error() {
        let (factory, _) = scripted(|req: Request| {
            let mut resp = Response::for_request(&req);
            resp.message_id += 100;
            Some(resp)
        });
        let client = client_with(factory, ClientConfig::default()).await;

        let err = client
            .call("svc", "M", vec![], client.default_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
        assert_eq!(client.pool().open_count(), 0);
    }

    #[tokio::test]
    async fn test_message_ids_increase() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = seen.clone();
        let (factory, _) = scripted(move |req: Request| {
            record.lock().unwrap().push(req.message_id);
            Some(Response::for_request(&req))
        });
        let client = client_with(factory, ClientConfig::default()).await;

        for _ in 0..3 {
            client
                .call("svc", "M", vec![], client.default_deadline())
                .await
                .unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_gzip_payload_is_compressed_on_the_wire() {
        let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = sizes.clone();
        let (factory, _) = scripted(move |req: Request| {
            record.lock().unwrap().push(req.payload.len());
            let mut resp = Response::for_request(&req);
            resp.payload = req.payload.clone();
            Some(resp)
        });
        let config = ClientConfig {
            compression: Compression::Gzip,
            ..ClientConfig::default()
        };
        let client = client_with(factory, config).await;

        let argument = vec![b'a'; 2048];
        let resp = client
            .call("svc", "Echo", argument.clone(), client.default_deadline())
            .await
            .unwrap();

        assert!(sizes.lock().unwrap()[0] < argument.len());
        assert_eq!(&resp.payload[..], &argument[..], "decompressed on return");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let (client_end, _server_end) = tokio::io::duplex(1024);
        let slot = Arc::new(std::sync::Mutex::new(Some(client_end)));
        let factory: Factory = Box::new(move || -> BoxFuture<'static, io::Result<DuplexStream>> {
            let conn = slot.lock().unwrap().take();
            Box::pin(async move { conn.ok_or_else(|| io::Error::other("used")) })
        });
        let config = ClientConfig {
            io_timeout: Duration::from_millis(100),
            call_timeout: Duration::from_secs(10),
            ..ClientConfig::default()
        };
        let client = client_with(factory, config).await;

        let err = client
            .call("svc", "M", vec![], client.default_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Io(ref e) if e.kind() == io::ErrorKind::TimedOut));
        assert_eq!(client.pool().open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_frees_slot() {
        let (client_end, _server_end) = tokio::io::duplex(1024);
        let slot = Arc::new(std::sync::Mutex::new(Some(client_end)));
        let factory: Factory = Box::new(move || -> BoxFuture<'static, io::Result<DuplexStream>> {
            let conn = slot.lock().unwrap().take();
            Box::pin(async move { conn.ok_or_else(|| io::Error::other("used")) })
        });
        let client = client_with(factory, ClientConfig::default()).await;

        let call = client.call("svc", "M", vec![], client.default_deadline());
        assert!(tokio::time::timeout(Duration::from_millis(10), call).await.is_err());
        assert_eq!(client.pool().open_count(), 0);
        assert_eq!(client.pool().idle_count(), 0);
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Client::builder("127.0.0.1:8081")
            .serializer(Codec::MsgPack)
            .compression(Compression::Gzip)
            .connect_timeout(Duration::from_secs(1))
            .io_timeout(Duration::from_secs(2))
            .call_timeout(Duration::from_secs(4))
            .max_frame_size(1024);

        assert_eq!(builder.addr, "127.0.0.1:8081");
        assert_eq!(builder.config.codec, Codec::MsgPack);
        assert_eq!(builder.config.compression, Compression::Gzip);
        assert_eq!(builder.config.connect_timeout, Duration::from_secs(1));
        assert_eq!(builder.config.io_timeout, Duration::from_secs(2));
        assert_eq!(builder.config.call_timeout, Duration::from_secs(4));
        assert_eq!(builder.config.max_frame_size, 1024);
    }

    #[test]
    fn test_empty_request_envelope_size() {
        let req = Request {
            message_id: 1,
            version: PROTOCOL_VERSION,
            compressor_id: 0,
            serializer_id: 1,
            service_name: String::new(),
            method_name: String::new(),
            payload: Bytes::new(),
        };
        assert_eq!(req.encode().unwrap().len(), ENVELOPE_HEADER_SIZE);
    }
}
