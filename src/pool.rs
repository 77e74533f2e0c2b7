//! Bounded connection pool with idle reclamation and backpressure.
//!
//! The pool owns up to `max_count` connections produced by an injected
//! [`ConnectionFactory`]. Idle connections wait in a FIFO queue of at most
//! `max_idle_count` entries and are discarded once they have been idle for
//! longer than `max_idle_duration`.
//!
//! When every connection is checked out, [`ConnectionPool::acquire`] registers
//! a waiter and parks until [`ConnectionPool::release`] hands it a connection
//! or the caller's deadline passes. A slot freed while callers are parked
//! (a discarded connection, a failed or cancelled dial) is handed to the
//! newest waiter, which then opens its own connection.
//!
//! # Waiter policy
//!
//! Released connections go to the **most recently registered** waiter first
//! (LIFO). The newest caller sees the lowest latency; under sustained
//! saturation older waiters can starve until their deadline.
//!
//! # Locking
//!
//! `open_count`, the idle queue and the waiter stack sit behind one mutex.
//! The lock is never held across an `.await`; the only blocking step, waiting
//! on a waiter's handoff channel, happens outside it.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Result, RpcError};

/// Default number of connections opened eagerly.
pub const DEFAULT_INITIAL_COUNT: usize = 1;

/// Default idle queue capacity.
pub const DEFAULT_MAX_IDLE_COUNT: usize = 16;

/// Default upper bound on open connections.
pub const DEFAULT_MAX_COUNT: usize = 32;

/// Default idle time after which a connection is discarded.
pub const DEFAULT_MAX_IDLE_DURATION: Duration = Duration::from_secs(60);

/// Boxed future returned by connection factories.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Creates new connections for the pool.
///
/// Implemented for any `Fn() -> impl Future<Output = io::Result<C>>`, so a
/// closure works as a factory.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection type handed out by the pool.
    type Connection: Send + 'static;

    /// Open one new connection.
    fn connect(&self) -> BoxFuture<'static, io::Result<Self::Connection>>;
}

impl<F, Fut, C> ConnectionFactory for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<C>> + Send + 'static,
    C: Send + 'static,
{
    type Connection = C;

    fn connect(&self) -> BoxFuture<'static, io::Result<C>> {
        Box::pin(self())
    }
}

/// Pool sizing and reclamation settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections created by [`ConnectionPool::new`].
    pub initial_count: usize,
    /// Capacity of the idle queue.
    pub max_idle_count: usize,
    /// Maximum connections open at once (idle + checked out).
    pub max_count: usize,
    /// Idle time after which a connection is no longer handed out.
    pub max_idle_duration: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_count: DEFAULT_INITIAL_COUNT,
            max_idle_count: DEFAULT_MAX_IDLE_COUNT,
            max_count: DEFAULT_MAX_COUNT,
            max_idle_duration: DEFAULT_MAX_IDLE_DURATION,
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_count > self.max_count {
            return Err(RpcError::Config(format!(
                "initial_count {} exceeds max_count {}",
                self.initial_count, self.max_count
            )));
        }
        if self.initial_count > self.max_idle_count {
            return Err(RpcError::Config(format!(
                "initial_count {} exceeds max_idle_count {}",
                self.initial_count, self.max_idle_count
            )));
        }
        Ok(())
    }
}

/// An idle connection and the moment it was last returned.
struct PooledConnection<C> {
    conn: C,
    last_active_at: Instant,
}

/// What a parked waiter receives.
enum Handoff<C> {
    /// A released connection.
    Conn(C),
    /// A freed `open_count` slot; the waiter opens its own connection.
    Slot,
}

struct PoolState<C> {
    /// Idle + checked-out connections, plus slots reserved for dials in flight.
    open_count: usize,
    idle: VecDeque<PooledConnection<C>>,
    /// Pending acquisitions; the last entry is served first.
    waiters: Vec<oneshot::Sender<Handoff<C>>>,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn lock(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        // Every critical section leaves the state consistent, so a poisoned
        // lock is still safe to use.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, conn: F::Connection) {
        let mut conn = conn;
        let overflow = {
            let mut state = self.lock();

            while let Some(waiter) = state.waiters.pop() {
                // Ok means delivered; Err hands the connection back because
                // that waiter is gone, so try the next one.
                let Err(Handoff::Conn(returned)) = waiter.send(Handoff::Conn(conn)) else {
                    return;
                };
                conn = returned;
            }

            if state.idle.len() < self.config.max_idle_count {
                state.idle.push_back(PooledConnection {
                    conn,
                    last_active_at: Instant::now(),
                });
                return;
            }

            state.open_count -= 1;
            conn
        };

        tracing::debug!("idle queue full, closing released connection");
        drop(overflow);
    }

    /// Give up one slot: pass it to the newest live waiter, or uncount it.
    fn free_slot(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop() {
            if waiter.send(Handoff::Slot).is_ok() {
                return;
            }
        }
        state.open_count -= 1;
    }

    fn forward(&self, handoff: Handoff<F::Connection>) {
        match handoff {
            Handoff::Conn(conn) => self.release(conn),
            Handoff::Slot => self.free_slot(),
        }
    }
}

/// A slot counted in `open_count` for a connection still being opened.
/// Freed on drop unless disarmed, so a failed or cancelled dial gives it back.
struct SlotReservation<'a, F: ConnectionFactory> {
    inner: &'a PoolInner<F>,
    armed: bool,
}

impl<F: ConnectionFactory> SlotReservation<'_, F> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<F: ConnectionFactory> Drop for SlotReservation<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.free_slot();
        }
    }
}

/// A registered waiter's receiving end. Whatever reaches it after nobody is
/// listening goes back to the pool.
struct Waiter<F: ConnectionFactory> {
    pool: Weak<PoolInner<F>>,
    rx: oneshot::Receiver<Handoff<F::Connection>>,
}

impl<F: ConnectionFactory> Drop for Waiter<F> {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(handoff) = self.rx.try_recv() {
            if let Some(inner) = self.pool.upgrade() {
                inner.forward(handoff);
            }
        }
    }
}

/// What `acquire` does once the lock is released.
enum Checkout<C> {
    Ready(C),
    Create,
    Wait(oneshot::Receiver<Handoff<C>>),
}

/// A bounded pool of reusable connections.
///
/// Cloning is cheap; clones share the same pool.
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("open_count", &state.open_count)
            .field("idle_count", &state.idle.len())
            .field("waiter_count", &state.waiters.len())
            .finish()
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a pool and eagerly open `config.initial_count` connections.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Config`] if `initial_count` exceeds `max_count` or
    ///   `max_idle_count`
    /// - [`RpcError::Factory`] if any initial connection fails to open
    pub async fn new(config: PoolConfig, factory: F) -> Result<Self> {
        config.validate()?;

        let mut idle = VecDeque::with_capacity(config.max_idle_count);
        for _ in 0..config.initial_count {
            let conn = factory.connect().await.map_err(RpcError::Factory)?;
            idle.push_back(PooledConnection {
                conn,
                last_active_at: Instant::now(),
            });
        }

        tracing::debug!(
            initial = config.initial_count,
            max = config.max_count,
            max_idle = config.max_idle_count,
            "connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                state: Mutex::new(PoolState {
                    open_count: idle.len(),
                    idle,
                    waiters: Vec::new(),
                }),
                config,
            }),
        })
    }

    /// Take a connection, opening a new one or waiting if necessary.
    ///
    /// Never blocks while the pool is below `max_count`. When saturated, waits
    /// for a [`release`](Self::release) until `deadline`. A connection that
    /// arrives after the deadline is put back into the pool rather than lost.
    ///
    /// # Errors
    ///
    /// - [`RpcError::DeadlineExceeded`] if `deadline` passes first
    /// - [`RpcError::Factory`] if opening a new connection fails
    pub async fn acquire(&self, deadline: Instant) -> Result<F::Connection> {
        if Instant::now() >= deadline {
            return Err(RpcError::DeadlineExceeded);
        }

        match self.checkout() {
            Checkout::Ready(conn) => Ok(conn),
            Checkout::Create => self.create().await,
            Checkout::Wait(rx) => self.wait(rx, deadline).await,
        }
    }

    /// Return a checked-out connection.
    ///
    /// Hands it straight to the newest waiter if there is one; otherwise it
    /// joins the idle queue, or is closed if the queue is full.
    pub fn release(&self, conn: F::Connection) {
        self.inner.release(conn);
    }

    /// Close a checked-out connection that must not be reused.
    ///
    /// Frees its slot. If callers are waiting, the newest one takes the slot
    /// over and opens a fresh connection.
    pub fn discard(&self, conn: F::Connection) {
        drop(conn);
        self.inner.free_slot();
    }

    /// Connections currently open (idle + checked out).
    pub fn open_count(&self) -> usize {
        self.inner.lock().open_count
    }

    /// Connections waiting in the idle queue.
    pub fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    /// Registered waiters, including ones whose caller already timed out.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// The configuration this pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn checkout(&self) -> Checkout<F::Connection> {
        let max_idle = self.inner.config.max_idle_duration;
        let mut state = self.inner.lock();

        while let Some(idle) = state.idle.pop_front() {
            if idle.last_active_at + max_idle < Instant::now() {
                state.open_count -= 1;
                tracing::debug!("discarding stale idle connection");
                continue;
            }
            return Checkout::Ready(idle.conn);
        }

        if state.open_count < self.inner.config.max_count {
            state.open_count += 1;
            return Checkout::Create;
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push(tx);
        Checkout::Wait(rx)
    }

    async fn create(&self) -> Result<F::Connection> {
        let reservation = SlotReservation {
            inner: &self.inner,
            armed: true,
        };
        match self.inner.factory.connect().await {
            Ok(conn) => {
                reservation.disarm();
                Ok(conn)
            }
            Err(e) => {
                tracing::warn!(error = %e, "connection factory failed");
                Err(RpcError::Factory(e))
            }
        }
    }

    async fn wait(
        &self,
        rx: oneshot::Receiver<Handoff<F::Connection>>,
        deadline: Instant,
    ) -> Result<F::Connection> {
        let mut waiter = Waiter {
            pool: Arc::downgrade(&self.inner),
            rx,
        };

        let received = tokio::time::timeout_at(deadline, &mut waiter.rx).await;
        match received {
            Ok(Ok(Handoff::Conn(conn))) => Ok(conn),
            Ok(Ok(Handoff::Slot)) => self.create().await,
            Ok(Err(_)) => Err(RpcError::PoolClosed),
            Err(_) => {
                // The waiter stays registered. If something is handed to it
                // later, put it back instead of leaking the slot.
                tokio::spawn(async move {
                    if let Ok(handoff) = (&mut waiter.rx).await {
                        if let Some(inner) = waiter.pool.upgrade() {
                            tracing::debug!("forwarding late handoff back to the pool");
                            inner.forward(handoff);
                        }
                    }
                });
                Err(RpcError::DeadlineExceeded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connection stub that counts how many instances were closed.
    #[derive(Debug)]
    struct TestConn {
        id: usize,
        closed: Arc<AtomicUsize>,
    }

    impl Drop for TestConn {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct Counters {
        created: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    fn factory(
        counters: &Counters,
    ) -> impl Fn() -> BoxFuture<'static, io::Result<TestConn>> + Send + Sync + 'static {
        let counters = counters.clone();
        move || {
            let id = counters.created.fetch_add(1, Ordering::SeqCst);
            let closed = counters.closed.clone();
            Box::pin(async move { Ok(TestConn { id, closed }) })
        }
    }

    fn config(initial: usize, max_idle: usize, max: usize) -> PoolConfig {
        PoolConfig {
            initial_count: initial,
            max_idle_count: max_idle,
            max_count: max,
            max_idle_duration: Duration::from_secs(10),
        }
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_initial_count_above_max_rejected() {
        let counters = Counters::default();
        let result = ConnectionPool::new(config(3, 5, 2), factory(&counters)).await;
        assert!(matches!(result, Err(RpcError::Config(_))));
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_initial_count_above_max_idle_rejected() {
        let counters = Counters::default();
        let result = ConnectionPool::new(config(3, 2, 5), factory(&counters)).await;
        assert!(matches!(result, Err(RpcError::Config(_))));
    }

    #[tokio::test]
    async fn test_initial_connections_seed_idle_queue() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(2, 4, 4), factory(&counters))
            .await
            .unwrap();

        assert_eq!(pool.open_count(), 2);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_factory_error_during_init() {
        let failing = || async { Err::<TestConn, _>(io::Error::other("refused")) };
        let result = ConnectionPool::new(config(1, 1, 1), failing).await;
        assert!(matches!(result, Err(RpcError::Factory(_))));
    }

    #[tokio::test]
    async fn test_acquire_unsaturated_creates_connection() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(0, 2, 2), factory(&counters))
            .await
            .unwrap();

        let a = pool.acquire(far()).await.unwrap();
        let b = pool.acquire(far()).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(pool.open_count(), 2);
    }

    #[tokio::test]
    async fn test_factory_failure_rolls_back_open_count() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let failing = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<TestConn, _>(io::Error::other("refused")) }
        };
        let pool = ConnectionPool::new(config(0, 1, 1), failing).await.unwrap();

        assert!(matches!(
            pool.acquire(far()).await,
            Err(RpcError::Factory(_))
        ));
        assert_eq!(pool.open_count(), 0);

        // slot was freed, so the next call tries the factory again
        assert!(pool.acquire(far()).await.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(0, 2, 2), factory(&counters))
            .await
            .unwrap();

        let conn = pool.acquire(far()).await.unwrap();
        let id = conn.id;
        pool.release(conn);
        assert_eq!(pool.idle_count(), 1);

        let again = pool.acquire(far()).await.unwrap();
        assert_eq!(again.id, id);
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_into_full_idle_queue_closes() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(0, 1, 3), factory(&counters))
            .await
            .unwrap();

        let a = pool.acquire(far()).await.unwrap();
        let b = pool.acquire(far()).await.unwrap();
        assert_eq!(pool.open_count(), 2);

        pool.release(a);
        pool.release(b);

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.open_count(), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_connection_never_returned() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(1, 2, 2), factory(&counters))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        let conn = pool.acquire(far()).await.unwrap();
        assert_eq!(conn.id, 1, "stale connection 0 must be skipped");
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        // stale one discarded exactly once, fresh one counted
        assert_eq!(pool.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_refreshes_last_active() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(1, 1, 1), factory(&counters))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        let conn = pool.acquire(far()).await.unwrap();
        pool.release(conn);

        tokio::time::advance(Duration::from_secs(8)).await;
        let conn = pool.acquire(far()).await.unwrap();
        assert_eq!(conn.id, 0);
    }

    #[tokio::test]
    async fn test_saturated_acquire_waits_for_release() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(0, 1, 1), factory(&counters))
            .await
            .unwrap();

        let first = pool.acquire(far()).await.unwrap();
        let first_id = first.id;

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.acquire(far()).await });

        settle().await;
        assert!(!waiter.is_finished(), "second acquire must block");
        assert_eq!(pool.waiter_count(), 1);

        pool.release(first);
        let second = waiter.await.unwrap().unwrap();

        assert_eq!(second.id, first_id);
        assert_eq!(pool.idle_count(), 0, "handoff bypasses the idle queue");
        assert_eq!(pool.waiter_count(), 0);
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_newest_waiter_served_first() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(0, 1, 1), factory(&counters))
            .await
            .unwrap();
        let held = pool.acquire(far()).await.unwrap();

        let older_pool = pool.clone();
        let older = tokio::spawn(async move { older_pool.acquire(far()).await });
        settle().await;
        assert_eq!(pool.waiter_count(), 1);

        let newer_pool = pool.clone();
        let newer = tokio::spawn(async move { newer_pool.acquire(far()).await });
        settle().await;
        assert_eq!(pool.waiter_count(), 2);

        pool.release(held);
        let conn = newer.await.unwrap().unwrap();
        settle().await;
        assert!(!older.is_finished(), "older waiter is still parked");

        pool.release(conn);
        assert!(older.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_then_late_handoff_returns_to_pool() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(0, 1, 1), factory(&counters))
            .await
            .unwrap();
        let held = pool.acquire(far()).await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = pool.acquire(deadline).await;
        assert!(matches!(result, Err(RpcError::DeadlineExceeded)));
        assert_eq!(pool.waiter_count(), 1, "registration stays live");

        pool.release(held);
        settle().await;

        assert_eq!(pool.waiter_count(), 0);
        assert_eq!(pool.idle_count(), 1, "late handoff forwarded to the idle queue");
        assert_eq!(pool.open_count(), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_past_deadline_fails_immediately() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(1, 1, 1), factory(&counters))
            .await
            .unwrap();
        let result = pool.acquire(Instant::now()).await;
        assert!(matches!(result, Err(RpcError::DeadlineExceeded)));
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_discard_frees_slot() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(0, 1, 1), factory(&counters))
            .await
            .unwrap();

        let conn = pool.acquire(far()).await.unwrap();
        pool.discard(conn);
        assert_eq!(pool.open_count(), 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        let fresh = pool.acquire(far()).await.unwrap();
        assert_eq!(fresh.id, 1);
    }

    #[tokio::test]
    async fn test_discard_with_waiter_opens_replacement() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(0, 1, 1), factory(&counters))
            .await
            .unwrap();
        let broken = pool.acquire(far()).await.unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.acquire(far()).await });
        settle().await;

        pool.discard(broken);
        let replacement = waiter.await.unwrap().unwrap();
        assert_eq!(replacement.id, 1);
        assert_eq!(pool.open_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_replacement_dial_wakes_waiter() {
        let counters = Counters::default();
        let dialed = Arc::new(AtomicUsize::new(0));
        let attempts = dialed.clone();
        let closed = counters.closed.clone();
        let first_only = move || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            let closed = closed.clone();
            async move {
                if n == 0 {
                    Ok(TestConn { id: n, closed })
                } else {
                    Err(io::Error::other("refused"))
                }
            }
        };
        let pool = ConnectionPool::new(config(0, 1, 1), first_only).await.unwrap();
        let broken = pool.acquire(far()).await.unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.acquire(far()).await });
        settle().await;

        pool.discard(broken);
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(RpcError::Factory(_))), "woken with the dial error");
        assert_eq!(pool.open_count(), 0);
        assert_eq!(pool.waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_dial_frees_slot() {
        let counters = Counters::default();
        let closed = counters.closed.clone();
        let slow = move || {
            let closed = closed.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(TestConn { id: 0, closed })
            }
        };
        let pool = ConnectionPool::new(config(0, 1, 1), slow).await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(10), pool.acquire(far())).await;
        assert!(cancelled.is_err());
        assert_eq!(pool.open_count(), 0);

        let next = pool.acquire(Instant::now() + Duration::from_secs(5)).await;
        assert!(next.is_ok());
        assert_eq!(pool.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_dial_passes_slot_to_waiter() {
        let counters = Counters::default();
        let closed = counters.closed.clone();
        let slow = move || {
            let closed = closed.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(TestConn { id: 0, closed })
            }
        };
        let pool = ConnectionPool::new(config(0, 1, 1), slow).await.unwrap();

        let dialing_pool = pool.clone();
        let dialing = tokio::spawn(async move { dialing_pool.acquire(far()).await });
        settle().await;

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.acquire(far()).await });
        settle().await;
        assert_eq!(pool.waiter_count(), 1);

        dialing.abort();
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(pool.open_count(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_swallow_connection() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(0, 1, 1), factory(&counters))
            .await
            .unwrap();
        let held = pool.acquire(far()).await.unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.acquire(far()).await });
        settle().await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        pool.release(held);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.open_count(), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bounds_hold_under_contention() {
        let counters = Counters::default();
        let pool = ConnectionPool::new(config(0, 2, 3), factory(&counters))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let conn = pool.acquire(far()).await.unwrap();
                    assert!(pool.open_count() <= 3);
                    assert!(pool.idle_count() <= 2);
                    tokio::task::yield_now().await;
                    pool.release(conn);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(pool.open_count() <= 3);
        assert!(pool.idle_count() <= 2);
        let created = counters.created.load(Ordering::SeqCst);
        let closed = counters.closed.load(Ordering::SeqCst);
        assert_eq!(created - closed, pool.open_count());
    }
}
