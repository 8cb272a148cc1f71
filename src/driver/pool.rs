//! Connection pooling.
//!
//! The pool is bounded and lazy: sockets are dialed on demand, reused while
//! healthy, and discarded when dirty, stale, or dead. A semaphore bounds the
//! number of live connections; acquisition blocks up to the configured
//! timeout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::config::PoolConfig;
use super::connection::{BoltConnection, TlsContext};
use super::error::{DriverError, DriverResult};

/// A pooled connection: socket plus authentication state.
///
/// Owned exclusively by the caller that got it from the pool. The permit it
/// carries keeps the pool's live-connection count honest; dropping the
/// connection releases the slot.
pub struct PooledConnection {
    conn: BoltConnection,
    permit: Option<OwnedSemaphorePermit>,
    id: u64,
    authenticated: bool,
    bolt_version: (u8, u8),
    created_at: Instant,
    last_used_at: Instant,
    dirty: bool,
}

impl PooledConnection {
    fn new(conn: BoltConnection, id: u64, permit: OwnedSemaphorePermit) -> Self {
        let now = Instant::now();
        Self {
            conn,
            permit: Some(permit),
            id,
            authenticated: false,
            bolt_version: (0, 0),
            created_at: now,
            last_used_at: now,
            dirty: false,
        }
    }

    /// Connection id, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The underlying framed connection.
    pub fn connection(&mut self) -> &mut BoltConnection {
        &mut self.conn
    }

    /// Record successful authentication and the negotiated version.
    pub fn mark_authenticated(&mut self, major: u8, minor: u8) {
        self.authenticated = true;
        self.bolt_version = (major, minor);
        self.last_used_at = Instant::now();
        self.dirty = false;
    }

    /// Update the last-used timestamp.
    pub fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    /// Mark the protocol state unknown. The connection will not be reused
    /// without a fresh handshake, and the pool discards it on return.
    pub fn mark_dirty(&mut self) {
        self.authenticated = false;
        self.dirty = true;
    }

    /// Whether the connection is in an unknown protocol state.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether this connection has been authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Negotiated Bolt version (zeros before authentication).
    pub fn bolt_version(&self) -> (u8, u8) {
        self.bolt_version
    }

    /// Time since creation.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since last use.
    pub fn idle_time(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Whether a full handshake is required before the next use.
    ///
    /// True when the connection was never authenticated, or when it sat
    /// idle longer than `max_idle` (a zero `max_idle` disables the idle
    /// check).
    pub fn needs_reauth(&self, max_idle: Duration) -> bool {
        if !self.authenticated {
            return true;
        }
        max_idle > Duration::ZERO && self.idle_time() > max_idle
    }

    /// Probe the socket. See [`BoltConnection::is_alive`].
    pub async fn is_alive(&mut self) -> bool {
        self.conn.is_alive().await
    }

    async fn close(mut self) {
        let _ = self.conn.close().await;
        drop(self.permit.take());
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("authenticated", &self.authenticated)
            .field("dirty", &self.dirty)
            .field("age", &self.age())
            .finish()
    }
}

/// Pool usage snapshot.
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    /// Idle connections currently parked
    pub idle: usize,
    /// Connections currently checked out
    pub in_use: usize,
    /// Total sockets dialed over the pool's lifetime
    pub total_created: u64,
    /// Total sockets closed over the pool's lifetime
    pub total_closed: u64,
    /// Total successful acquisitions
    pub total_acquired: u64,
}

/// Bounded, lazy connection pool.
pub struct ConnectionPool {
    address: String,
    config: PoolConfig,
    tls: Option<TlsContext>,
    idle: Mutex<VecDeque<PooledConnection>>,
    semaphore: Arc<Semaphore>,
    open: RwLock<bool>,
    next_id: AtomicU64,
    total_created: AtomicU64,
    total_closed: AtomicU64,
    total_acquired: AtomicU64,
}

impl ConnectionPool {
    /// Create a pool dialing `address`, with optional TLS wrapping.
    pub fn new(address: String, config: PoolConfig, tls: Option<TlsContext>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_connections));
        Self {
            address,
            config,
            tls,
            idle: Mutex::new(VecDeque::new()),
            semaphore,
            open: RwLock::new(true),
            next_id: AtomicU64::new(1),
            total_created: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_acquired: AtomicU64::new(0),
        }
    }

    /// Acquire a connection.
    ///
    /// Pops an idle connection when a healthy one exists, otherwise dials.
    /// Blocks up to the acquisition timeout when the pool is at capacity.
    /// A failed acquisition returns only the error.
    pub async fn get(&self) -> DriverResult<PooledConnection> {
        if !*self.open.read() {
            return Err(DriverError::usage("Pool is closed"));
        }

        let permit = tokio::time::timeout(
            self.config.acquisition_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| DriverError::timeout("Connection acquisition timed out"))?
        .map_err(|_| DriverError::usage("Pool is closed"))?;

        // Prefer a parked connection over dialing.
        while let Some(mut conn) = self.pop_idle() {
            if conn.age() > self.config.connection_lifetime {
                debug!(id = conn.id(), "discarding stale pooled connection");
                self.discard(conn);
                continue;
            }
            if !conn.is_alive().await {
                warn!(id = conn.id(), "discarding dead pooled connection");
                self.discard(conn);
                continue;
            }

            conn.permit = Some(permit);
            self.total_acquired.fetch_add(1, Ordering::Relaxed);
            return Ok(conn);
        }

        let conn = self.dial(permit).await?;
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// Return a connection.
    ///
    /// Connections returned with an error, marked dirty, or past their
    /// lifetime are closed; healthy ones go back to the idle queue.
    pub fn put(&self, mut conn: PooledConnection, op_err: Option<&DriverError>) {
        if !*self.open.read() {
            self.discard(conn);
            return;
        }

        let broken = op_err.is_some() || conn.is_dirty();
        let expired = conn.age() > self.config.connection_lifetime;

        if broken || expired {
            debug!(
                id = conn.id(),
                broken, expired, "closing returned connection"
            );
            self.discard(conn);
            return;
        }

        // Park first, then free the slot, so a blocked get() wakes to find
        // the idle connection already there.
        let permit = conn.permit.take();
        self.idle.lock().push_back(conn);
        drop(permit);
    }

    /// Close the pool: refuse new acquisitions and say goodbye to idle
    /// connections.
    pub async fn close(&self) {
        *self.open.write() = false;

        let drained: Vec<PooledConnection> = self.idle.lock().drain(..).collect();
        for conn in drained {
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            conn.close().await;
        }
    }

    /// Usage snapshot.
    pub fn metrics(&self) -> PoolMetrics {
        let idle = self.idle.lock().len();
        // Idle connections hold no permit, so held permits equal the number
        // of connections currently checked out.
        let in_use = self
            .config
            .max_connections
            .saturating_sub(self.semaphore.available_permits());

        PoolMetrics {
            idle,
            in_use,
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
        }
    }

    /// Number of idle connections currently parked.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// The address this pool dials.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn pop_idle(&self) -> Option<PooledConnection> {
        self.idle.lock().pop_front()
    }

    fn discard(&self, conn: PooledConnection) {
        self.total_closed.fetch_add(1, Ordering::Relaxed);
        // Dropping closes the socket and releases the permit, if any.
        drop(conn);
    }

    async fn dial(&self, permit: OwnedSemaphorePermit) -> DriverResult<PooledConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(address = %self.address, id, "dialing new connection");

        let conn = BoltConnection::connect(&self.address, self.tls.as_ref()).await?;
        self.total_created.fetch_add(1, Ordering::Relaxed);

        Ok(PooledConnection::new(conn, id, permit))
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("idle", &self.idle_count())
            .finish()
    }
}
