//! Bounded connection pool.
//!
//! The pool hands exclusive ownership of a connection to one caller at
//! a time. Idle connections are reused LIFO for warm caches; `reset()`
//! bumps a generation counter so connections checked out before the
//! reset are closed on release instead of re-queued.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{Error, PoolError, Result};
use crate::protocol::types::TransactionStatus;

use super::conn::Conn;

/// Hook run on every freshly dialed connection.
pub type AfterConnect = Box<dyn Fn(&mut Conn) -> Result<()> + Send + Sync>;

/// Pool tuning knobs.
pub struct PoolOptions {
    /// Maximum number of live connections. Must be at least 2.
    pub max_size: usize,
    /// Default deadline for `acquire`; `None` blocks indefinitely.
    pub acquire_timeout: Option<Duration>,
    /// Ping idle connections before reuse.
    pub test_on_acquire: bool,
    /// Hook run after each new connection is established.
    pub after_connect: Option<AfterConnect>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: None,
            test_on_acquire: false,
            after_connect: None,
        }
    }
}

struct PoolState {
    /// Number of live connections, checked out or idle
    total: usize,
    /// Idle connections, most recently released last (LIFO)
    available: Vec<Conn>,
    /// Bumped by reset(); stale connections are closed on release
    generation: u64,
    closed: bool,
}

struct PoolInner {
    config: Config,
    options: PoolOptions,
    /// SQL of statements replayed into every new connection's cache
    registered_statements: Mutex<Vec<String>>,
    state: Mutex<PoolState>,
    condvar: Condvar,
}

/// Bounded pool of blocking connections.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool. `options.max_size` below 2 is rejected.
    pub fn new(config: Config, options: PoolOptions) -> Result<Self> {
        if options.max_size < 2 {
            return Err(Error::InvalidUsage(format!(
                "pool max_size must be at least 2, got {}",
                options.max_size
            )));
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                options,
                registered_statements: Mutex::new(Vec::new()),
                state: Mutex::new(PoolState {
                    total: 0,
                    available: Vec::new(),
                    generation: 0,
                    closed: false,
                }),
                condvar: Condvar::new(),
            }),
        })
    }

    /// Register SQL to be prepared on every new connection.
    pub fn register_statement(&self, sql: &str) {
        self.inner
            .registered_statements
            .lock()
            .unwrap()
            .push(sql.to_string());
    }

    /// (live, idle) connection counts.
    pub fn status(&self) -> (usize, usize) {
        let state = self.inner.state.lock().unwrap();
        (state.total, state.available.len())
    }

    /// Acquire a connection, waiting up to the configured timeout.
    pub fn acquire(&self) -> Result<PooledConn> {
        self.acquire_with_timeout(self.inner.options.acquire_timeout)
    }

    /// Acquire a connection with an explicit deadline.
    pub fn acquire_with_timeout(&self, timeout: Option<Duration>) -> Result<PooledConn> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock().unwrap();

        loop {
            if state.closed {
                return Err(PoolError::Closed.into());
            }

            // LIFO reuse keeps recently used statement caches warm
            if let Some(conn) = state.available.pop() {
                let generation = state.generation;
                drop(state);
                match self.check_out(conn, generation) {
                    Some(conn) => return Ok(self.guard(conn)),
                    None => {
                        // Ping failed; the connection was dropped
                        let mut relocked = self.inner.state.lock().unwrap();
                        relocked.total -= 1;
                        self.inner.condvar.notify_all();
                        state = relocked;
                        continue;
                    }
                }
            }

            if state.total < self.inner.options.max_size {
                state.total += 1;
                let generation = state.generation;
                drop(state);
                match self.dial(generation) {
                    Ok(conn) => return Ok(self.guard(conn)),
                    Err(error) => {
                        let mut relocked = self.inner.state.lock().unwrap();
                        relocked.total -= 1;
                        drop(relocked);
                        self.inner.condvar.notify_all();
                        return Err(error);
                    }
                }
            }

            state = match deadline {
                None => self.inner.condvar.wait(state).unwrap(),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(PoolError::AcquireTimeout.into());
                    }
                    let (state, wait) = self
                        .inner
                        .condvar
                        .wait_timeout(state, remaining)
                        .unwrap();
                    if wait.timed_out() && state.available.is_empty() {
                        return Err(PoolError::AcquireTimeout.into());
                    }
                    state
                }
            };
        }
    }

    fn check_out(&self, mut conn: Conn, generation: u64) -> Option<Conn> {
        if conn.generation() != generation {
            return None;
        }
        if self.inner.options.test_on_acquire && conn.ping().is_err() {
            return None;
        }
        Some(conn)
    }

    fn dial(&self, generation: u64) -> Result<Conn> {
        tracing::debug!(generation, "pool dialing a new connection");
        let mut conn = Conn::connect(self.inner.config.clone())?;
        conn.set_generation(generation);
        if let Some(hook) = &self.inner.options.after_connect {
            hook(&mut conn)?;
        }
        let statements = self.inner.registered_statements.lock().unwrap().clone();
        for sql in statements {
            conn.prepare(&sql)?;
        }
        Ok(conn)
    }

    fn guard(&self, conn: Conn) -> PooledConn {
        PooledConn {
            pool: self.clone(),
            conn: ManuallyDrop::new(conn),
        }
    }

    /// Invalidate every current connection.
    ///
    /// Idle connections close immediately; checked-out ones close when
    /// released.
    pub fn reset(&self) {
        let drained = {
            let mut state = self.inner.state.lock().unwrap();
            state.generation += 1;
            let drained: Vec<Conn> = state.available.drain(..).collect();
            state.total -= drained.len();
            drained
        };
        for conn in drained {
            let _ = conn.close();
        }
        self.inner.condvar.notify_all();
    }

    /// Close the pool: no further acquires; waits for checked-out
    /// connections to come back, then closes everything.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.closed = true;
        self.inner.condvar.notify_all();

        loop {
            let drained: Vec<Conn> = state.available.drain(..).collect();
            state.total -= drained.len();
            drop(state);
            for conn in drained {
                let _ = conn.close();
            }

            state = self.inner.state.lock().unwrap();
            if state.total == 0 {
                return;
            }
            state = self.inner.condvar.wait(state).unwrap();
        }
    }

    /// Return a connection to the pool.
    fn release(&self, mut conn: Conn) {
        // Reset session state the borrower may have left behind
        if !conn.is_broken() && conn.transaction_status() != TransactionStatus::Idle {
            let _ = conn.query_drop("ROLLBACK");
        }
        if !conn.is_broken() && conn.is_listening() {
            let _ = conn.query_drop("UNLISTEN *");
            conn.clear_notifications();
        }
        conn.trim_buffers();

        let mut state = self.inner.state.lock().unwrap();
        let stale = conn.generation() != state.generation;
        if conn.is_broken() || stale || state.closed {
            state.total -= 1;
            drop(state);
            tracing::debug!(stale, "closing connection instead of re-queueing");
            let _ = conn.close();
        } else {
            state.available.push(conn);
            drop(state);
        }
        self.inner.condvar.notify_all();
    }
}

/// A connection checked out of the pool.
///
/// Dropping the guard releases the connection; broken or stale
/// connections are closed instead of re-queued.
pub struct PooledConn {
    pool: Pool,
    conn: ManuallyDrop<Conn>,
}

impl Deref for PooledConn {
    type Target = Conn;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // SAFETY: conn is never accessed after this
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool.release(conn);
    }
}
