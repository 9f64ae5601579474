//! Asynchronous connection pool.
//!
//! Same semantics as the blocking pool: bounded size, LIFO reuse,
//! generational invalidation via `reset()`. Returning a connection
//! happens on a spawned task because guards are dropped synchronously.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::Config;
use crate::error::{Error, PoolError, Result};
use crate::protocol::types::TransactionStatus;

use super::conn::Conn;

/// Boxed future returned by pool hooks.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Hook run on every freshly dialed connection.
pub type AfterConnect =
    Box<dyn for<'a> Fn(&'a mut Conn) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Pool tuning knobs.
pub struct PoolOptions {
    /// Maximum number of live connections. Must be at least 2.
    pub max_size: usize,
    /// Default deadline for `acquire`; `None` waits indefinitely.
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
    total: usize,
    available: Vec<Conn>,
    generation: u64,
    closed: bool,
}

struct PoolInner {
    config: Config,
    options: PoolOptions,
    registered_statements: Mutex<Vec<String>>,
    state: Mutex<PoolState>,
    notify: Notify,
}

/// Bounded pool of async connections.
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
                notify: Notify::new(),
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
    pub async fn acquire(&self) -> Result<PooledConn> {
        match self.inner.options.acquire_timeout {
            None => self.acquire_inner().await,
            Some(timeout) => match tokio::time::timeout(timeout, self.acquire_inner()).await {
                Ok(result) => result,
                Err(_) => Err(PoolError::AcquireTimeout.into()),
            },
        }
    }

    async fn acquire_inner(&self) -> Result<PooledConn> {
        loop {
            // Register interest before checking, so a release between
            // the check and the await still wakes us
            let notified = self.inner.notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            enum Plan {
                Reuse(Conn, u64),
                Dial(u64),
                Wait,
            }

            let plan = {
                let mut state = self.inner.state.lock().unwrap();
                if state.closed {
                    return Err(PoolError::Closed.into());
                }
                if let Some(conn) = state.available.pop() {
                    Plan::Reuse(conn, state.generation)
                } else if state.total < self.inner.options.max_size {
                    state.total += 1;
                    Plan::Dial(state.generation)
                } else {
                    Plan::Wait
                }
            };

            match plan {
                Plan::Reuse(mut conn, generation) => {
                    let usable = conn.generation() == generation
                        && (!self.inner.options.test_on_acquire || conn.ping().await.is_ok());
                    if usable {
                        return Ok(self.guard(conn));
                    }
                    let _ = conn.close().await;
                    self.inner.state.lock().unwrap().total -= 1;
                    self.inner.notify.notify_waiters();
                }
                Plan::Dial(generation) => match self.dial(generation).await {
                    Ok(conn) => return Ok(self.guard(conn)),
                    Err(error) => {
                        self.inner.state.lock().unwrap().total -= 1;
                        self.inner.notify.notify_waiters();
                        return Err(error);
                    }
                },
                Plan::Wait => notified.await,
            }
        }
    }

    async fn dial(&self, generation: u64) -> Result<Conn> {
        tracing::debug!(generation, "pool dialing a new connection");
        let mut conn = Conn::connect(self.inner.config.clone()).await?;
        conn.set_generation(generation);
        if let Some(hook) = &self.inner.options.after_connect {
            hook(&mut conn).await?;
        }
        let statements = self.inner.registered_statements.lock().unwrap().clone();
        for sql in statements {
            conn.prepare(&sql).await?;
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
    pub async fn reset(&self) {
        let drained = {
            let mut state = self.inner.state.lock().unwrap();
            state.generation += 1;
            let drained: Vec<Conn> = state.available.drain(..).collect();
            state.total -= drained.len();
            drained
        };
        for conn in drained {
            let _ = conn.close().await;
        }
        self.inner.notify.notify_waiters();
    }

    /// Close the pool: no further acquires; waits for checked-out
    /// connections to come back, then closes everything.
    pub async fn close(&self) {
        loop {
            let notified = self.inner.notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            let drained = {
                let mut state = self.inner.state.lock().unwrap();
                state.closed = true;
                let drained: Vec<Conn> = state.available.drain(..).collect();
                state.total -= drained.len();
                drained
            };
            for conn in drained {
                let _ = conn.close().await;
            }

            let done = {
                let state = self.inner.state.lock().unwrap();
                state.total == 0 && state.available.is_empty()
            };
            if done {
                self.inner.notify.notify_waiters();
                return;
            }
            notified.await;
        }
    }

    async fn release(&self, mut conn: Conn) {
        if !conn.is_broken() && conn.transaction_status() != TransactionStatus::Idle {
            let _ = conn.query_drop("ROLLBACK").await;
        }
        if !conn.is_broken() && conn.is_listening() {
            let _ = conn.query_drop("UNLISTEN *").await;
            conn.clear_notifications();
        }
        conn.trim_buffers();

        let discarded = {
            let mut state = self.inner.state.lock().unwrap();
            let stale = conn.generation() != state.generation;
            if conn.is_broken() || stale || state.closed {
                state.total -= 1;
                Some(conn)
            } else {
                state.available.push(conn);
                None
            }
        };
        if let Some(conn) = discarded {
            let _ = conn.close().await;
        }
        self.inner.notify.notify_waiters();
    }
}

/// A connection checked out of the async pool.
///
/// Dropping the guard spawns a task that resets and returns the
/// connection.
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
        let pool = self.pool.clone();
        tokio::spawn(async move {
            pool.release(conn).await;
        });
    }
}
