//! Bounded SQLite connection pool.
//!
//! Readers each take their own connection; the writer serialises on its own
//! lock and then takes one as well. Connections are opened lazily up to
//! `max_connections` and never closed while the pool lives, so an in-memory
//! database (which exists only as long as its single connection) survives.

use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use tracing::{debug, warn};

use crate::config::{DatastoreConfig, PoolConfig, RetryConfig};
use crate::error::{DatabaseError, Result};

use super::schema;

// ============================================================================
// Pool
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(String),
    Memory,
}

struct PoolState {
    idle: Vec<Connection>,
    open: u32,
}

pub struct ConnectionPool {
    location: Location,
    pool: PoolConfig,
    retry: RetryConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Open the pool, create `min_connections` connections and make sure the
    /// schema exists.
    pub fn open(config: &DatastoreConfig) -> Result<Self> {
        config.validate()?;
        let (location, pool) = match &config.database_path {
            Some(path) => (Location::File(path.clone()), config.pool.clone()),
            // A private in-memory database cannot be shared between
            // connections, so the pool degenerates to a single one.
            None => (
                Location::Memory,
                PoolConfig {
                    min_connections: 1,
                    max_connections: 1,
                    ..config.pool.clone()
                },
            ),
        };

        let this = Self {
            location,
            pool,
            retry: config.retry.clone(),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
        };

        let first = this.open_connection()?;
        schema::create_schema(&first)?;
        let mut idle = vec![first];
        for _ in 1..this.pool.min_connections {
            idle.push(this.open_connection()?);
        }
        {
            let mut state = this.state.lock();
            state.open = idle.len() as u32;
            state.idle = idle;
        }
        debug!(
            location = ?this.location,
            min = this.pool.min_connections,
            max = this.pool.max_connections,
            "connection pool opened"
        );
        Ok(this)
    }

    fn open_connection(&self) -> Result<Connection> {
        let conn = match &self.location {
            Location::File(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
                    | OpenFlags::SQLITE_OPEN_URI,
            ),
            Location::Memory => Connection::open_in_memory(),
        }
        .map_err(DatabaseError::from)?;
        schema::apply_pragmas(&conn)?;
        Ok(conn)
    }

    /// Take a connection, waiting up to `acquire_timeout_ms`.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let timeout = self.pool.acquire_timeout_ms;
        let deadline = Instant::now() + Duration::from_millis(timeout);
        let mut state = self.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }
            if state.open < self.pool.max_connections {
                state.open += 1;
                drop(state);
                return match self.open_connection() {
                    Ok(conn) => Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    }),
                    Err(err) => {
                        self.state.lock().open -= 1;
                        self.available.notify_one();
                        Err(err)
                    }
                };
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Err(DatabaseError::PoolTimeout(timeout).into());
            }
        }
    }

    fn release(&self, conn: Connection) {
        self.state.lock().idle.push(conn);
        self.available.notify_one();
    }

    /// Number of connections currently opened by the pool.
    pub fn open_connections(&self) -> u32 {
        self.state.lock().open
    }

    pub fn is_in_memory(&self) -> bool {
        self.location == Location::Memory
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Run `f` in a deferred transaction, retrying on transient failures.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        self.transaction(TransactionBehavior::Deferred, f)
    }

    /// Run `f` in an immediate (write-locking) transaction, retrying on
    /// transient failures. Nothing is committed when `f` fails.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        self.transaction(TransactionBehavior::Immediate, f)
    }

    fn transaction<T, F>(&self, behavior: TransactionBehavior, mut f: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        self.with_retry(|| {
            let mut conn = self.acquire()?;
            let tx = conn
                .transaction_with_behavior(behavior)
                .map_err(DatabaseError::from)?;
            let out = f(&tx)?;
            tx.commit().map_err(DatabaseError::from)?;
            Ok(out)
        })
    }

    /// Retry `op` while it fails with a transient database error.
    pub fn with_retry<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.retry.max_retries,
                        error = %err,
                        "transient database error, retrying"
                    );
                    std::thread::sleep(Duration::from_millis(self.retry.retry_timeout_ms));
                }
                other => return other,
            }
        }
    }
}

// ============================================================================
// PooledConnection
// ============================================================================

/// A connection on loan from the pool; returned on drop.
pub struct PooledConnection<'p> {
    pool: &'p ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
