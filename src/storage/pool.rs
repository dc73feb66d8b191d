//! Bounded SQLite connection pool.
//!
//! At most `max_size` connections exist at once; a semaphore permit travels
//! with every checked-out connection. `min_idle` connections are opened
//! eagerly so the first saves after startup do not pay the open cost.
//! Waiting for a permit is bounded by `acquire_timeout_ms`; running out
//! surfaces as [`Error::PoolTimeout`], a recoverable storage error.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::PoolConfig;
use crate::{Error, Result};

/// How long SQLite itself waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

struct PoolInner {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    config: PoolConfig,
}

impl PoolInner {
    fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn take_idle(&self) -> Option<Connection> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    fn put_idle(&self, conn: Connection) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }
}

/// Pool of SQLite connections to one database file.
///
/// Cheap to clone; clones share the same connections and limits.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.inner.path)
            .field("max_size", &self.inner.config.max_size)
            .field("available", &self.available())
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl ConnectionPool {
    /// Open the pool and its `min_idle` warm connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a warm connection
    /// cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let inner = PoolInner {
            path: path.as_ref().to_path_buf(),
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            permits: Arc::new(Semaphore::new(config.max_size)),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            config,
        };

        for _ in 0..inner.config.min_idle {
            let conn = inner.open_connection()?;
            inner.put_idle(conn);
        }

        debug!(
            path = %inner.path.display(),
            max_size = inner.config.max_size,
            min_idle = inner.config.min_idle,
            "Opened SQLite connection pool"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Check out a connection, waiting at most the acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolTimeout`] if every connection stays busy past the
    /// deadline, or an SQLite error if a fresh connection cannot be opened.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = self.acquire_permit().await?;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || checkout(inner, permit))
            .await
            .map_err(|e| Error::WorkerPool(format!("connection checkout task failed: {e}")))?
    }

    /// Run `f` on a pooled connection on the blocking thread pool.
    ///
    /// The connection returns to the pool when `f` finishes, whatever its
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolTimeout`] on exhaustion, or whatever `f` returns.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.acquire_permit().await?;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut conn = checkout(inner, permit)?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| Error::WorkerPool(format!("blocking storage task failed: {e}")))?
    }

    /// Synchronous checkout for startup work (schema creation).
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolTimeout`] if no permit is free right now.
    pub fn try_acquire(&self) -> Result<PooledConnection> {
        let permit = Arc::clone(&self.inner.permits)
            .try_acquire_owned()
            .map_err(|_| Error::PoolTimeout(0))?;
        checkout(Arc::clone(&self.inner), permit)
    }

    /// Connections that could be checked out right now without waiting.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Open connections currently parked in the pool.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Upper bound on simultaneously open connections.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.inner.config.max_size
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        let permits = Arc::clone(&self.inner.permits);
        match tokio::time::timeout(self.inner.acquire_timeout, permits.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(Error::WorkerPool("connection pool closed".into())),
            Err(_) => Err(Error::PoolTimeout(self.inner.config.acquire_timeout_ms)),
        }
    }
}

fn checkout(inner: Arc<PoolInner>, permit: OwnedSemaphorePermit) -> Result<PooledConnection> {
    let conn = match inner.take_idle() {
        Some(conn) => conn,
        None => inner.open_connection()?,
    };
    Ok(PooledConnection {
        conn: Some(conn),
        pool: inner,
        _permit: permit,
    })
}

/// A checked-out connection; returns to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("path", &self.pool.path)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `None` after drop has run
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_idle(conn);
        }
    }
}
