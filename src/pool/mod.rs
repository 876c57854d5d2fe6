//! Bounded connection pool.
//!
//! This module provides the fixed-size pool the workers borrow sessions from:
//! - Eager population of `size` sessions at start-up
//! - Semaphore-bounded borrowing with an acquire deadline
//! - LIFO reuse of idle sessions
//! - Replacement of broken sessions with bounded reconnect backoff
//! - A "discard all" switch for when the server is known to be broken
//!
//! The semaphore holds one permit per pool slot, so the number of borrowed
//! sessions can never exceed `size` no matter how many workers contend.

mod stats;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_retry::Retry;

use crate::connection::{Connection, ConnectionFactory};
use crate::error_handling::{get_retry_strategy, ConnectionError, PoolError};

pub use stats::PoolStats;
use stats::AtomicPoolStats;

/// What the borrower decided about a session it is handing back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The session is usable; return it to the idle set
    Healthy,
    /// The session may be broken; close it and open a replacement
    Broken,
    /// Close the session without replacing it (the run is ending)
    Discard,
}

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of sessions (and the borrow limit)
    pub size: usize,
    /// Maximum time `acquire` waits for a free slot
    pub acquire_timeout: Duration,
}

/// A session on loan from the pool.
///
/// Hand it back with [`ConnectionPool::release`]. Dropping it without releasing
/// frees the slot but loses the session; the next borrower of that slot opens a
/// new one.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    borrowed: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// The borrowed session, `None` only after it was handed back.
    pub fn connection(&mut self) -> Option<&mut (dyn Connection + 'static)> {
        self.conn.as_deref_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.borrowed.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-size pool of database sessions.
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    config: PoolConfig,
    /// Idle sessions (LIFO)
    idle: Mutex<Vec<Box<dyn Connection>>>,
    /// One permit per slot
    permits: Arc<Semaphore>,
    borrowed: Arc<AtomicUsize>,
    closed: AtomicBool,
    /// Set once the server is considered broken; sessions are closed, not reused
    discarding: AtomicBool,
    stats: AtomicPoolStats,
}

impl ConnectionPool {
    /// Creates the pool and opens `config.size` sessions up front.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Connection` if any session cannot be opened after
    /// the reconnect retries. Sessions opened so far are closed.
    pub async fn new(
        factory: Arc<dyn ConnectionFactory>,
        config: PoolConfig,
    ) -> Result<Arc<Self>, PoolError> {
        let size = config.size.max(1);
        let pool = Arc::new(Self {
            factory,
            config: PoolConfig { size, ..config },
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size)),
            borrowed: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            discarding: AtomicBool::new(false),
            stats: AtomicPoolStats::default(),
        });

        for _ in 0..size {
            match pool.open_with_retry().await {
                Ok(conn) => pool.idle.lock().await.push(conn),
                Err(e) => {
                    pool.close().await;
                    return Err(e.into());
                }
            }
        }
        info!(
            "Connection pool ready: {} session(s) to {}",
            size,
            pool.factory.describe()
        );

        Ok(pool)
    }

    /// Borrows a session, waiting up to the acquire timeout for a free slot.
    ///
    /// # Errors
    ///
    /// - `PoolError::Exhausted` when no slot frees up in time
    /// - `PoolError::Closed` after [`ConnectionPool::close`] or
    ///   [`ConnectionPool::discard_all`]
    /// - `PoolError::Connection` when the slot had no idle session and opening
    ///   one failed
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let wait_start = Instant::now();
        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                self.stats.record_exhausted();
                return Err(PoolError::Exhausted(self.config.acquire_timeout));
            }
        };

        // A server declared broken gets no new sessions
        if self.discarding.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let idle = self.idle.lock().await.pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                // The slot lost its session to a failed replacement; open lazily
                debug!("No idle session for acquired slot, opening a new one");
                self.open_with_retry().await?
            }
        };

        let now_borrowed = self.borrowed.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats
            .record_acquisition(wait_start.elapsed().as_millis() as u64, now_borrowed);

        Ok(PooledConnection {
            conn: Some(conn),
            borrowed: Arc::clone(&self.borrowed),
            _permit: permit,
        })
    }

    /// Returns a borrowed session.
    ///
    /// `Healthy` sessions go back to the idle set. `Broken` sessions are closed
    /// and replaced. `Discard` closes without replacement. Once the pool is
    /// closed or discarding, every returned session is closed and not replaced.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Connection` when the replacement could not be opened.
    /// The slot is still freed; the next `acquire` on it opens lazily.
    pub async fn release(
        &self,
        mut pooled: PooledConnection,
        disposition: Disposition,
    ) -> Result<(), PoolError> {
        let Some(conn) = pooled.conn.take() else {
            return Ok(());
        };

        if disposition == Disposition::Discard
            || self.closed.load(Ordering::SeqCst)
            || self.discarding.load(Ordering::SeqCst)
        {
            self.close_connection(conn).await;
            return Ok(());
        }

        match disposition {
            Disposition::Healthy => {
                // Push before the permit drops so the next borrower finds it
                self.idle.lock().await.push(conn);
                Ok(())
            }
            Disposition::Broken => {
                self.close_connection(conn).await;
                match self.open_with_retry().await {
                    Ok(replacement) => {
                        self.stats.record_replaced();
                        self.idle.lock().await.push(replacement);
                        Ok(())
                    }
                    Err(e) => {
                        self.stats.record_replacement_failure();
                        warn!("Failed to replace broken session: {}", e);
                        Err(e.into())
                    }
                }
            }
            Disposition::Discard => Ok(()),
        }
    }

    /// Closes every idle session and stops reusing borrowed ones.
    ///
    /// Used when the server is considered broken: sessions still on loan are
    /// closed as they come back, and later borrows fail with
    /// `PoolError::Closed` instead of opening new sessions.
    pub async fn discard_all(&self) {
        if self.discarding.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<_> = self.idle.lock().await.drain(..).collect();
        info!("Discarding {} idle session(s)", drained.len());
        for conn in drained {
            self.close_connection(conn).await;
        }
    }

    /// Shuts the pool down and closes every idle session.
    ///
    /// Pending and future `acquire` calls fail with `PoolError::Closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        let drained: Vec<_> = self.idle.lock().await.drain(..).collect();
        for conn in drained {
            self.close_connection(conn).await;
        }
        debug!("Connection pool closed");
    }

    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Number of sessions currently on loan.
    pub fn borrowed(&self) -> usize {
        self.borrowed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot(self.config.size)
    }

    async fn open_with_retry(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let result = Retry::spawn(get_retry_strategy(), || async {
            self.factory.connect().await.inspect_err(|e| {
                warn!("Connection attempt failed: {}", e);
            })
        })
        .await;
        if result.is_ok() {
            self.stats.record_opened();
        }
        result
    }

    async fn close_connection(&self, conn: Box<dyn Connection>) {
        conn.close().await;
        self.stats.record_closed();
    }
}
