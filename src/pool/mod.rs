//! Bounded executor admission control
//!
//! A [`PermitPool`] is the single process-wide admission point for
//! downstream lookups. Every bounded call, batched or single, draws from
//! the same pool, so backpressure is global rather than per request.
//!
//! Permits are handed out as [`PoolPermit`] guards. Dropping the guard
//! returns the permit, so release happens on every exit path: success,
//! downstream failure, timeout, task abort or future cancellation. A
//! permit cannot be released twice because `release` consumes it.
//!
//! Waiters are queued by the underlying `tokio::sync::Semaphore`, which
//! admits in arrival order. A cancelled `acquire` future removes its
//! waiter from the queue without touching the free count.

mod stats;

pub use stats::PoolStats;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

use crate::metrics;

/// Errors that can occur while acquiring a permit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// No permit became free within the allowed wait
    #[error("Timed out after {0:?} waiting for a permit")]
    Timeout(Duration),

    /// The pool was shut down
    #[error("Permit pool has been closed")]
    Closed,
}

struct PoolInner {
    name: String,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl PoolInner {
    fn in_use(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    fn publish(&self) {
        metrics::record_pool_occupancy(&self.name, self.in_use(), self.capacity);
    }
}

/// Fixed-capacity permit pool shared by all bounded downstream calls.
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct PermitPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for PermitPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermitPool")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PermitPool {
    /// Create a pool with `capacity` permits. A capacity of zero is
    /// raised to one.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        let inner = Arc::new(PoolInner {
            name: name.into(),
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        });
        inner.publish();
        Self { inner }
    }

    /// Pool name, used as the metrics label
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Wait until a permit is free.
    ///
    /// Fails only once the pool is closed. Dropping the returned future
    /// before it resolves leaves the pool untouched.
    pub async fn acquire(&self) -> Result<PoolPermit, PoolError> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(self.admit(permit))
    }

    /// Wait at most `timeout` for a permit.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PoolPermit, PoolError> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    pool = %self.inner.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for permit"
                );
                Err(PoolError::Timeout(timeout))
            }
        }
    }

    /// Acquire with an optional bound on the wait.
    pub async fn acquire_within(
        &self,
        timeout: Option<Duration>,
    ) -> Result<PoolPermit, PoolError> {
        match timeout {
            Some(timeout) => self.acquire_timeout(timeout).await,
            None => self.acquire().await,
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<PoolPermit> {
        match self.inner.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(self.admit(permit)),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    /// Current occupancy. Never blocks behind acquire/release traffic.
    pub fn stats(&self) -> PoolStats {
        PoolStats::new(self.inner.capacity, self.inner.in_use())
    }

    /// Stop admitting. Pending and future `acquire` calls fail with
    /// [`PoolError::Closed`]; permits already held still release normally.
    pub fn close(&self) {
        debug!(pool = %self.inner.name, "Closing permit pool");
        self.inner.semaphore.close();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> PoolPermit {
        self.inner.publish();
        PoolPermit {
            permit: Some(permit),
            pool: self.inner.clone(),
        }
    }
}

/// A checked-out permit. Returned to the pool on drop.
#[must_use = "dropping a permit immediately releases it"]
pub struct PoolPermit {
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl PoolPermit {
    /// Return the permit to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for PoolPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolPermit")
            .field("pool", &self.pool.name)
            .finish()
    }
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            self.pool.publish();
        }
    }
}
