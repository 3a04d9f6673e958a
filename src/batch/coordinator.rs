//! Batch coordinator
//!
//! Fans a list of ids out to one task per id. Each task waits for a
//! permit from the shared [`PermitPool`], runs one downstream lookup,
//! releases the permit and hands back its outcome. Outcomes land in a
//! buffer pre-sized to the request and indexed by original position, so
//! the result mirrors the request order no matter which lookup finishes
//! first.
//!
//! A failed lookup only marks its own slot. Dropping the future returned
//! by [`BatchCoordinator::resolve_batch`] aborts every outstanding task;
//! their permit guards release on abort, so the pool never leaks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::batch::types::{BatchResult, ItemError, ItemOutcome, WorkItem};
use crate::config::{GatewayConfig, DEFAULT_MAX_BATCH_SIZE};
use crate::downstream::{DownstreamClient, FetchError};
use crate::metrics;
use crate::pool::PermitPool;
use crate::{GatewayError, Result};

/// Resolves id lists against one downstream behind the shared pool
pub struct BatchCoordinator<C: DownstreamClient> {
    operation: String,
    pool: PermitPool,
    client: Arc<C>,
    acquire_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
    max_batch_size: usize,
}

impl<C: DownstreamClient> std::fmt::Debug for BatchCoordinator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("operation", &self.operation)
            .field("downstream", &self.client.name())
            .field("pool", &self.pool)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("call_timeout", &self.call_timeout)
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

#[derive(Clone, Copy)]
struct UnitLimits {
    acquire_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
}

impl<C: DownstreamClient> BatchCoordinator<C> {
    /// Create a coordinator with no timeouts and the default batch limit
    pub fn new(operation: impl Into<String>, pool: PermitPool, client: Arc<C>) -> Self {
        Self {
            operation: operation.into(),
            pool,
            client,
            acquire_timeout: None,
            call_timeout: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    /// Apply the timeouts and batch limit from `config`
    pub fn configured(mut self, config: &GatewayConfig) -> Self {
        self.acquire_timeout = config.acquire_timeout;
        self.call_timeout = config.call_timeout;
        self.max_batch_size = config.max_batch_size;
        self
    }

    /// Bound the wait for a permit
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Bound each downstream lookup
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Reject requests with more ids than `limit`
    pub fn with_max_batch_size(mut self, limit: usize) -> Self {
        self.max_batch_size = limit.max(1);
        self
    }

    /// Operation name used in logs and metrics
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Pool this coordinator draws from
    pub fn pool(&self) -> &PermitPool {
        &self.pool
    }

    /// Downstream collaborator
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    fn limits(&self) -> UnitLimits {
        UnitLimits {
            acquire_timeout: self.acquire_timeout,
            call_timeout: self.call_timeout,
        }
    }

    /// Check the request shape before anything is dispatched.
    pub fn validate(&self, ids: &[String]) -> Result<()> {
        if ids.len() > self.max_batch_size {
            return Err(GatewayError::BatchTooLarge {
                requested: ids.len(),
                limit: self.max_batch_size,
            });
        }
        Ok(())
    }

    /// Resolve every id, returning one outcome per id in request order.
    ///
    /// Only a structurally invalid request is an `Err`; individual lookup
    /// failures show up as error entries. Duplicate ids are resolved
    /// independently.
    #[instrument(
        skip(self, ids),
        fields(operation = %self.operation, batch_size = ids.len(), batch_id = %Uuid::new_v4())
    )]
    pub async fn resolve_batch(&self, ids: Vec<String>) -> Result<BatchResult<C::Entity>> {
        self.validate(&ids)?;

        if ids.is_empty() {
            debug!("Empty batch, nothing to dispatch");
            return Ok(BatchResult::empty());
        }

        let batch_start = Instant::now();
        let total = ids.len();
        info!(
            downstream = %self.client.name(),
            pool_capacity = self.pool.capacity(),
            "Starting batch resolution"
        );

        let limits = self.limits();
        let mut handles: Vec<JoinHandle<(WorkItem, ItemOutcome<C::Entity>)>> =
            Vec::with_capacity(total);
        for (index, id) in ids.into_iter().enumerate() {
            let item = WorkItem::new(index, id);
            let unit = run_unit(item, self.pool.clone(), self.client.clone(), limits);
            handles.push(tokio::spawn(unit.in_current_span()));
        }

        let abort_guard = AbortOnDrop::new(handles.iter().map(JoinHandle::abort_handle).collect());
        let completed = join_all(handles).await;
        abort_guard.disarm();

        let mut slots: Vec<Option<ItemOutcome<C::Entity>>> = (0..total).map(|_| None).collect();
        for (position, joined) in completed.into_iter().enumerate() {
            match joined {
                Ok((item, outcome)) => slots[item.index] = Some(outcome),
                Err(e) => {
                    error!(index = position, error = %e, "Work item task failed");
                    slots[position] = Some(Err(ItemError::ItemUnavailable(format!(
                        "work item task failed: {e}"
                    ))));
                }
            }
        }

        let outcomes: Vec<ItemOutcome<C::Entity>> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(ItemError::ItemUnavailable("no outcome recorded".to_string()))
                })
            })
            .collect();
        let result = BatchResult::from_outcomes(outcomes);

        self.summarize(&result, batch_start.elapsed());
        Ok(result)
    }

    /// Resolve a single id through the same pool as batch calls.
    #[instrument(skip(self), fields(operation = %self.operation))]
    pub async fn resolve_one(&self, id: &str) -> ItemOutcome<C::Entity> {
        let item = WorkItem::new(0, id);
        let (_, outcome) = run_unit(item, self.pool.clone(), self.client.clone(), self.limits()).await;
        if let Err(e) = &outcome {
            metrics::record_item_error(&self.operation, e.kind());
        }
        outcome
    }

    fn summarize(&self, result: &BatchResult<C::Entity>, elapsed: Duration) {
        let total = result.len();
        let failed = result.failed();

        for (_, err) in result.errors() {
            metrics::record_item_error(&self.operation, err.kind());
        }
        metrics::record_batch(&self.operation, total, elapsed.as_secs_f64());

        info!(
            total = total,
            succeeded = total - failed,
            failed = failed,
            batch_duration_ms = elapsed.as_millis() as u64,
            "Batch resolution completed"
        );

        if total >= 5 && failed * 2 > total {
            warn!(
                failed = failed,
                total = total,
                "High failure rate detected in batch resolution"
            );
        }
    }
}

/// One unit of work: permit, lookup, release, outcome.
async fn run_unit<C: DownstreamClient>(
    mut item: WorkItem,
    pool: PermitPool,
    client: Arc<C>,
    limits: UnitLimits,
) -> (WorkItem, ItemOutcome<C::Entity>) {
    let permit = match pool.acquire_within(limits.acquire_timeout).await {
        Ok(permit) => permit,
        Err(e) => {
            debug!(index = item.index, id = %item.id, error = %e, "Permit not granted");
            item.complete(false);
            return (item, Err(e.into()));
        }
    };
    item.admit();
    debug!(index = item.index, id = %item.id, "Acquired permit");

    let fetched = match limits.call_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, client.fetch_by_id(&item.id)).await {
            Ok(fetched) => fetched,
            Err(_) => Err(FetchError::Unavailable(format!(
                "lookup of {} timed out after {:?}",
                item.id, timeout
            ))),
        },
        None => client.fetch_by_id(&item.id).await,
    };
    permit.release();

    let outcome = fetched.map_err(ItemError::from);
    match &outcome {
        Ok(_) => debug!(index = item.index, id = %item.id, "Item resolved"),
        Err(e) => debug!(index = item.index, id = %item.id, error = %e, "Item failed"),
    }
    item.complete(outcome.is_ok());
    (item, outcome)
}

/// Aborts spawned work items if the batch future is dropped early.
struct AbortOnDrop {
    handles: Vec<AbortHandle>,
}

impl AbortOnDrop {
    fn new(handles: Vec<AbortHandle>) -> Self {
        Self { handles }
    }

    fn disarm(mut self) {
        self.handles.clear();
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::{InMemoryCatalog, User};

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn coordinator(capacity: usize) -> BatchCoordinator<InMemoryCatalog<User>> {
        BatchCoordinator::new(
            "users_by_ids",
            PermitPool::new("coordinator-test", capacity),
            Arc::new(InMemoryCatalog::users()),
        )
    }

    #[tokio::test]
    async fn test_resolves_in_request_order() {
        let coordinator = coordinator(3);
        let result = coordinator.resolve_batch(ids(&["3", "1", "2"])).await.unwrap();
        let names: Vec<String> = result
            .into_entities()
            .into_iter()
            .map(|u| u.unwrap().name)
            .collect();
        assert_eq!(names, vec!["Charlie", "Alice", "Bob"]);
    }

    #[tokio::test]
    async fn test_empty_batch_touches_nothing() {
        let coordinator = coordinator(3);
        let result = coordinator.resolve_batch(Vec::new()).await.unwrap();
        assert!(result.is_empty());
        assert!(coordinator.client().calls().is_empty());
        assert_eq!(coordinator.pool().stats().current, 0);
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected_before_dispatch() {
        let coordinator = coordinator(3).with_max_batch_size(2);
        let err = coordinator
            .resolve_batch(ids(&["1", "2", "3"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::BatchTooLarge {
                requested: 3,
                limit: 2
            }
        ));
        assert!(coordinator.client().calls().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_one_shares_pool() {
        let coordinator = coordinator(1);
        let held = coordinator.pool().try_acquire().unwrap();
        let coordinator = coordinator.with_acquire_timeout(Duration::from_millis(20));

        let outcome = coordinator.resolve_one("1").await;
        assert!(matches!(outcome, Err(ItemError::PoolExhaustedTimeout(_))));

        held.release();
        assert_eq!(coordinator.resolve_one("1").await.unwrap().name, "Alice");
    }
}
