use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::downstream::FetchError;
use crate::pool::PoolError;

/// Per-item failure. Never escalates to the whole batch.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemError {
    /// Upstream has no entity with this id
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// Transport failure or downstream timeout
    #[error("Item unavailable: {0}")]
    ItemUnavailable(String),

    /// Upstream answered with an unexpected shape
    #[error("Item malformed: {0}")]
    ItemMalformed(String),

    /// Waited past the configured timeout for a permit
    #[error("Timed out after {0:?} waiting for a permit")]
    PoolExhaustedTimeout(Duration),
}

impl ItemError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::ItemNotFound(_) => "not_found",
            ItemError::ItemUnavailable(_) => "unavailable",
            ItemError::ItemMalformed(_) => "malformed",
            ItemError::PoolExhaustedTimeout(_) => "pool_timeout",
        }
    }
}

impl From<FetchError> for ItemError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound(msg) => ItemError::ItemNotFound(msg),
            FetchError::Unavailable(msg) => ItemError::ItemUnavailable(msg),
            FetchError::Malformed(msg) => ItemError::ItemMalformed(msg),
        }
    }
}

impl From<PoolError> for ItemError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(waited) => ItemError::PoolExhaustedTimeout(waited),
            PoolError::Closed => ItemError::ItemUnavailable(err.to_string()),
        }
    }
}

/// Outcome of resolving one id
pub type ItemOutcome<E> = Result<E, ItemError>;

/// Lifecycle of a [`WorkItem`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkItemState {
    /// Submitted, waiting for a permit
    Pending,
    /// Holding a permit, downstream call in progress
    Admitted,
    /// Outcome recorded
    Completed { succeeded: bool },
}

/// One id's resolution task within a batch
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Position in the caller's id list
    pub index: usize,
    /// Id to resolve
    pub id: String,
    state: WorkItemState,
}

impl WorkItem {
    /// New pending item
    pub fn new(index: usize, id: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
            state: WorkItemState::Pending,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkItemState {
        self.state
    }

    pub(crate) fn admit(&mut self) {
        debug_assert_eq!(self.state, WorkItemState::Pending);
        self.state = WorkItemState::Admitted;
    }

    pub(crate) fn complete(&mut self, succeeded: bool) {
        self.state = WorkItemState::Completed { succeeded };
    }
}

/// Ordered per-item outcomes, one per requested id
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<E> {
    outcomes: Vec<ItemOutcome<E>>,
}

impl<E> BatchResult<E> {
    /// Wrap outcomes already in request order
    pub fn from_outcomes(outcomes: Vec<ItemOutcome<E>>) -> Self {
        Self { outcomes }
    }

    /// Result of an empty request
    pub fn empty() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcome for the id at `index`
    pub fn get(&self, index: usize) -> Option<&ItemOutcome<E>> {
        self.outcomes.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ItemOutcome<E>> {
        self.outcomes.iter()
    }

    /// Number of resolved entries
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    /// Number of failed entries
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Failures with their positions
    pub fn errors(&self) -> Vec<(usize, &ItemError)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().err().map(|e| (i, e)))
            .collect()
    }

    pub fn into_outcomes(self) -> Vec<ItemOutcome<E>> {
        self.outcomes
    }

    /// Entities in request order, `None` where the lookup failed
    pub fn into_entities(self) -> Vec<Option<E>> {
        self.outcomes.into_iter().map(Result::ok).collect()
    }
}

impl<E> IntoIterator for BatchResult<E> {
    type Item = ItemOutcome<E>;
    type IntoIter = std::vec::IntoIter<ItemOutcome<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_mapping() {
        assert_eq!(
            ItemError::from(FetchError::NotFound("7".into())),
            ItemError::ItemNotFound("7".into())
        );
        assert_eq!(
            ItemError::from(FetchError::Malformed("bad".into())).kind(),
            "malformed"
        );
        assert_eq!(
            ItemError::from(PoolError::Timeout(Duration::from_millis(5))),
            ItemError::PoolExhaustedTimeout(Duration::from_millis(5))
        );
        assert!(matches!(
            ItemError::from(PoolError::Closed),
            ItemError::ItemUnavailable(_)
        ));
    }

    #[test]
    fn test_work_item_lifecycle() {
        let mut item = WorkItem::new(2, "abc");
        assert_eq!(item.state(), WorkItemState::Pending);
        item.admit();
        assert_eq!(item.state(), WorkItemState::Admitted);
        item.complete(false);
        assert_eq!(item.state(), WorkItemState::Completed { succeeded: false });
    }

    #[test]
    fn test_batch_result_accessors() {
        let result: BatchResult<u32> = BatchResult::from_outcomes(vec![
            Ok(1),
            Err(ItemError::ItemNotFound("x".into())),
            Ok(3),
        ]);
        assert_eq!(result.len(), 3);
        assert_eq!(result.succeeded(), 2);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.errors()[0].0, 1);
        assert_eq!(result.into_entities(), vec![Some(1), None, Some(3)]);
    }
}
