//! Downstream lookup collaborators
//!
//! The batch path depends only on [`DownstreamClient::fetch_by_id`].
//! Network-level batching through [`DownstreamClient::fetch_by_ids`] is
//! an optional optimisation a collaborator may offer. Collaborators own
//! their retry policy; the batch path never retries.

pub mod graphql;
pub mod memory;
pub mod model;

pub use graphql::{GraphQlClient, ProductsClient, UsersClient};
pub use memory::InMemoryCatalog;
pub use model::{Keyed, Product, User};

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure of a single downstream lookup
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchError {
    /// The upstream has no entity with this id
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Transport failure, non-success status or timeout
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// Response did not have the expected shape
    #[error("Malformed upstream response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::NotFound(_) => "not_found",
            FetchError::Unavailable(_) => "unavailable",
            FetchError::Malformed(_) => "malformed",
        }
    }
}

/// Lookup-by-id against one named upstream service
#[async_trait]
pub trait DownstreamClient: Send + Sync + 'static {
    /// Entity type this upstream resolves
    type Entity: Keyed + Clone + Send + Sync + 'static;

    /// Upstream name, used in logs and metrics
    fn name(&self) -> &str;

    /// Resolve a single id
    async fn fetch_by_id(&self, id: &str) -> Result<Self::Entity, FetchError>;

    /// Resolve several ids, one entry per input id in input order.
    ///
    /// The outer error means the whole call failed. The default
    /// implementation looks ids up one at a time.
    async fn fetch_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<Result<Self::Entity, FetchError>>, FetchError> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.fetch_by_id(id).await);
        }
        Ok(results)
    }
}

/// Line up an unordered set of fetched entities with the requested ids.
///
/// Ids with no matching entity become [`FetchError::NotFound`]; repeated
/// ids each receive their own copy.
pub fn align_by_id<E>(ids: &[String], found: Vec<E>) -> Vec<Result<E, FetchError>>
where
    E: Keyed + Clone,
{
    let by_id: HashMap<String, E> = found
        .into_iter()
        .map(|entity| (entity.key().to_string(), entity))
        .collect();

    ids.iter()
        .map(|id| {
            by_id
                .get(id)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(id.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            name: format!("user-{id}"),
            email: format!("{id}@example.com"),
        }
    }

    #[test]
    fn test_align_by_id_preserves_request_order() {
        let ids: Vec<String> = ["3", "1", "9", "1"].iter().map(|s| s.to_string()).collect();
        let aligned = align_by_id(&ids, vec![user("1"), user("3")]);

        assert_eq!(aligned.len(), 4);
        assert_eq!(aligned[0].as_ref().unwrap().id, "3");
        assert_eq!(aligned[1].as_ref().unwrap().id, "1");
        assert_eq!(aligned[2], Err(FetchError::NotFound("9".to_string())));
        assert_eq!(aligned[3].as_ref().unwrap().id, "1");
    }

    #[test]
    fn test_fetch_error_kind() {
        assert_eq!(FetchError::NotFound("1".into()).kind(), "not_found");
        assert_eq!(FetchError::Unavailable("x".into()).kind(), "unavailable");
        assert_eq!(FetchError::Malformed("x".into()).kind(), "malformed");
    }
}
