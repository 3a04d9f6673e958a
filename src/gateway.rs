//! Query surface
//!
//! [`Gateway`] owns the process-wide [`PermitPool`] and exposes the batch
//! operations callers see: `usersByIds`, `productsByIds`,
//! `productsWithSemaphore` and `semaphoreStats`. Every batch operation
//! returns one entry per requested id, `None` where the lookup failed.
//!
//! `products_with_semaphore` and `users_by_ids` dispatch one bounded
//! lookup per id. `products_by_ids` forwards a single combined upstream
//! request, which itself holds one permit from the same pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::batch::{BatchCoordinator, ItemError};
use crate::config::GatewayConfig;
use crate::downstream::{
    DownstreamClient, FetchError, GraphQlClient, Product, ProductsClient, User, UsersClient,
};
use crate::metrics;
use crate::pool::{PermitPool, PoolStats};
use crate::Result;

/// Name reported by the health check
pub const SERVICE_NAME: &str = "fedgate";

/// Health check payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Always `healthy` while the process can answer
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub version: String,
    /// Pool occupancy at the time of the check
    pub semaphore: PoolStats,
}

impl HealthReport {
    /// Render as a JSON document
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Batch query facade over the users and products upstreams
pub struct Gateway<U, P>
where
    U: DownstreamClient<Entity = User>,
    P: DownstreamClient<Entity = Product>,
{
    pool: PermitPool,
    users: BatchCoordinator<U>,
    products: BatchCoordinator<P>,
    acquire_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
}

impl Gateway<UsersClient, ProductsClient> {
    /// Build a gateway talking GraphQL over HTTP to the configured upstreams.
    pub fn connect(config: &GatewayConfig) -> Result<Self> {
        let users = UsersClient::new(GraphQlClient::new(
            config.users_service_url.clone(),
            config.call_timeout,
        )?);
        let products = ProductsClient::new(GraphQlClient::new(
            config.products_service_url.clone(),
            config.call_timeout,
        )?);
        Self::new(config, Arc::new(users), Arc::new(products))
    }
}

impl<U, P> Gateway<U, P>
where
    U: DownstreamClient<Entity = User>,
    P: DownstreamClient<Entity = Product>,
{
    /// Build a gateway over arbitrary collaborators. Creates the shared pool.
    pub fn new(config: &GatewayConfig, users: Arc<U>, products: Arc<P>) -> Result<Self> {
        config.validate()?;

        let pool = PermitPool::new("gateway", config.max_concurrent);
        info!(
            semaphore_max = pool.capacity(),
            acquire_timeout = ?config.acquire_timeout,
            call_timeout = ?config.call_timeout,
            max_batch_size = config.max_batch_size,
            "Gateway initialised with shared permit pool"
        );

        Ok(Self {
            users: BatchCoordinator::new("users_by_ids", pool.clone(), users).configured(config),
            products: BatchCoordinator::new("products_with_semaphore", pool.clone(), products)
                .configured(config),
            pool,
            acquire_timeout: config.acquire_timeout,
            call_timeout: config.call_timeout,
        })
    }

    /// Shared permit pool
    pub fn pool(&self) -> &PermitPool {
        &self.pool
    }

    /// Coordinator behind `users_by_ids`
    pub fn users(&self) -> &BatchCoordinator<U> {
        &self.users
    }

    /// Coordinator behind `products_with_semaphore`
    pub fn products(&self) -> &BatchCoordinator<P> {
        &self.products
    }

    /// `usersByIds(ids)`
    pub async fn users_by_ids(&self, ids: Vec<String>) -> Result<Vec<Option<User>>> {
        Ok(self.users.resolve_batch(ids).await?.into_entities())
    }

    /// `productsWithSemaphore(ids)`
    pub async fn products_with_semaphore(&self, ids: Vec<String>) -> Result<Vec<Option<Product>>> {
        Ok(self.products.resolve_batch(ids).await?.into_entities())
    }

    /// `productsByIds(ids)`: one combined upstream request under one permit.
    ///
    /// If the combined request fails every entry is `None`.
    #[instrument(skip(self, ids), fields(batch_size = ids.len()))]
    pub async fn products_by_ids(&self, ids: Vec<String>) -> Result<Vec<Option<Product>>> {
        const OPERATION: &str = "products_by_ids";

        self.products.validate(&ids)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let outcomes = self.fetch_products_combined(&ids).await;

        let results: Vec<Option<Product>> = match outcomes {
            Ok(entries) => entries
                .into_iter()
                .map(|entry| {
                    entry
                        .map_err(|e| metrics::record_item_error(OPERATION, e.kind()))
                        .ok()
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Combined products lookup failed");
                for _ in &ids {
                    metrics::record_item_error(OPERATION, e.kind());
                }
                vec![None; ids.len()]
            }
        };

        metrics::record_batch(OPERATION, ids.len(), start.elapsed().as_secs_f64());
        Ok(results)
    }

    async fn fetch_products_combined(
        &self,
        ids: &[String],
    ) -> std::result::Result<Vec<std::result::Result<Product, FetchError>>, ItemError> {
        let permit = self.pool.acquire_within(self.acquire_timeout).await?;

        let client = self.products.client();
        let fetched = match self.call_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, client.fetch_by_ids(ids)).await {
                Ok(fetched) => fetched,
                Err(_) => Err(FetchError::Unavailable(format!(
                    "combined lookup timed out after {timeout:?}"
                ))),
            },
            None => client.fetch_by_ids(ids).await,
        };
        permit.release();

        let entries = fetched?;
        if entries.len() != ids.len() {
            return Err(ItemError::ItemMalformed(format!(
                "expected {} entries, upstream returned {}",
                ids.len(),
                entries.len()
            )));
        }
        Ok(entries)
    }

    /// `semaphoreStats()`
    pub fn semaphore_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Liveness report including pool occupancy
    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            service: SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            semaphore: self.semaphore_stats(),
        }
    }

    /// Stop admitting new work. In-flight lookups finish and release.
    pub fn shutdown(&self) {
        info!(stats = ?self.pool.stats(), "Gateway shutting down");
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::InMemoryCatalog;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn gateway() -> Gateway<InMemoryCatalog<User>, InMemoryCatalog<Product>> {
        Gateway::new(
            &GatewayConfig::default(),
            Arc::new(InMemoryCatalog::users()),
            Arc::new(InMemoryCatalog::products()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_users_by_ids_nulls_missing() {
        let gateway = gateway();
        let users = gateway.users_by_ids(ids(&["2", "99", "1"])).await.unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0].as_ref().unwrap().name, "Bob");
        assert!(users[1].is_none());
        assert_eq!(users[2].as_ref().unwrap().name, "Alice");
    }

    #[tokio::test]
    async fn test_products_by_ids_single_upstream_call() {
        let gateway = gateway();
        let products = gateway.products_by_ids(ids(&["4", "1", "4"])).await.unwrap();
        let names: Vec<&str> = products
            .iter()
            .map(|p| p.as_ref().unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["Coffee Maker", "iPhone 15 Pro", "Coffee Maker"]);
        assert_eq!(gateway.semaphore_stats().current, 0);
    }

    #[tokio::test]
    async fn test_products_by_ids_pool_timeout_nulls_everything() {
        let config = GatewayConfig::default()
            .with_max_concurrent(1)
            .with_acquire_timeout(Duration::from_millis(20));
        let gateway = Gateway::new(
            &config,
            Arc::new(InMemoryCatalog::users()),
            Arc::new(InMemoryCatalog::products()),
        )
        .unwrap();

        let held = gateway.pool().try_acquire().unwrap();
        let products = gateway.products_by_ids(ids(&["1", "2"])).await.unwrap();
        assert_eq!(products, vec![None, None]);
        held.release();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Gateway::new(
            &GatewayConfig::default().with_max_concurrent(0),
            Arc::new(InMemoryCatalog::users()),
            Arc::new(InMemoryCatalog::products()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_health_report() {
        let report = gateway().health();
        assert_eq!(report.status, "healthy");
        assert_eq!(report.service, SERVICE_NAME);
        assert_eq!(report.semaphore, PoolStats::new(3, 0));
        assert!(report.to_json().unwrap().contains("\"status\":\"healthy\""));
    }

    #[tokio::test]
    async fn test_shutdown_fails_new_lookups() {
        let gateway = gateway();
        gateway.shutdown();
        let users = gateway.users_by_ids(ids(&["1"])).await.unwrap();
        assert_eq!(users, vec![None]);
    }
}
