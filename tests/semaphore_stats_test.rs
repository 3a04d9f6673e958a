//! Gateway query surface tests
//!
//! Exercises the public batch operations and `semaphoreStats` over the
//! seeded in-memory upstreams.

use std::sync::Arc;
use std::time::Duration;

use fedgate::config::GatewayConfig;
use fedgate::downstream::{FetchError, InMemoryCatalog, Product, User};
use fedgate::gateway::Gateway;
use fedgate::pool::PoolStats;
use fedgate::GatewayError;
use pretty_assertions::assert_eq;

type TestGateway = Gateway<InMemoryCatalog<User>, InMemoryCatalog<Product>>;

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

fn gateway_with(config: GatewayConfig) -> (TestGateway, Arc<InMemoryCatalog<User>>, Arc<InMemoryCatalog<Product>>) {
    let users = Arc::new(InMemoryCatalog::users());
    let products = Arc::new(InMemoryCatalog::products());
    let gateway = Gateway::new(&config, users.clone(), products.clone()).expect("valid config");
    (gateway, users, products)
}

#[tokio::test]
async fn test_stats_with_two_busy_permits() {
    let (gateway, _, _) = gateway_with(GatewayConfig::default());

    let _a = gateway.pool().acquire().await.unwrap();
    let _b = gateway.pool().acquire().await.unwrap();

    assert_eq!(
        gateway.semaphore_stats(),
        PoolStats {
            max: 3,
            current: 2,
            available: 1,
            usage: 67
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_stats_observed_during_batch() {
    let (gateway, _, products) = gateway_with(GatewayConfig::default());
    products.set_default_latency(Duration::from_millis(100));
    let gateway = Arc::new(gateway);

    let running = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.products_with_semaphore(ids(&["1", "2"])).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    let during = gateway.semaphore_stats();
    assert_eq!(during.current, 2);
    assert_eq!(during.usage, 67);

    let products = running.await.unwrap().unwrap();
    assert_eq!(products.len(), 2);
    assert_eq!(gateway.semaphore_stats(), PoolStats::new(3, 0));
}

#[tokio::test(start_paused = true)]
async fn test_stats_never_exceed_capacity_under_load() {
    let (gateway, users, _) = gateway_with(GatewayConfig::default());
    users.set_default_latency(Duration::from_millis(15));
    let gateway = Arc::new(gateway);

    let batches: Vec<_> = (0..4)
        .map(|_| {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.users_by_ids(ids(&["1", "2", "3", "4", "1"])).await })
        })
        .collect();

    for _ in 0..20 {
        let stats = gateway.semaphore_stats();
        assert!(stats.current <= stats.max, "stats exceeded capacity: {stats:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for batch in batches {
        let users = batch.await.unwrap().unwrap();
        assert_eq!(users.len(), 5);
        assert!(users[3].is_none());
    }
    assert_eq!(users.peak_in_flight(), 3);
}

#[tokio::test]
async fn test_empty_request_leaves_stats_unchanged() {
    let (gateway, users, _) = gateway_with(GatewayConfig::default());
    let before = gateway.semaphore_stats();

    assert!(gateway.users_by_ids(Vec::new()).await.unwrap().is_empty());
    assert!(gateway.products_by_ids(Vec::new()).await.unwrap().is_empty());
    assert!(gateway.products_with_semaphore(Vec::new()).await.unwrap().is_empty());

    assert_eq!(gateway.semaphore_stats(), before);
    assert!(users.calls().is_empty());
}

#[tokio::test]
async fn test_products_paths_agree() {
    let (gateway, _, products) = gateway_with(GatewayConfig::default());
    products.fail_with("3", FetchError::Unavailable("upstream restarting".into()));
    let request = ids(&["3", "2", "9", "2"]);

    let per_item = gateway.products_with_semaphore(request.clone()).await.unwrap();
    let combined = gateway.products_by_ids(request).await.unwrap();

    assert_eq!(per_item, combined);
    assert!(per_item[0].is_none());
    assert_eq!(per_item[1].as_ref().unwrap().name, "MacBook Air M2");
    assert!(per_item[2].is_none());
    assert_eq!(per_item[3].as_ref().unwrap().owner.name, "Bob");
}

#[tokio::test]
async fn test_oversized_request_is_rejected() {
    let (gateway, users, _) = gateway_with(GatewayConfig::default().with_max_batch_size(2));

    let err = gateway.users_by_ids(ids(&["1", "2", "3"])).await.unwrap_err();
    assert!(matches!(err, GatewayError::BatchTooLarge { requested: 3, limit: 2 }));

    let err = gateway.products_by_ids(ids(&["1", "2", "3"])).await.unwrap_err();
    assert!(matches!(err, GatewayError::BatchTooLarge { .. }));

    assert!(users.calls().is_empty());
}

#[tokio::test]
async fn test_health_reports_pool() {
    let (gateway, _, _) = gateway_with(GatewayConfig::default().with_max_concurrent(5));
    let _held = gateway.pool().try_acquire().unwrap();

    let health = serde_json::to_value(gateway.health()).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(
        health["semaphore"],
        serde_json::json!({"max": 5, "current": 1, "available": 4, "usage": 20})
    );
}
