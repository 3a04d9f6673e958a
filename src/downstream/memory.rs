//! In-process downstream collaborator
//!
//! Serves entities from a concurrent map and can be told to delay or fail
//! specific ids. Tracks how many lookups are in flight so callers can
//! observe the concurrency a pool actually lets through.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::model::{Keyed, Product, User};
use super::{DownstreamClient, FetchError};

/// Map-backed [`DownstreamClient`]
pub struct InMemoryCatalog<E> {
    name: String,
    entries: DashMap<String, E>,
    latency: DashMap<String, Duration>,
    failures: DashMap<String, FetchError>,
    default_latency: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl<E> std::fmt::Debug for InMemoryCatalog<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCatalog")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}

impl<E> InMemoryCatalog<E>
where
    E: Keyed + Clone + Send + Sync + 'static,
{
    /// Create an empty catalog
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            latency: DashMap::new(),
            failures: DashMap::new(),
            default_latency: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Add entities, keyed by their id
    pub fn with_entities(self, entities: impl IntoIterator<Item = E>) -> Self {
        for entity in entities {
            self.insert(entity);
        }
        self
    }

    /// Add or replace one entity
    pub fn insert(&self, entity: E) {
        self.entries.insert(entity.key().to_string(), entity);
    }

    /// Delay every lookup by `latency` unless an id has its own delay
    pub fn set_default_latency(&self, latency: Duration) {
        *self.default_latency.lock() = latency;
    }

    /// Delay lookups of `id`
    pub fn set_latency(&self, id: impl Into<String>, latency: Duration) {
        self.latency.insert(id.into(), latency);
    }

    /// Make lookups of `id` fail with `error`
    pub fn fail_with(&self, id: impl Into<String>, error: FetchError) {
        self.failures.insert(id.into(), error);
    }

    /// Ids looked up so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Lookups currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of lookups observed running at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn latency_for(&self, id: &str) -> Duration {
        self.latency
            .get(id)
            .map(|l| *l)
            .unwrap_or_else(|| *self.default_latency.lock())
    }
}

impl InMemoryCatalog<User> {
    /// Users catalog seeded with the demo accounts
    pub fn users() -> Self {
        Self::new("users").with_entities(seed_users())
    }
}

impl InMemoryCatalog<Product> {
    /// Products catalog seeded with the demo products
    pub fn products() -> Self {
        Self::new("products").with_entities(seed_products())
    }
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<E> DownstreamClient for InMemoryCatalog<E>
where
    E: Keyed + Clone + Send + Sync + 'static,
{
    type Entity = E;

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_by_id(&self, id: &str) -> Result<E, FetchError> {
        self.calls.lock().push(id.to_string());
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);

        let latency = self.latency_for(id);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.failures.get(id) {
            debug!(catalog = %self.name, id = %id, "Injected lookup failure");
            return Err(error.value().clone());
        }

        self.entries
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FetchError::NotFound(id.to_string()))
    }
}

fn user(id: &str, name: &str) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
    }
}

fn seed_users() -> Vec<User> {
    vec![user("1", "Alice"), user("2", "Bob"), user("3", "Charlie")]
}

fn seed_products() -> Vec<Product> {
    let product = |id: &str, name: &str, description: &str, price: f64, category: &str, owner: User| {
        Product {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            price,
            category: category.to_string(),
            owner,
        }
    };

    vec![
        product("1", "iPhone 15 Pro", "Apple smartphone with A17 Pro chip", 999.99, "Electronics", user("1", "Alice")),
        product("2", "MacBook Air M2", "Apple notebook with M2 chip", 1199.99, "Electronics", user("2", "Bob")),
        product("3", "Nike Air Max", "Nike running shoe", 129.99, "Sports", user("1", "Alice")),
        product("4", "Coffee Maker", "Automatic coffee machine", 89.99, "Home", user("3", "Charlie")),
    ]
}
