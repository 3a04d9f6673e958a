//! # fedgate
//!
//! Bounded-concurrency batch resolution for a federated GraphQL gateway.
//!
//! ## Overview
//!
//! The gateway republishes a users service and a products service. Its
//! batch operations (`usersByIds`, `productsByIds`, `productsWithSemaphore`)
//! resolve lists of ids against those upstreams while:
//!
//! - bounding simultaneous downstream calls with one process-wide permit pool
//! - returning results in request order, one entry per requested id
//! - isolating lookup failures to their own entry
//! - exposing live pool occupancy through `semaphoreStats`
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use fedgate::config::GatewayConfig;
//! use fedgate::downstream::InMemoryCatalog;
//! use fedgate::gateway::Gateway;
//!
//! # async fn example() -> fedgate::Result<()> {
//! let gateway = Gateway::new(
//!     &GatewayConfig::default(),
//!     Arc::new(InMemoryCatalog::users()),
//!     Arc::new(InMemoryCatalog::products()),
//! )?;
//!
//! let users = gateway
//!     .users_by_ids(vec!["2".to_string(), "404".to_string(), "1".to_string()])
//!     .await?;
//! assert_eq!(users.len(), 3);
//! assert!(users[1].is_none());
//!
//! let stats = gateway.semaphore_stats();
//! assert_eq!(stats.max, 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`pool`]: permit pool and occupancy snapshots
//! - [`batch`]: order-preserving fan-out/fan-in over the pool
//! - [`downstream`]: upstream lookup contract and collaborators
//! - [`gateway`]: query surface facade
//! - [`config`], [`metrics`], [`telemetry`]: ambient plumbing

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced at the whole-request level.
///
/// Per-item lookup failures are not represented here; see
/// [`batch::ItemError`].
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The id list exceeds the configured batch limit
    #[error("Batch of {requested} ids exceeds the limit of {limit}")]
    BatchTooLarge {
        /// Ids in the request
        requested: usize,
        /// Configured limit
        limit: usize,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Tracing subscriber could not be installed
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

/// Order-preserving batch resolution
pub mod batch;

/// Gateway configuration
pub mod config;

/// Downstream lookup collaborators
pub mod downstream;

/// Query surface facade
pub mod gateway;

/// Prometheus metrics
pub mod metrics;

/// Bounded executor permit pool
pub mod pool;

/// Logging bootstrap
pub mod telemetry;
