//! Gateway configuration
//!
//! Values are read once at process start. Pool capacity in particular is
//! fixed for the lifetime of the process; changing it requires a restart.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{GatewayError, Result};

/// Default number of concurrent downstream lookups
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default upper bound on ids accepted by one batch call
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Default per-call downstream timeout
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration consumed by the gateway core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GatewayConfig {
    /// Permit pool capacity shared by every bounded call
    pub max_concurrent: usize,
    /// Longest a unit of work may wait for a permit (`None` waits forever)
    pub acquire_timeout: Option<Duration>,
    /// Timeout applied to each downstream lookup
    pub call_timeout: Option<Duration>,
    /// Largest id list a batch call accepts
    pub max_batch_size: usize,
    /// GraphQL endpoint of the users service
    pub users_service_url: String,
    /// GraphQL endpoint of the products service
    pub products_service_url: String,
    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            acquire_timeout: None,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            users_service_url: "http://localhost:8081/query".to_string(),
            products_service_url: "http://localhost:8082/query".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        Self {
            max_concurrent: lookup("GATEWAY_MAX_CONCURRENT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_concurrent),
            acquire_timeout: millis("GATEWAY_ACQUIRE_TIMEOUT_MS").or(defaults.acquire_timeout),
            call_timeout: millis("GATEWAY_CALL_TIMEOUT_MS").or(defaults.call_timeout),
            max_batch_size: lookup("GATEWAY_MAX_BATCH_SIZE")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_batch_size),
            users_service_url: lookup("USERS_SERVICE_URL").unwrap_or(defaults.users_service_url),
            products_service_url: lookup("PRODUCTS_SERVICE_URL")
                .unwrap_or(defaults.products_service_url),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// Set the permit pool capacity
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the permit wait timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Set the downstream call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Set the maximum batch size
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(GatewayError::Config("max_concurrent must be > 0".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(GatewayError::Config("max_batch_size must be > 0".to_string()));
        }
        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err(GatewayError::Config("acquire_timeout must be > 0".to_string()));
        }
        if self.call_timeout == Some(Duration::ZERO) {
            return Err(GatewayError::Config("call_timeout must be > 0".to_string()));
        }
        if self.users_service_url.is_empty() || self.products_service_url.is_empty() {
            return Err(GatewayError::Config("service urls cannot be empty".to_string()));
        }
        Ok(())
    }
}
