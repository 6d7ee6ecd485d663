//! Runtime configuration.
//!
//! [`SyncConfig`] carries the cache maintenance settings and one [`ResourcePolicy`]
//! per built-in resource. Defaults match the storefront's production values.

use std::time::Duration;

use crate::{
    platform::{DEFAULT_MAINTENANCE_INTERVAL, DEFAULT_MAX_CACHE_SIZE, DEFAULT_UNUSED_THRESHOLD},
    subscription::SubscribeOptions,
};

const MINUTE: Duration = Duration::from_secs(60);

/// TTL, poll interval and stale-fallback behavior for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePolicy {
    pub ttl: Option<Duration>,
    pub poll: Option<Duration>,
    pub allow_stale_on_failure: bool,
}

impl ResourcePolicy {
    pub const fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            poll: None,
            allow_stale_on_failure: false,
        }
    }

    pub const fn with_poll(mut self, interval: Duration) -> Self {
        self.poll = Some(interval);
        self
    }

    pub const fn with_stale_fallback(mut self) -> Self {
        self.allow_stale_on_failure = true;
        self
    }

    /// Subscription options for this policy.
    pub fn options(&self) -> SubscribeOptions {
        let mut options = SubscribeOptions::new(self.ttl);
        if let Some(poll) = self.poll {
            options = options.with_poll(poll);
        }
        if self.allow_stale_on_failure {
            options = options.allow_stale_on_failure();
        }
        options
    }
}

/// Policies for the built-in resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePolicies {
    pub dashboard: ResourcePolicy,
    pub predictions: ResourcePolicy,
    pub product_prediction: ResourcePolicy,
    pub stock_alerts: ResourcePolicy,
    pub cart: ResourcePolicy,
}

impl Default for ResourcePolicies {
    fn default() -> Self {
        Self {
            dashboard: ResourcePolicy::new(Some(15 * MINUTE))
                .with_poll(5 * MINUTE)
                .with_stale_fallback(),
            predictions: ResourcePolicy::new(Some(30 * MINUTE)).with_stale_fallback(),
            product_prediction: ResourcePolicy::new(Some(30 * MINUTE)),
            stock_alerts: ResourcePolicy::new(Some(15 * MINUTE)).with_poll(5 * MINUTE),
            // the cart is revalidated on identity change, not by age
            cart: ResourcePolicy::new(None),
        }
    }
}

/// Configuration for a [`SyncRuntime`](crate::runtime::SyncRuntime).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    maintenance_interval: Option<Duration>,
    max_cache_size: usize,
    unused_threshold: Duration,
    cart_persist_ttl: Duration,
    policies: ResourcePolicies,
}

impl SyncConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self {
            maintenance_interval: Some(DEFAULT_MAINTENANCE_INTERVAL),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            unused_threshold: DEFAULT_UNUSED_THRESHOLD,
            cart_persist_ttl: 5 * MINUTE,
            policies: ResourcePolicies::default(),
        }
    }

    /// Run cache maintenance at this interval.
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = Some(interval);
        self
    }

    /// Disable periodic cache maintenance.
    pub fn without_maintenance(mut self) -> Self {
        self.maintenance_interval = None;
        self
    }

    pub fn with_max_cache_size(mut self, max_size: usize) -> Self {
        self.max_cache_size = max_size;
        self
    }

    pub fn with_unused_threshold(mut self, threshold: Duration) -> Self {
        self.unused_threshold = threshold;
        self
    }

    /// How long the persisted cart copy is trusted on hydration.
    pub fn with_cart_persist_ttl(mut self, ttl: Duration) -> Self {
        self.cart_persist_ttl = ttl;
        self
    }

    pub fn with_policies(mut self, policies: ResourcePolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn maintenance_interval(&self) -> Option<Duration> {
        self.maintenance_interval
    }

    pub fn max_cache_size(&self) -> usize {
        self.max_cache_size
    }

    pub fn unused_threshold(&self) -> Duration {
        self.unused_threshold
    }

    pub fn cart_persist_ttl(&self) -> Duration {
        self.cart_persist_ttl
    }

    pub fn policies(&self) -> &ResourcePolicies {
        &self.policies
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
