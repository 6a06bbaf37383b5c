//! Shared state reachable from every handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use broker_config::{BrokerLimits, CacheSettings, Config, SocketEndpoint};

use crate::cache::ConnectionCache;
use crate::dispatch::HandlerTable;
use crate::governor::{ResourceGovernor, ResourceLimits, ResourceSampler};
use crate::process::ShutdownTrigger;
use crate::registry::HandleRegistry;
use crate::security::{GateLimits, SecurityGate};

/// Broker-owned state: the registry, the cache, the governor and the gate.
///
/// Built once at startup and shared as an `Arc`; there are no globals.
#[derive(Debug)]
pub struct BrokerServices {
    registry: Arc<HandleRegistry>,
    cache: ConnectionCache,
    governor: ResourceGovernor,
    security: SecurityGate,
    shutdown: ShutdownTrigger,
    started_at: Instant,
    endpoint: SocketEndpoint,
    limits: BrokerLimits,
    cache_settings: CacheSettings,
    modules: Vec<String>,
}

impl BrokerServices {
    /// Builds the services for `config`. The security gate admits exactly
    /// the functions registered in `table`.
    #[must_use]
    pub fn new(
        config: &Config,
        table: &HandlerTable,
        sampler: Box<dyn ResourceSampler>,
        shutdown: ShutdownTrigger,
    ) -> Self {
        let limits = config.limits();
        let cache_settings = config.cache_settings();
        let registry = Arc::new(HandleRegistry::new());
        Self {
            cache: ConnectionCache::new(Arc::clone(&registry), cache_settings.ttl),
            registry,
            governor: ResourceGovernor::new(ResourceLimits::from(&limits), sampler),
            security: SecurityGate::new(table.whitelist(), GateLimits::default()),
            shutdown,
            started_at: Instant::now(),
            endpoint: config.daemon_socket().clone(),
            limits,
            cache_settings,
            modules: table.module_names(),
        }
    }

    /// Handle registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    /// Connection cache.
    #[must_use]
    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Admission control.
    #[must_use]
    pub fn governor(&self) -> &ResourceGovernor {
        &self.governor
    }

    /// Pre-dispatch validation.
    #[must_use]
    pub fn security(&self) -> &SecurityGate {
        &self.security
    }

    /// Trigger that starts graceful shutdown.
    #[must_use]
    pub fn shutdown(&self) -> &ShutdownTrigger {
        &self.shutdown
    }

    /// Time since the services were built.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Endpoint the broker serves.
    #[must_use]
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Configured limits.
    #[must_use]
    pub fn limits(&self) -> &BrokerLimits {
        &self.limits
    }

    /// Connection cache settings.
    #[must_use]
    pub fn cache_settings(&self) -> CacheSettings {
        self.cache_settings
    }

    /// Registered handler modules, sorted.
    #[must_use]
    pub fn modules(&self) -> &[String] {
        &self.modules
    }
}
