//! Hostname resolution used by the validator and the secure client.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::ResolverOpts;
use hickory_resolver::TokioResolver;
use thiserror::Error;

/// DNS lookup failure.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ResolveError(pub String);

/// Resolves a hostname to every address it currently maps to.
///
/// The validator and the connection-time hook share one `Resolver`, so the
/// addresses checked are the addresses connected to.
#[async_trait]
pub trait Resolver: Send + Sync + fmt::Debug {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// Resolver backed by the system DNS configuration.
///
/// Answers are never cached between lookups: the rebinding re-check needs to
/// see what DNS says now, not what it said a moment ago.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 1;
        opts.cache_size = 0;

        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| ResolveError(e.to_string()))?
            .with_options(opts)
            .build();

        let response = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| ResolveError(e.to_string()))?;

        Ok(response.iter().collect())
    }
}

/// Resolver that answers from a fixed table.
///
/// Unknown hosts fail to resolve. Meant for tests and for deployments that
/// pin upstream hosts.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        self.hosts
            .insert(host.to_lowercase(), ips.into_iter().collect());
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        self.hosts
            .get(&host.to_lowercase())
            .filter(|ips| !ips.is_empty())
            .cloned()
            .ok_or_else(|| ResolveError(format!("no addresses for {}", host)))
    }
}
