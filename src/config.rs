//! Validator configuration and builder.
//!
//! [`ValidatorConfig`] is plain data and can be deserialized from an
//! application config file. [`ValidatorBuilder`] layers the things that must
//! not come from a file on top: the resolver and testing mode.
//!
//! ## Immutability
//!
//! Once built, a [`Validator`] cannot be modified. The builder consumes `self`
//! on each method call, and testing mode can only be chosen here.

use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::blocklist::{DEFAULT_ALLOWED_PORTS, DEFAULT_INTERNAL_DOMAINS, DEFAULT_METADATA_ENDPOINTS};
use crate::confusables::ConfusableTable;
use crate::resolve::{Resolver, SystemResolver};
use crate::validate::Validator;

/// Tunable policy and transport settings.
///
/// Every field has a default, so a config file only needs the overrides:
///
/// ```rust
/// use ssrf_guard::ValidatorConfig;
///
/// let config: ValidatorConfig = serde_json::from_str(r#"{
///     "allowed_ports": [443],
///     "blocked_cidrs": ["100.64.0.0/10"]
/// }"#).unwrap();
///
/// assert_eq!(config.allowed_ports, vec![443]);
/// assert_eq!(config.dns_timeout_ms, 5000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Metadata hosts, exact or as `host:` prefix.
    pub metadata_endpoints: Vec<String>,
    /// Hostname suffixes that are never fetched.
    pub internal_domains: Vec<String>,
    /// Ports a URL may name explicitly.
    pub allowed_ports: Vec<u16>,
    /// Extra ranges treated like private addresses.
    pub blocked_cidrs: Vec<IpNet>,
    /// Replaces the built-in look-alike table.
    pub confusables: ConfusableTable,
    pub dns_timeout_ms: u64,
    /// Pause before re-resolving a suspicious hostname.
    pub rebind_recheck_delay_ms: u64,
    pub max_redirects: u8,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub pool_max_idle_per_host: usize,
    pub tcp_keepalive_secs: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            metadata_endpoints: DEFAULT_METADATA_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            internal_domains: DEFAULT_INTERNAL_DOMAINS.iter().map(|s| s.to_string()).collect(),
            allowed_ports: DEFAULT_ALLOWED_PORTS.to_vec(),
            blocked_cidrs: Vec::new(),
            confusables: ConfusableTable::default(),
            dns_timeout_ms: 5_000,
            rebind_recheck_delay_ms: 100,
            max_redirects: 10,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            pool_max_idle_per_host: 10,
            tcp_keepalive_secs: 30,
        }
    }
}

impl ValidatorConfig {
    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub fn rebind_recheck_delay(&self) -> Duration {
        Duration::from_millis(self.rebind_recheck_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive_secs)
    }
}

/// Builder for [`Validator`].
///
/// ```rust
/// use ssrf_guard::ValidatorBuilder;
///
/// let validator = ValidatorBuilder::new()
///     .internal_domain(".svc")
///     .block_cidr("100.64.0.0/10")
///     .build();
/// assert!(!validator.is_testing_mode());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ValidatorBuilder {
    config: ValidatorConfig,
    resolver: Option<Arc<dyn Resolver>>,
    testing_mode: bool,
}

impl ValidatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: ValidatorConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Block another metadata host (exact match or `host:` prefix).
    pub fn metadata_endpoint(mut self, host: &str) -> Self {
        self.config.metadata_endpoints.push(host.to_lowercase());
        self
    }

    /// Block another internal suffix, e.g. `.svc`.
    pub fn internal_domain(mut self, suffix: &str) -> Self {
        self.config.internal_domains.push(suffix.to_lowercase());
        self
    }

    pub fn allow_port(mut self, port: u16) -> Self {
        if !self.config.allowed_ports.contains(&port) {
            self.config.allowed_ports.push(port);
        }
        self
    }

    /// Treat an IP range (CIDR notation) like a private range.
    ///
    /// Unparseable ranges are ignored.
    pub fn block_cidr(mut self, cidr: &str) -> Self {
        if let Ok(net) = cidr.parse() {
            self.config.blocked_cidrs.push(net);
        }
        self
    }

    pub fn confusables(mut self, table: ConfusableTable) -> Self {
        self.config.confusables = table;
        self
    }

    pub fn dns_timeout(mut self, timeout: Duration) -> Self {
        self.config.dns_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn rebind_recheck_delay(mut self, delay: Duration) -> Self {
        self.config.rebind_recheck_delay_ms = saturating_millis(delay);
        self
    }

    pub fn max_redirects(mut self, max: u8) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Use a custom resolver instead of the system one.
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Let `localhost` and `127.x.x.x` through the loopback, punycode and
    /// port checks. For test harnesses only.
    pub fn testing_mode(mut self, enabled: bool) -> Self {
        self.testing_mode = enabled;
        self
    }

    pub fn build(self) -> Validator {
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(SystemResolver::new(self.config.dns_timeout())));
        Validator::from_parts(self.config, resolver, self.testing_mode)
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
