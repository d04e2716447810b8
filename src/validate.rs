//! URL and connection validation.

use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::blocklist::{
    is_loopback_literal, is_metadata_endpoint_ip, is_private_or_dangerous, is_suspicious_domain,
    matching_internal_domain, matching_metadata_endpoint,
};
use crate::config::{ValidatorBuilder, ValidatorConfig};
use crate::confusables::has_mixed_scripts;
use crate::error::{ErrorKind, ValidationError};
use crate::resolve::Resolver;
use crate::target::TargetUrl;

/// Percent-encoded sequences that smuggle separators, dots or control bytes.
const ENCODED_ATTACK_PATTERNS: &[&str] = &[
    "%00", "%0a", "%0A", "%0d", "%0D", "%2e", "%2E", "%2f", "%2F", "%5c", "%5C",
];

/// Substrings of a punycoded host that point at loopback or private space.
const PRIVATE_HINTS: &[&str] = &["localhost", "127.", "10.", "192.168.", "172."];

/// Decides whether a URL or a connection target is safe to use.
///
/// Checks run in this order and stop at the first failure:
///
/// 1. Structure (host present)
/// 2. Scheme (http/https only)
/// 3. Host against metadata endpoints and internal suffixes
/// 4. Path against encoded attacks and traversal
/// 5. Explicit port against the allowed set
/// 6. Punycode, mixed-script and confusable-character checks
/// 7. DNS resolution, private-address check and, for suspicious hosts, a
///    delayed second lookup that must give the same answer
///
/// A `Validator` is immutable once built and can be shared across tasks.
///
/// # Example
///
/// ```rust,no_run
/// use ssrf_guard::{ErrorKind, Validator};
///
/// # async fn example() {
/// let validator = Validator::new();
///
/// let err = validator
///     .validate_str("http://169.254.169.254/latest/meta-data/")
///     .await
///     .unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::MetadataEndpointBlocked);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidatorConfig,
    allowed_ports: HashSet<String>,
    resolver: Arc<dyn Resolver>,
    allow_testing_localhost: bool,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// A validator with the default policy and the system resolver.
    pub fn new() -> Self {
        ValidatorBuilder::new().build()
    }

    pub fn builder() -> ValidatorBuilder {
        ValidatorBuilder::new()
    }

    /// A validator that lets `localhost` and `127.x.x.x` through.
    ///
    /// Never use this outside tests.
    pub fn for_testing() -> Self {
        ValidatorBuilder::new().testing_mode(true).build()
    }

    pub(crate) fn from_parts(
        config: ValidatorConfig,
        resolver: Arc<dyn Resolver>,
        allow_testing_localhost: bool,
    ) -> Self {
        if allow_testing_localhost {
            warn!("validator built in testing mode: loopback targets are allowed");
        }
        let allowed_ports = config.allowed_ports.iter().map(u16::to_string).collect();
        Self {
            config,
            allowed_ports,
            resolver,
            allow_testing_localhost,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn is_testing_mode(&self) -> bool {
        self.allow_testing_localhost
    }

    /// Run every pre-flight check on `url`.
    ///
    /// Dropping the returned future cancels any DNS lookup in flight.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as a [`ValidationError`]. Lookup
    /// failures and timeouts are errors too: nothing unresolvable is allowed.
    pub async fn validate_url(&self, url: &TargetUrl) -> Result<(), ValidationError> {
        let result = self.run_checks(url).await;
        match &result {
            Ok(()) => debug!(host = url.host(), "URL passed validation"),
            Err(e) => warn!(
                kind = %e.kind(),
                host = url.host(),
                reason = e.message(),
                "URL rejected"
            ),
        }
        result
    }

    /// Parse `input` and validate it, returning the parsed URL on success.
    pub async fn validate_str(&self, input: &str) -> Result<TargetUrl, ValidationError> {
        let url = TargetUrl::parse(input).inspect_err(|e| {
            warn!(kind = %e.kind(), reason = e.message(), "URL rejected");
        })?;
        self.validate_url(&url).await?;
        Ok(url)
    }

    /// Synchronous version of [`validate_url`](Self::validate_url).
    ///
    /// This blocks the current thread while performing DNS resolution.
    /// Prefer the async version when possible.
    ///
    /// Inside a multi-threaded Tokio runtime the current worker blocks in
    /// place. Elsewhere, including inside a current-thread runtime, the
    /// checks run on a temporary runtime on a scoped thread.
    pub fn validate_sync(&self, url: &TargetUrl) -> Result<(), ValidationError> {
        use tokio::runtime::{Handle, RuntimeFlavor};

        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(self.validate_url(url)))
            }
            Ok(_) => std::thread::scope(|s| {
                s.spawn(|| self.validate_on_temporary_runtime(url))
                    .join()
                    .unwrap_or_else(|_| {
                        Err(ValidationError::new(
                            ErrorKind::DnsResolutionError,
                            "validation thread panicked",
                        ))
                    })
            }),
            Err(_) => self.validate_on_temporary_runtime(url),
        }
    }

    fn validate_on_temporary_runtime(&self, url: &TargetUrl) -> Result<(), ValidationError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                ValidationError::new(
                    ErrorKind::DnsResolutionError,
                    format!("failed to start resolver runtime: {}", e),
                )
            })?;
        rt.block_on(self.validate_url(url))
    }

    async fn run_checks(&self, url: &TargetUrl) -> Result<(), ValidationError> {
        let host = url.host();
        if host.is_empty() {
            return Err(ValidationError::new(
                ErrorKind::BasicValidationError,
                "URL must have a host",
            ));
        }

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ValidationError::new(
                    ErrorKind::SchemeValidationError,
                    format!("scheme '{}' not allowed, only http/https", scheme),
                )
                .with_detail("scheme", scheme));
            }
        }

        self.check_host(host)?;
        check_path(url)?;
        self.check_port(url)?;
        let lookup_host = self.check_unicode(host)?;
        self.check_dns_rebinding(host, &lookup_host).await
    }

    fn check_host(&self, host: &str) -> Result<(), ValidationError> {
        if let Some(endpoint) = matching_metadata_endpoint(host, &self.config.metadata_endpoints) {
            return Err(ValidationError::new(
                ErrorKind::MetadataEndpointBlocked,
                format!("host {} is a cloud metadata endpoint", host),
            )
            .with_detail("host", host)
            .with_detail("endpoint", endpoint));
        }

        if let Some(suffix) = matching_internal_domain(host, &self.config.internal_domains) {
            return Err(ValidationError::new(
                ErrorKind::InternalDomainBlocked,
                format!("host {} is an internal domain", host),
            )
            .with_detail("host", host)
            .with_detail("suffix", suffix));
        }

        Ok(())
    }

    fn check_port(&self, url: &TargetUrl) -> Result<(), ValidationError> {
        if self.is_testing_loopback_host(url.host()) {
            return Ok(());
        }
        match url.port() {
            Some(port) if !self.allowed_ports.contains(port) => Err(port_blocked(port)),
            _ => Ok(()),
        }
    }

    /// Punycode, mixed-script and confusable checks.
    ///
    /// Returns the ASCII form of the host, which is what gets resolved.
    fn check_unicode(&self, host: &str) -> Result<String, ValidationError> {
        let mut ascii = host.to_string();

        // IP literals are plain ASCII and not domain names.
        if host.parse::<IpAddr>().is_err() {
            ascii = idna::domain_to_ascii(host).map_err(|e| {
                ValidationError::new(
                    ErrorKind::PunycodeValidationError,
                    format!("host {} cannot be converted to ASCII: {}", host, e),
                )
                .with_detail("host", host)
            })?;

            if ascii != host {
                if !self.is_testing_loopback_host(host)
                    && PRIVATE_HINTS.iter().any(|hint| ascii.contains(hint))
                {
                    return Err(ValidationError::new(
                        ErrorKind::PunycodeBypassBlocked,
                        format!("host {} encodes a private target as {}", host, ascii),
                    )
                    .with_detail("host", host)
                    .with_detail("ascii", ascii.as_str()));
                }
                // The mapped form may spell a blocked name, e.g. in fullwidth letters.
                self.check_host(&ascii)?;
            }
        }

        if has_mixed_scripts(host) {
            return Err(ValidationError::new(
                ErrorKind::MixedScriptBlocked,
                format!("host {} mixes scripts", host),
            )
            .with_detail("host", host));
        }

        if self.config.confusables.contains_confusable(host) {
            return Err(ValidationError::new(
                ErrorKind::UnicodeBypassBlocked,
                format!("host {} contains look-alike characters", host),
            )
            .with_detail("host", host));
        }

        Ok(ascii)
    }

    async fn check_dns_rebinding(&self, host: &str, lookup_host: &str) -> Result<(), ValidationError> {
        let first = self.resolve(lookup_host).await?;
        let exempt = self.is_testing_loopback_host(host);

        for ip in &first {
            if exempt && ip.to_canonical().is_loopback() {
                continue;
            }
            if self.is_blocked_ip(*ip) {
                return Err(ValidationError::new(
                    ErrorKind::DnsRebindingBlocked,
                    format!("host {} resolves to private address {}", host, ip),
                )
                .with_detail("host", host)
                .with_detail("ip", ip.to_string()));
            }
        }

        if is_suspicious_domain(host) {
            tokio::time::sleep(self.config.rebind_recheck_delay()).await;
            let second = self.resolve(lookup_host).await?;

            let first: BTreeSet<IpAddr> = first.into_iter().collect();
            let second: BTreeSet<IpAddr> = second.into_iter().collect();
            if first != second {
                info!(host, ?first, ?second, "DNS answer changed between lookups");
                return Err(ValidationError::new(
                    ErrorKind::ToctouAttackBlocked,
                    format!("DNS answer for {} changed between lookups", host),
                )
                .with_detail("host", host)
                .with_detail("first", ip_list(&first))
                .with_detail("second", ip_list(&second)));
            }
        }

        Ok(())
    }

    /// Resolve `host` within the configured timeout. IP literals resolve to themselves.
    pub(crate) async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ValidationError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let timeout = self.config.dns_timeout();
        let dns_error = |reason: String| {
            ValidationError::new(
                ErrorKind::DnsResolutionError,
                format!("DNS lookup for {} failed: {}", host, reason),
            )
            .with_detail("host", host)
        };

        match tokio::time::timeout(timeout, self.resolver.lookup_ip(host)).await {
            Ok(Ok(ips)) if !ips.is_empty() => {
                debug!(host, count = ips.len(), "resolved host");
                Ok(ips)
            }
            Ok(Ok(_)) => Err(dns_error("no addresses returned".to_string())),
            Ok(Err(e)) => Err(dns_error(e.to_string())),
            Err(_) => Err(dns_error(format!("timed out after {:?}", timeout))),
        }
    }

    /// Check a `host:port` dial address just before connecting.
    ///
    /// `address` must hold a literal IP; name resolution has already happened.
    /// This does no I/O.
    pub fn validate_connection_address(&self, address: &str) -> Result<(), ValidationError> {
        let result = self.check_connection_address(address);
        if let Err(e) = &result {
            warn!(kind = %e.kind(), address, reason = e.message(), "connection rejected");
        }
        result
    }

    fn check_connection_address(&self, address: &str) -> Result<(), ValidationError> {
        let (host, port) = split_dial_address(address).ok_or_else(|| {
            ValidationError::new(
                ErrorKind::ConnectionAddressError,
                format!("malformed dial address {}", address),
            )
            .with_detail("address", address)
        })?;

        let ip: IpAddr = host.parse().map_err(|_| {
            ValidationError::new(
                ErrorKind::InvalidIpError,
                format!("dial host {} is not an IP address", host),
            )
            .with_detail("address", address)
        })?;

        if self.is_testing_loopback_ip(ip) {
            return Ok(());
        }

        self.check_connection_ip(ip)?;

        if !port.is_empty() && !self.allowed_ports.contains(port) {
            return Err(port_blocked(port).with_detail("ip", ip.to_string()));
        }

        Ok(())
    }

    /// Check a resolved IP against the private-range and metadata rules.
    pub fn check_connection_ip(&self, ip: IpAddr) -> Result<(), ValidationError> {
        if self.is_testing_loopback_ip(ip) {
            return Ok(());
        }

        if self.is_blocked_ip(ip) {
            return Err(ValidationError::new(
                ErrorKind::PrivateIpBlocked,
                format!("connection to private address {} blocked", ip),
            )
            .with_detail("ip", ip.to_string()));
        }

        if is_metadata_endpoint_ip(ip) {
            return Err(ValidationError::new(
                ErrorKind::MetadataIpBlocked,
                format!("connection to metadata address {} blocked", ip),
            )
            .with_detail("ip", ip.to_string()));
        }

        Ok(())
    }

    fn is_blocked_ip(&self, ip: IpAddr) -> bool {
        is_private_or_dangerous(ip)
            || self
                .config
                .blocked_cidrs
                .iter()
                .any(|net| net.contains(&ip) || net.contains(&ip.to_canonical()))
    }

    fn is_testing_loopback_host(&self, host: &str) -> bool {
        self.allow_testing_localhost && is_loopback_literal(host)
    }

    fn is_testing_loopback_ip(&self, ip: IpAddr) -> bool {
        self.allow_testing_localhost && ip.to_canonical().is_loopback()
    }
}

fn check_path(url: &TargetUrl) -> Result<(), ValidationError> {
    let raw = url.path();
    if let Some(pattern) = ENCODED_ATTACK_PATTERNS.iter().find(|p| raw.contains(*p)) {
        return Err(ValidationError::new(
            ErrorKind::UrlEncodingBlocked,
            format!("path contains encoded sequence {}", pattern),
        )
        .with_detail("path", raw)
        .with_detail("pattern", *pattern));
    }

    let decoded = url.decoded_path();
    if decoded.contains("..") || decoded.contains("/.") {
        return Err(ValidationError::new(
            ErrorKind::PathTraversalBlocked,
            "path contains a dot segment",
        )
        .with_detail("path", raw));
    }

    Ok(())
}

fn port_blocked(port: &str) -> ValidationError {
    ValidationError::new(
        ErrorKind::PortBlocked,
        format!("port {} is not allowed", port),
    )
    .with_detail("port", port)
}

fn ip_list(ips: &BTreeSet<IpAddr>) -> Value {
    ips.iter().map(|ip| Value::from(ip.to_string())).collect()
}

/// Split `host:port` or `[v6]:port`. The port may be empty but must be present.
fn split_dial_address(address: &str) -> Option<(&str, &str)> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = address.rsplit_once(':')?;
    if host.contains(':') || port.contains([':', '[', ']']) {
        return None;
    }
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::blocklist::{DEFAULT_INTERNAL_DOMAINS, DEFAULT_METADATA_ENDPOINTS};
    use crate::resolve::testing::SequenceResolver;
    use crate::resolve::{ResolveError, StaticResolver};

    const PUBLIC_IP: &str = "93.184.216.34";

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[derive(Debug)]
    struct HangingResolver;

    #[async_trait]
    impl Resolver for HangingResolver {
        async fn lookup_ip(&self, _host: &str) -> Result<Vec<IpAddr>, ResolveError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![ip(PUBLIC_IP)])
        }
    }

    fn static_resolver() -> StaticResolver {
        StaticResolver::new()
            .with_host("example.com", [ip(PUBLIC_IP)])
            .with_host("cdn.example.com", [ip(PUBLIC_IP), ip("2606:2800:220:1::1946")])
            .with_host("sneaky.example.com", [ip("10.0.0.5")])
            .with_host("split.example.com", [ip(PUBLIC_IP), ip("192.168.1.10")])
            .with_host("ula.example.com", [ip("fd00::1")])
            .with_host("cgnat.example.com", [ip("100.64.0.1")])
            .with_host("localhost", [ip("127.0.0.1")])
            .with_host("münchen.example", [ip(PUBLIC_IP)])
            .with_host("xn--mnchen-3ya.example", [ip(PUBLIC_IP)])
            .with_host("127.xn--tda.com", [ip("127.0.0.1")])
    }

    fn validator() -> Validator {
        Validator::builder()
            .resolver(Arc::new(static_resolver()))
            .rebind_recheck_delay(Duration::from_millis(1))
            .build()
    }

    fn testing_validator() -> Validator {
        Validator::builder()
            .resolver(Arc::new(static_resolver()))
            .rebind_recheck_delay(Duration::from_millis(1))
            .testing_mode(true)
            .build()
    }

    async fn kind_of(validator: &Validator, input: &str) -> ErrorKind {
        validator.validate_str(input).await.unwrap_err().kind()
    }

    // ==================== End-to-end Scenarios ====================

    #[tokio::test]
    async fn test_public_url_allowed() {
        let v = validator();
        assert!(v.validate_str("https://example.com:443/image.jpg").await.is_ok());
        assert!(v.validate_str("http://cdn.example.com/feed.xml?page=2").await.is_ok());
    }

    #[tokio::test]
    async fn test_metadata_url_blocked() {
        let kind = kind_of(&validator(), "http://169.254.169.254/latest/meta-data/").await;
        assert_eq!(kind, ErrorKind::MetadataEndpointBlocked);
    }

    #[tokio::test]
    async fn test_path_traversal_blocked() {
        let kind = kind_of(&validator(), "https://example.com/../admin").await;
        assert_eq!(kind, ErrorKind::PathTraversalBlocked);
    }

    #[tokio::test]
    async fn test_disallowed_port_blocked() {
        let kind = kind_of(&validator(), "https://example.com:3000/x").await;
        assert_eq!(kind, ErrorKind::PortBlocked);
    }

    #[tokio::test]
    async fn test_rebinding_between_lookups_blocked() {
        let resolver = Arc::new(SequenceResolver::new(&[&[PUBLIC_IP], &["127.0.0.1"]]));
        let v = Validator::builder()
            .resolver(resolver.clone())
            .rebind_recheck_delay(Duration::from_millis(1))
            .build();

        let err = v.validate_str("https://rebind.attacker.com/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToctouAttackBlocked);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
        assert!(err.details().contains_key("second"));
    }

    // ==================== Structure and Scheme ====================

    #[tokio::test]
    async fn test_malformed_urls() {
        let v = validator();
        assert_eq!(kind_of(&v, "not a url").await, ErrorKind::BasicValidationError);
        assert_eq!(kind_of(&v, "file:///etc/passwd").await, ErrorKind::BasicValidationError);
        assert_eq!(kind_of(&v, "http://0177.0.0.1/").await, ErrorKind::BasicValidationError);
    }

    #[tokio::test]
    async fn test_non_http_schemes() {
        let v = validator();
        assert_eq!(kind_of(&v, "ftp://example.com/").await, ErrorKind::SchemeValidationError);
        assert_eq!(kind_of(&v, "gopher://example.com/").await, ErrorKind::SchemeValidationError);
        assert_eq!(kind_of(&v, "ws://example.com/").await, ErrorKind::SchemeValidationError);
    }

    #[tokio::test]
    async fn test_scheme_checked_before_host() {
        let kind = kind_of(&validator(), "ftp://169.254.169.254/").await;
        assert_eq!(kind, ErrorKind::SchemeValidationError);
    }

    // ==================== Host Blocklists ====================

    #[tokio::test]
    async fn test_every_metadata_endpoint_blocked() {
        let v = validator();
        for endpoint in DEFAULT_METADATA_ENDPOINTS {
            for scheme in ["http", "https"] {
                let url = format!("{}://{}/computeMetadata/v1", scheme, endpoint);
                assert_eq!(
                    kind_of(&v, &url).await,
                    ErrorKind::MetadataEndpointBlocked,
                    "{}",
                    url
                );
            }
        }
    }

    #[tokio::test]
    async fn test_metadata_hostname_case_and_trailing_dot() {
        let v = validator();
        let kind = kind_of(&v, "http://METADATA.GOOGLE.INTERNAL./").await;
        assert_eq!(kind, ErrorKind::MetadataEndpointBlocked);
    }

    #[tokio::test]
    async fn test_every_internal_suffix_blocked() {
        let v = validator();
        for suffix in DEFAULT_INTERNAL_DOMAINS {
            let url = format!("https://service{}/feed", suffix);
            assert_eq!(kind_of(&v, &url).await, ErrorKind::InternalDomainBlocked, "{}", url);
        }
    }

    #[tokio::test]
    async fn test_custom_internal_suffix() {
        let v = Validator::builder()
            .resolver(Arc::new(static_resolver()))
            .internal_domain(".svc")
            .build();
        assert_eq!(kind_of(&v, "http://api.svc/").await, ErrorKind::InternalDomainBlocked);
    }

    // ==================== Path ====================

    #[tokio::test]
    async fn test_traversal_paths() {
        let v = validator();
        for path in ["/../etc/passwd", "/a/../../b", "/a/./b", "/images/.."] {
            let url = format!("https://example.com{}", path);
            assert_eq!(kind_of(&v, &url).await, ErrorKind::PathTraversalBlocked, "{}", url);
        }
    }

    #[tokio::test]
    async fn test_encoded_paths() {
        let v = validator();
        for path in [
            "/%2e%2e/admin",
            "/%2E%2E/admin",
            "/a%2fb",
            "/a%2Fb",
            "/file%00.jpg",
            "/x%0a",
            "/x%0D",
            "/a%5cb",
        ] {
            let url = format!("https://example.com{}", path);
            assert_eq!(kind_of(&v, &url).await, ErrorKind::UrlEncodingBlocked, "{}", url);
        }
    }

    #[tokio::test]
    async fn test_encoding_takes_precedence_over_traversal() {
        let kind = kind_of(&validator(), "https://example.com/../%2e%2e/").await;
        assert_eq!(kind, ErrorKind::UrlEncodingBlocked);
    }

    #[tokio::test]
    async fn test_benign_encoded_path_allowed() {
        let v = validator();
        assert!(v.validate_str("https://example.com/my%20image.jpg").await.is_ok());
        assert!(v.validate_str("https://example.com/a.b/c..d").await.is_err());
        assert!(v.validate_str("https://example.com/a.b/c.d").await.is_ok());
    }

    // ==================== Ports ====================

    #[tokio::test]
    async fn test_allowed_ports_pass() {
        let v = validator();
        for port in [80, 443, 8080, 8443] {
            let url = format!("https://example.com:{}/x", port);
            assert!(v.validate_str(&url).await.is_ok(), "{}", url);
        }
    }

    #[tokio::test]
    async fn test_other_ports_blocked() {
        let v = validator();
        for port in ["22", "25", "3000", "6379", "9200", "0443", "65535"] {
            let url = format!("https://example.com:{}/x", port);
            assert_eq!(kind_of(&v, &url).await, ErrorKind::PortBlocked, "{}", url);
        }
    }

    #[tokio::test]
    async fn test_extra_allowed_port() {
        let v = Validator::builder()
            .resolver(Arc::new(static_resolver()))
            .allow_port(9443)
            .build();
        assert!(v.validate_str("https://example.com:9443/").await.is_ok());
    }

    // ==================== Unicode ====================

    #[tokio::test]
    async fn test_mixed_script_host_blocked() {
        // Cyrillic е followed by Latin
        let kind = kind_of(&validator(), "https://\u{0435}xample.com/").await;
        assert_eq!(kind, ErrorKind::MixedScriptBlocked);
    }

    #[tokio::test]
    async fn test_single_script_confusable_blocked() {
        // All Cyrillic, so only the confusable table catches it
        let kind = kind_of(&validator(), "https://сахар.рф/").await;
        assert_eq!(kind, ErrorKind::UnicodeBypassBlocked);
    }

    #[tokio::test]
    async fn test_punycode_private_hint_blocked() {
        let v = validator();
        assert_eq!(kind_of(&v, "http://10.ü.com/").await, ErrorKind::PunycodeBypassBlocked);
        assert_eq!(
            kind_of(&v, "http://localhostü.com/").await,
            ErrorKind::PunycodeBypassBlocked
        );
    }

    #[tokio::test]
    async fn test_unconvertible_host() {
        // Private-use code points are disallowed in IDNA
        let kind = kind_of(&validator(), "http://\u{E000}example.com/").await;
        assert_eq!(kind, ErrorKind::PunycodeValidationError);
    }

    #[tokio::test]
    async fn test_fullwidth_metadata_host_blocked() {
        let v = validator();
        assert_eq!(kind_of(&v, "http://ｍｅｔａｄａｔａ/").await, ErrorKind::MetadataEndpointBlocked);
        assert_eq!(
            kind_of(&v, "http://１６９．２５４．１６９．２５４/").await,
            ErrorKind::MetadataEndpointBlocked
        );
    }

    #[tokio::test]
    async fn test_plain_idn_allowed() {
        assert!(validator().validate_str("https://münchen.example/").await.is_ok());
    }

    #[tokio::test]
    async fn test_custom_confusable_table() {
        let v = Validator::builder()
            .resolver(Arc::new(static_resolver()))
            .confusables(crate::ConfusableTable::new([('ü', 'u')]))
            .build();
        let kind = kind_of(&v, "https://münchen.example/").await;
        assert_eq!(kind, ErrorKind::UnicodeBypassBlocked);
    }

    // ==================== DNS ====================

    #[tokio::test]
    async fn test_unresolvable_host_fails_closed() {
        let err = validator()
            .validate_str("https://does-not-exist.example.org/")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DnsResolutionError);
        assert!(err.kind().is_resolution_failure());
    }

    #[tokio::test]
    async fn test_resolution_timeout_fails_closed() {
        let v = Validator::builder()
            .resolver(Arc::new(HangingResolver))
            .dns_timeout(Duration::from_millis(20))
            .build();
        let kind = kind_of(&v, "https://slow.example.org/").await;
        assert_eq!(kind, ErrorKind::DnsResolutionError);
    }

    #[tokio::test]
    async fn test_private_resolution_blocked() {
        let v = validator();
        assert_eq!(kind_of(&v, "https://sneaky.example.com/").await, ErrorKind::DnsRebindingBlocked);
        assert_eq!(kind_of(&v, "https://split.example.com/").await, ErrorKind::DnsRebindingBlocked);
        assert_eq!(kind_of(&v, "https://ula.example.com/").await, ErrorKind::DnsRebindingBlocked);
    }

    #[tokio::test]
    async fn test_private_ip_literals_blocked() {
        let v = validator();
        assert_eq!(kind_of(&v, "http://192.168.1.1/").await, ErrorKind::DnsRebindingBlocked);
        assert_eq!(kind_of(&v, "http://127.0.0.1/").await, ErrorKind::DnsRebindingBlocked);
        assert_eq!(kind_of(&v, "http://[::1]/").await, ErrorKind::DnsRebindingBlocked);
        assert_eq!(
            kind_of(&v, "http://[::ffff:10.0.0.1]/").await,
            ErrorKind::DnsRebindingBlocked
        );
    }

    #[tokio::test]
    async fn test_blocked_cidr() {
        let v = validator();
        assert!(v.validate_str("https://cgnat.example.com/").await.is_ok());

        let v = Validator::builder()
            .resolver(Arc::new(static_resolver()))
            .block_cidr("100.64.0.0/10")
            .build();
        let kind = kind_of(&v, "https://cgnat.example.com/").await;
        assert_eq!(kind, ErrorKind::DnsRebindingBlocked);
    }

    #[tokio::test]
    async fn test_stable_suspicious_host_allowed() {
        let resolver = Arc::new(SequenceResolver::new(&[&[PUBLIC_IP]]));
        let v = Validator::builder()
            .resolver(resolver.clone())
            .rebind_recheck_delay(Duration::from_millis(1))
            .build();
        assert!(v.validate_str("https://evil-but-stable.com/").await.is_ok());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ordinary_host_resolved_once() {
        let resolver = Arc::new(SequenceResolver::new(&[&[PUBLIC_IP], &["127.0.0.1"]]));
        let v = Validator::builder().resolver(resolver.clone()).build();
        assert!(v.validate_str("https://news.example.org/").await.is_ok());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recheck_failure_fails_closed() {
        #[derive(Debug)]
        struct FailSecond(AtomicUsize);

        #[async_trait]
        impl Resolver for FailSecond {
            async fn lookup_ip(&self, _host: &str) -> Result<Vec<IpAddr>, ResolveError> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(vec![ip(PUBLIC_IP)])
                } else {
                    Err(ResolveError("SERVFAIL".to_string()))
                }
            }
        }

        let v = Validator::builder()
            .resolver(Arc::new(FailSecond(AtomicUsize::new(0))))
            .rebind_recheck_delay(Duration::from_millis(1))
            .build();
        let kind = kind_of(&v, "https://rebind.example.net/").await;
        assert_eq!(kind, ErrorKind::DnsResolutionError);
    }

    // ==================== Testing Mode ====================

    #[tokio::test]
    async fn test_testing_mode_toggle() {
        let url = "http://localhost:8080/x";
        assert!(validator().validate_str(url).await.is_err());
        assert!(testing_validator().validate_str(url).await.is_ok());
    }

    #[tokio::test]
    async fn test_testing_mode_skips_port_for_loopback() {
        let v = testing_validator();
        assert!(v.validate_str("http://127.0.0.1:5555/feed").await.is_ok());
        assert_eq!(kind_of(&v, "https://example.com:5555/").await, ErrorKind::PortBlocked);
    }

    #[tokio::test]
    async fn test_testing_mode_keeps_other_blocks() {
        let v = testing_validator();
        assert_eq!(kind_of(&v, "http://10.0.0.1/").await, ErrorKind::DnsRebindingBlocked);
        assert_eq!(
            kind_of(&v, "http://169.254.169.254/").await,
            ErrorKind::MetadataEndpointBlocked
        );
        assert_eq!(kind_of(&v, "http://localhost/../x").await, ErrorKind::PathTraversalBlocked);
    }

    #[tokio::test]
    async fn test_testing_mode_skips_only_punycode_check() {
        let url = "http://127.ü.com/";
        assert_eq!(kind_of(&validator(), url).await, ErrorKind::PunycodeBypassBlocked);
        assert!(testing_validator().validate_str(url).await.is_ok());
    }

    // ==================== Idempotence ====================

    #[tokio::test]
    async fn test_repeat_validation_same_result() {
        let v = validator();
        for url in [
            "https://example.com/a.jpg",
            "https://example.com:3000/",
            "https://sneaky.example.com/",
            "https://\u{0435}xample.com/",
        ] {
            let first = v.validate_str(url).await.map(|_| ()).map_err(|e| e.kind());
            let second = v.validate_str(url).await.map(|_| ()).map_err(|e| e.kind());
            assert_eq!(first, second, "{}", url);
        }
    }

    // ==================== Blocking Wrapper ====================

    #[test]
    fn test_validate_sync_outside_runtime() {
        let v = validator();
        let ok = TargetUrl::parse("https://example.com/").unwrap();
        let bad = TargetUrl::parse("https://sneaky.example.com/").unwrap();
        assert!(v.validate_sync(&ok).is_ok());
        assert_eq!(v.validate_sync(&bad).unwrap_err().kind(), ErrorKind::DnsRebindingBlocked);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_validate_sync_inside_runtime() {
        let v = validator();
        let ok = TargetUrl::parse("https://example.com/").unwrap();
        assert!(v.validate_sync(&ok).is_ok());
    }

    #[tokio::test]
    async fn test_validate_sync_inside_current_thread_runtime() {
        let v = validator();
        let bad = TargetUrl::parse("http://169.254.169.254/").unwrap();
        assert_eq!(
            v.validate_sync(&bad).unwrap_err().kind(),
            ErrorKind::MetadataEndpointBlocked
        );
    }

    // ==================== Connection Time ====================

    #[test]
    fn test_connection_public_allowed() {
        let v = validator();
        assert!(v.validate_connection_address("93.184.216.34:443").is_ok());
        assert!(v.validate_connection_address("[2606:2800:220:1::1946]:443").is_ok());
        assert!(v.validate_connection_address("93.184.216.34:").is_ok());
    }

    #[test]
    fn test_connection_private_blocked() {
        let v = validator();
        for addr in ["10.0.0.1:443", "127.0.0.1:80", "[::1]:443", "[fd00::1]:80", "0.0.0.0:80"] {
            let err = v.validate_connection_address(addr).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PrivateIpBlocked, "{}", addr);
        }
        // Link-local wins over the metadata rule
        let err = v.validate_connection_address("169.254.169.254:80").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrivateIpBlocked);
    }

    #[test]
    fn test_connection_metadata_blocked() {
        let v = validator();
        for addr in ["100.100.100.200:80", "192.0.0.192:443", "[::ffff:100.100.100.200]:80"] {
            let err = v.validate_connection_address(addr).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MetadataIpBlocked, "{}", addr);
        }
    }

    #[test]
    fn test_connection_port_blocked() {
        let err = validator()
            .validate_connection_address("93.184.216.34:22")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortBlocked);
    }

    #[test]
    fn test_connection_malformed_address() {
        let v = validator();
        for addr in ["93.184.216.34", "::1:80", "[::1]", "[::1]x80", ""] {
            let err = v.validate_connection_address(addr).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConnectionAddressError, "{:?}", addr);
        }
    }

    #[test]
    fn test_connection_requires_literal_ip() {
        let err = validator()
            .validate_connection_address("example.com:443")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIpError);
    }

    #[test]
    fn test_connection_testing_mode() {
        let v = testing_validator();
        assert!(v.validate_connection_address("127.0.0.1:5555").is_ok());
        assert!(v.validate_connection_address("[::1]:5555").is_ok());
        assert_eq!(
            v.validate_connection_address("10.0.0.1:443").unwrap_err().kind(),
            ErrorKind::PrivateIpBlocked
        );
    }

    #[test]
    fn test_connection_blocked_cidr() {
        let v = Validator::builder()
            .resolver(Arc::new(static_resolver()))
            .block_cidr("100.64.0.0/10")
            .build();
        assert_eq!(
            v.validate_connection_address("100.64.0.1:443").unwrap_err().kind(),
            ErrorKind::PrivateIpBlocked
        );
    }

    #[test]
    fn test_split_dial_address() {
        assert_eq!(split_dial_address("1.2.3.4:80"), Some(("1.2.3.4", "80")));
        assert_eq!(split_dial_address("[::1]:443"), Some(("::1", "443")));
        assert_eq!(split_dial_address("1.2.3.4:"), Some(("1.2.3.4", "")));
        assert_eq!(split_dial_address("1.2.3.4"), None);
        assert_eq!(split_dial_address("::1:80"), None);
    }
}
