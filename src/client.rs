//! HTTP client whose connections and redirects go through a [`Validator`].
//!
//! Two layers run for every request:
//!
//! - Each URL in the redirect chain is checked with
//!   [`Validator::validate_url`] before it is requested.
//! - Each hostname reqwest connects to is resolved by [`GuardedResolver`],
//!   which rejects the whole answer if any address is private or a metadata
//!   address. IP-literal hosts never reach a resolver, so they are checked
//!   with [`Validator::validate_connection_address`] instead.
//!
//! The second layer is what defeats DNS rebinding: the addresses checked are
//! the addresses reqwest dials, whatever DNS said during pre-flight.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::Policy as RedirectPolicy;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};
use url::{ParseError, Url};

use crate::error::{ErrorKind, FetchError, ValidationError};
use crate::target::{url_host_ip, TargetUrl};
use crate::validate::Validator;

/// Result of a fetch, including the redirect chain.
#[derive(Debug)]
pub struct FetchResult {
    /// The final HTTP response.
    pub response: Response,

    /// Every URL requested, starting with the original.
    pub chain: Vec<TargetUrl>,
}

/// Build a [`SecureClient`] with an overall request timeout.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use ssrf_guard::{create_secure_http_client, Validator};
///
/// # async fn example() -> Result<(), ssrf_guard::FetchError> {
/// let client = create_secure_http_client(Arc::new(Validator::new()), Duration::from_secs(30))?;
/// let result = client.get("https://example.com/feed.xml").await?;
/// println!("followed {} redirects", result.chain.len() - 1);
/// # Ok(())
/// # }
/// ```
pub fn create_secure_http_client(
    validator: Arc<Validator>,
    timeout: Duration,
) -> Result<SecureClient, FetchError> {
    SecureClient::new(validator, timeout)
}

/// A reqwest client locked down by a [`Validator`].
#[derive(Debug, Clone)]
pub struct SecureClient {
    client: Client,
    validator: Arc<Validator>,
}

impl SecureClient {
    pub fn new(validator: Arc<Validator>, timeout: Duration) -> Result<Self, FetchError> {
        let config = validator.config();
        let client = Client::builder()
            .redirect(RedirectPolicy::none())
            .dns_resolver(Arc::new(GuardedResolver::new(validator.clone())))
            // A proxy would resolve the target itself, out of our reach.
            .no_proxy()
            .http1_only()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout())
            .tcp_keepalive(config.tcp_keepalive())
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Build(e.to_string()))?;

        Ok(Self { client, validator })
    }

    /// A client using the request timeout from the validator's config.
    pub fn with_default_timeout(validator: Arc<Validator>) -> Result<Self, FetchError> {
        let timeout = validator.config().request_timeout();
        Self::new(validator, timeout)
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// GET `url`, following redirects after validating each one.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Validation`] if `url` itself is rejected
    /// - [`FetchError::RedirectBlocked`] if a redirect target is rejected
    /// - [`FetchError::TooManyRedirects`] when a redirect would make the
    ///   chain longer than `max_redirects` requests
    /// - [`FetchError::Http`] on transport errors, including connections
    ///   refused by the resolver hook
    pub async fn get(&self, url: &str) -> Result<FetchResult, FetchError> {
        let max = self.validator.config().max_redirects;
        let mut current = TargetUrl::parse(url)?;
        let mut chain: Vec<TargetUrl> = Vec::new();

        loop {
            let hop_error = |e: ValidationError, hop: &TargetUrl| {
                if chain.is_empty() {
                    FetchError::Validation(e)
                } else {
                    FetchError::RedirectBlocked {
                        original_url: url.to_string(),
                        redirect_url: hop.as_str().to_string(),
                        source: e,
                    }
                }
            };

            self.validator
                .validate_url(&current)
                .await
                .map_err(|e| hop_error(e, &current))?;

            // `to_url` refuses any URL whose host or port it reads differently.
            let request_url = current.to_url().map_err(|e| hop_error(e, &current))?;

            // reqwest dials IP literals without calling the resolver hook.
            if let Some(ip) = url_host_ip(&request_url) {
                let port = request_url
                    .port_or_known_default()
                    .unwrap_or_else(|| current.port_or_default());
                self.validator
                    .validate_connection_address(&SocketAddr::new(ip, port).to_string())
                    .map_err(|e| hop_error(e, &current))?;
            }

            let response = self
                .client
                .get(request_url)
                .send()
                .await
                .map_err(|e| FetchError::http(current.as_str(), e))?;

            let location = redirect_location(&response);
            let base = current;
            chain.push(base.clone());

            let Some(location) = location else {
                return Ok(FetchResult { response, chain });
            };

            if chain.len() >= usize::from(max) {
                warn!(url, max, "redirect limit reached");
                return Err(FetchError::TooManyRedirects {
                    url: url.to_string(),
                    max,
                });
            }

            debug!(from = base.as_str(), to = location.as_str(), "following redirect");
            current = resolve_redirect(&base, &location).map_err(|e| {
                FetchError::RedirectBlocked {
                    original_url: url.to_string(),
                    redirect_url: location.clone(),
                    source: e,
                }
            })?;
        }
    }
}

/// The `Location` of a redirect response. Other responses are final.
fn redirect_location(response: &Response) -> Option<String> {
    match response.status() {
        StatusCode::MOVED_PERMANENTLY
        | StatusCode::FOUND
        | StatusCode::SEE_OTHER
        | StatusCode::TEMPORARY_REDIRECT
        | StatusCode::PERMANENT_REDIRECT => response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
        _ => None,
    }
}

/// Absolute locations are kept as sent so encoded attacks stay visible.
/// Relative ones, including scheme-relative `//host/...`, are joined onto
/// the current URL.
fn resolve_redirect(base: &TargetUrl, location: &str) -> Result<TargetUrl, ValidationError> {
    let bad_location = |e: ParseError| {
        ValidationError::new(
            ErrorKind::BasicValidationError,
            format!("bad redirect location {}: {}", location, e),
        )
        .with_detail("location", location)
    };

    match Url::parse(location) {
        Ok(_) => TargetUrl::parse(location),
        Err(ParseError::RelativeUrlWithoutBase) => {
            let joined = base.to_url()?.join(location).map_err(bad_location)?;
            TargetUrl::try_from(&joined)
        }
        Err(e) => Err(bad_location(e)),
    }
}

/// reqwest DNS hook that only hands out addresses the validator accepts.
///
/// Ports are left as 0; reqwest fills in the port from the URL.
#[derive(Debug, Clone)]
pub struct GuardedResolver {
    validator: Arc<Validator>,
}

impl GuardedResolver {
    pub fn new(validator: Arc<Validator>) -> Self {
        Self { validator }
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let validator = self.validator.clone();
        Box::pin(async move {
            let host = name.as_str();
            let ips = validator.resolve(host).await?;
            for ip in &ips {
                validator.check_connection_ip(*ip).inspect_err(|e| {
                    warn!(host, %ip, kind = %e.kind(), "connection blocked at resolve time");
                })?;
            }
            let addrs: Addrs = Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}
