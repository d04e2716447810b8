//! # ssrf-guard
//!
//! SSRF protection for services that fetch user-supplied URLs, such as a feed
//! reader proxying articles and images.
//!
//! Protection runs in two stages:
//!
//! 1. **Pre-flight**: [`Validator::validate_url`] checks the URL itself
//!    (scheme, metadata hosts, internal suffixes, encoded path attacks, ports,
//!    homograph tricks) and resolves the host, rejecting private answers and
//!    answers that change between two lookups.
//! 2. **Connection time**: [`Validator::validate_connection_address`] checks
//!    the literal `ip:port` about to be dialed. [`SecureClient`] wires this
//!    into reqwest, so a host that rebinds after pre-flight is still refused.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ssrf_guard::Validator;
//!
//! # async fn example() -> Result<(), ssrf_guard::ValidationError> {
//! let validator = Validator::new();
//! let url = validator.validate_str("https://example.com/feed.xml").await?;
//! println!("safe to fetch {}", url.as_str());
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every rejection is a [`ValidationError`] carrying an [`ErrorKind`], a
//! message and structured details, so callers can log or map them without
//! parsing strings.

mod blocklist;
mod config;
mod confusables;
mod error;
mod resolve;
mod target;
mod validate;

#[cfg(feature = "client")]
mod client;

pub use blocklist::{is_metadata_endpoint_ip, is_private_or_dangerous};
pub use config::{ValidatorBuilder, ValidatorConfig};
pub use confusables::{has_confusable_chars, has_mixed_scripts, ConfusableTable};
pub use error::{ErrorKind, ValidationError};
pub use resolve::{ResolveError, Resolver, StaticResolver, SystemResolver};
pub use target::TargetUrl;
pub use validate::Validator;

#[cfg(feature = "client")]
pub use client::{create_secure_http_client, FetchResult, GuardedResolver, SecureClient};
#[cfg(feature = "client")]
pub use error::FetchError;
