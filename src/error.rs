//! Error types for ssrf-guard.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Discriminator for a rejected URL or connection.
///
/// The string form returned by [`ErrorKind::as_str`] is stable and is what
/// gets serialized and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BasicValidationError,
    SchemeValidationError,
    MetadataEndpointBlocked,
    InternalDomainBlocked,
    PathTraversalBlocked,
    UrlEncodingBlocked,
    PortBlocked,
    PunycodeValidationError,
    PunycodeBypassBlocked,
    MixedScriptBlocked,
    UnicodeBypassBlocked,
    DnsResolutionError,
    DnsRebindingBlocked,
    ToctouAttackBlocked,
    PrivateIpBlocked,
    MetadataIpBlocked,
    ConnectionAddressError,
    InvalidIpError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BasicValidationError => "BASIC_VALIDATION_ERROR",
            Self::SchemeValidationError => "SCHEME_VALIDATION_ERROR",
            Self::MetadataEndpointBlocked => "METADATA_ENDPOINT_BLOCKED",
            Self::InternalDomainBlocked => "INTERNAL_DOMAIN_BLOCKED",
            Self::PathTraversalBlocked => "PATH_TRAVERSAL_BLOCKED",
            Self::UrlEncodingBlocked => "URL_ENCODING_BLOCKED",
            Self::PortBlocked => "PORT_BLOCKED",
            Self::PunycodeValidationError => "PUNYCODE_VALIDATION_ERROR",
            Self::PunycodeBypassBlocked => "PUNYCODE_BYPASS_BLOCKED",
            Self::MixedScriptBlocked => "MIXED_SCRIPT_BLOCKED",
            Self::UnicodeBypassBlocked => "UNICODE_BYPASS_BLOCKED",
            Self::DnsResolutionError => "DNS_RESOLUTION_ERROR",
            Self::DnsRebindingBlocked => "DNS_REBINDING_BLOCKED",
            Self::ToctouAttackBlocked => "TOCTOU_ATTACK_BLOCKED",
            Self::PrivateIpBlocked => "PRIVATE_IP_BLOCKED",
            Self::MetadataIpBlocked => "METADATA_IP_BLOCKED",
            Self::ConnectionAddressError => "CONNECTION_ADDRESS_ERROR",
            Self::InvalidIpError => "INVALID_IP_ERROR",
        }
    }

    /// Whether the rejection came from a failed lookup rather than a policy block.
    ///
    /// Callers use this to pick "DNS lookup failed" over "URL not allowed".
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, Self::DnsResolutionError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected URL or connection.
///
/// `details` carries diagnostic context for logs. It is not part of the
/// `Display` output so it does not leak into user-facing messages.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct ValidationError {
    message: String,
    kind: ErrorKind,
    details: BTreeMap<String, Value>,
}

impl ValidationError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            details: BTreeMap::new(),
        }
    }

    pub(crate) fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &BTreeMap<String, Value> {
        &self.details
    }
}

/// Errors from [`SecureClient`](crate::SecureClient).
#[cfg(feature = "client")]
#[derive(Debug, Error)]
pub enum FetchError {
    /// The requested URL failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A redirect pointed to a blocked URL.
    #[error("redirect blocked: {redirect_url} ({source})")]
    RedirectBlocked {
        original_url: String,
        redirect_url: String,
        source: ValidationError,
    },

    /// Too many redirects.
    #[error("too many redirects (max {max})")]
    TooManyRedirects { url: String, max: u8 },

    /// HTTP request failed.
    #[error("HTTP error for {url}: {message}")]
    Http { url: String, message: String },

    /// The underlying HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

#[cfg(feature = "client")]
impl FetchError {
    /// The validation failure behind this error, if any.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(e) => Some(e),
            Self::RedirectBlocked { source, .. } => Some(source),
            _ => None,
        }
    }

    pub(crate) fn http(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Http {
            url: url.into(),
            message: message.to_string(),
        }
    }
}
