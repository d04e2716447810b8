//! Raw URL splitting for validation.

use std::borrow::Cow;
use std::net::IpAddr;

use percent_encoding::percent_decode_str;
use url::{Host, Url};

use crate::error::{ErrorKind, ValidationError};

/// A candidate URL split into the parts the validator inspects.
///
/// `url::Url::parse` resolves dot segments, decodes `%2e` segments and
/// punycodes hostnames. Those are exactly the signals the path and Unicode
/// checks need, so `TargetUrl` keeps the raw escaped path and the Unicode host
/// as written. Use [`TargetUrl::to_url`] when handing the URL to an HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    raw: String,
    scheme: String,
    host: String,
    port: Option<String>,
    path: String,
}

impl TargetUrl {
    /// Split a URL string.
    ///
    /// This performs:
    /// - Scheme and authority extraction
    /// - Rejection of userinfo (user:pass@), backslashes, whitespace and
    ///   control characters, which HTTP stacks split differently
    /// - Hostname normalization (lowercase, no brackets, no trailing dot)
    /// - Rejection of non-standard IP formats (octal, decimal, hexadecimal, short-form)
    /// - Percent-escape syntax checks on host and path
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::BasicValidationError`] if the URL has no host or is malformed.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        // `url` strips tabs and newlines and reads `\` as `/`, so any of
        // them would move the host boundary.
        if input.chars().any(|c| c == '\\' || c.is_whitespace() || c.is_control()) {
            return Err(basic_error(
                input,
                "backslash, whitespace or control character in URL",
            ));
        }

        let without_fragment = input.split('#').next().unwrap_or_default();

        let (scheme, rest) = split_scheme(without_fragment)
            .ok_or_else(|| basic_error(input, "URL must have a scheme and host"))?;

        let after_slashes = rest
            .strip_prefix("//")
            .ok_or_else(|| basic_error(input, "URL must have a host"))?;

        let authority_end = after_slashes
            .find(['/', '?'])
            .unwrap_or(after_slashes.len());
        let authority = &after_slashes[..authority_end];
        let path_and_query = &after_slashes[authority_end..];
        let path = path_and_query
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();

        if authority.contains('@') {
            return Err(basic_error(input, "userinfo (user:pass@) not allowed"));
        }

        let (raw_host, port) = split_host_port(authority, input)?;
        let host = normalize_host(raw_host, input)?;

        check_escapes(&path).map_err(|reason| basic_error(input, reason))?;

        Ok(Self {
            raw: input.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            host,
            port,
            path,
        })
    }

    /// The URL exactly as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The lowercased scheme.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The normalized hostname, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The explicit port, if the URL names one.
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// The port to connect to, defaulting to 80 for http and 443 for https.
    pub fn port_or_default(&self) -> u16 {
        self.port
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(if self.is_https() { 443 } else { 80 })
    }

    /// The path as written, still percent-encoded.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The percent-decoded path.
    pub fn decoded_path(&self) -> Cow<'_, str> {
        percent_decode_str(&self.path).decode_utf8_lossy()
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    /// The host as an IP address, if it is a literal.
    pub fn host_ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Parse into a [`Url`] for use with an HTTP client.
    ///
    /// # Errors
    ///
    /// Fails if `url` rejects the string, or reads a different host or port
    /// than the one this `TargetUrl` holds.
    pub fn to_url(&self) -> Result<Url, ValidationError> {
        let url = Url::parse(&self.raw).map_err(|e| basic_error(&self.raw, e.to_string()))?;
        if !self.same_target(&url) {
            return Err(basic_error(&self.raw, "HTTP client reads a different host or port")
                .with_detail("host", self.host.as_str())
                .with_detail("client_host", url.host_str().unwrap_or_default())
                .with_detail("client_port", url.port_or_known_default()));
        }
        Ok(url)
    }

    fn same_target(&self, url: &Url) -> bool {
        let host_matches = match url.host() {
            Some(Host::Domain(domain)) => {
                let domain = domain.strip_suffix('.').unwrap_or(domain);
                self.host_ip().is_none()
                    && idna::domain_to_ascii(&self.host).is_ok_and(|ascii| ascii == domain)
            }
            Some(_) => url_host_ip(url).is_some_and(|ip| Some(ip) == self.host_ip()),
            None => false,
        };
        host_matches && url.port_or_known_default() == Some(self.port_or_default())
    }
}

/// The host of `url` as an IP address, if it is a literal.
pub(crate) fn url_host_ip(url: &Url) -> Option<IpAddr> {
    match url.host()? {
        Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
        Host::Ipv6(ip) => Some(IpAddr::V6(ip)),
        Host::Domain(_) => None,
    }
}

impl TryFrom<&Url> for TargetUrl {
    type Error = ValidationError;

    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        Self::parse(url.as_str())
    }
}

fn basic_error(url: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::new(ErrorKind::BasicValidationError, reason).with_detail("url", url)
}

/// Split `scheme:rest`. Returns `None` if there is no valid scheme.
fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let colon = input.find(':')?;
    let scheme = &input[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic()
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }
    Some((scheme, &input[colon + 1..]))
}

fn split_host_port<'a>(
    host_with_port: &'a str,
    original_url: &str,
) -> Result<(&'a str, Option<String>), ValidationError> {
    // Be careful with IPv6 brackets when removing port
    let (host, port) = if let Some(bracketed) = host_with_port.strip_prefix('[') {
        let close = bracketed
            .find(']')
            .ok_or_else(|| basic_error(original_url, "missing ']' in host"))?;
        let after = &bracketed[close + 1..];
        let port = match after.strip_prefix(':') {
            Some(port) => Some(port),
            None if after.is_empty() => None,
            None => return Err(basic_error(original_url, "invalid characters after IPv6 host")),
        };
        let inner = &bracketed[..close];
        if inner.parse::<std::net::Ipv6Addr>().is_err() {
            return Err(basic_error(
                original_url,
                "brackets only allowed for IPv6 addresses",
            ));
        }
        (inner, port)
    } else {
        match host_with_port.rfind(':') {
            Some(i) => (&host_with_port[..i], Some(&host_with_port[i + 1..])),
            None => (host_with_port, None),
        }
    };

    if let Some(port) = port {
        if !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(basic_error(original_url, format!("invalid port {:?}", port)));
        }
    }

    // An empty port ("host:") counts as no port.
    Ok((host, port.filter(|p| !p.is_empty()).map(str::to_string)))
}

/// Normalize a hostname: decode escapes, lowercase, remove trailing dot.
fn normalize_host(host: &str, original_url: &str) -> Result<String, ValidationError> {
    check_escapes(host).map_err(|reason| basic_error(original_url, reason))?;

    let mut normalized = percent_decode_str(host)
        .decode_utf8()
        .map_err(|_| basic_error(original_url, "host is not valid UTF-8"))?
        .to_lowercase();

    // Remove trailing dot (FQDN notation)
    if normalized.ends_with('.') {
        normalized.pop();
    }

    if normalized.is_empty() {
        return Err(basic_error(original_url, "URL must have a host"));
    }

    // Encoded delimiters would split differently once decoded.
    let is_delimiter = |c: char| {
        matches!(c, '@' | '/' | '\\' | '?' | '#' | '[' | ']' | '%')
            || c.is_whitespace()
            || c.is_control()
    };
    if normalized.chars().any(is_delimiter) {
        return Err(basic_error(original_url, "host contains an encoded delimiter"));
    }

    check_non_standard_ip(&normalized, original_url)?;

    Ok(normalized)
}

/// Every `%` must start a two-digit hex escape.
fn check_escapes(s: &str) -> Result<(), &'static str> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err("invalid URL escape");
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Reject IPv4 spellings that HTTP stacks normalize to a different address
/// than the one validated.
fn check_non_standard_ip(host: &str, original_url: &str) -> Result<(), ValidationError> {
    if host.contains(':') {
        return Ok(());
    }

    let parts: Vec<&str> = host.split('.').collect();

    for part in &parts {
        if part.starts_with("0x") {
            return Err(basic_error(original_url, "hexadecimal IP encoding not allowed"));
        }
    }

    // Single number (e.g., 2130706433 = 127.0.0.1)
    if parts.len() == 1 {
        if host.chars().all(|c| c.is_ascii_digit()) {
            return Err(basic_error(original_url, "decimal IP encoding not allowed"));
        }
        if host.chars().all(|c| c.is_ascii_hexdigit())
            && host.chars().any(|c| c.is_ascii_alphabetic())
            && host.len() == 8
        {
            return Err(basic_error(original_url, "hexadecimal IP encoding not allowed"));
        }
    }

    let numeric = |p: &&str| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit());

    // Short-form: 127.1 -> 127.0.0.1, 127.0.1 -> 127.0.0.1
    if (parts.len() == 2 || parts.len() == 3) && parts.iter().all(numeric) {
        return Err(basic_error(original_url, "short-form IP encoding not allowed"));
    }

    // Leading zero with more digits = octal (e.g., 0177 = 127)
    if parts.len() == 4
        && parts.iter().all(numeric)
        && parts.iter().any(|p| p.len() > 1 && p.starts_with('0'))
    {
        return Err(basic_error(original_url, "octal IP encoding not allowed"));
    }

    Ok(())
}
