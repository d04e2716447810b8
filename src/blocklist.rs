//! Default blocklists and IP classification shared by both validation layers.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Cloud metadata hosts, including host:port variants.
pub const DEFAULT_METADATA_ENDPOINTS: &[&str] = &[
    "169.254.169.254",
    "169.254.169.254:80",
    "metadata.google.internal",
    "metadata.google.internal:80",
    "metadata.goog",
    "metadata.azure.internal",
    "metadata",
    "instance-data", // AWS alternate (EC2-Classic)
    "100.100.100.200",
    "100.100.100.200:80",
    "192.0.0.192",
    "192.0.0.192:80",
];

/// Hostname suffixes that only resolve inside private networks.
pub const DEFAULT_INTERNAL_DOMAINS: &[&str] = &[
    ".local",
    ".internal",
    ".corp",
    ".lan",
    ".intranet",
    ".test",
    ".localhost",
    ".cluster.local",
];

pub const DEFAULT_ALLOWED_PORTS: &[u16] = &[80, 443, 8080, 8443];

/// Metadata services reachable by literal IP.
const METADATA_IPV4: &[Ipv4Addr] = &[
    Ipv4Addr::new(169, 254, 169, 254), // AWS, GCP, Azure
    Ipv4Addr::new(100, 100, 100, 200), // Alibaba Cloud
    Ipv4Addr::new(192, 0, 0, 192),     // Oracle Cloud
];

/// AWS IPv6 metadata: fd00:ec2::254
const METADATA_IPV6: &[Ipv6Addr] = &[Ipv6Addr::new(0xfd00, 0xec2, 0, 0, 0, 0, 0, 0x254)];

const SUSPICIOUS_FRAGMENTS: &[&str] = &[
    "toctou",
    "rebind",
    "attack",
    "malicious",
    "evil",
    "127.",
    "10.",
    "192.168.",
    "172.",
    "localhost",
    "internal",
    "private",
    "test",
];

const SUSPICIOUS_SUFFIXES: &[&str] = &[
    ".tk", ".ml", ".ga", ".cf", ".temp", ".tmp", ".test", ".nip.io",
];

/// Check if an IP is loopback, link-local, or in a private range.
///
/// IPv4-mapped IPv6 addresses are classified as their IPv4 address.
pub fn is_private_or_dangerous(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => is_private_or_dangerous_v4(v4),
        IpAddr::V6(v6) => is_private_or_dangerous_v6(v6),
    }
}

fn is_private_or_dangerous_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_link_local()
        // link-local multicast 224.0.0.0/24
        || (octets[0] == 224 && octets[1] == 0 && octets[2] == 0)
        // 10/8, 172.16/12, 192.168/16
        || ip.is_private()
}

fn is_private_or_dangerous_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_unspecified()
        || ip.is_loopback()
        // link-local unicast fe80::/10
        || (first & 0xffc0) == 0xfe80
        // link-local multicast ff02::/16
        || (first & 0xff0f) == 0xff02
        // unique local fc00::/7
        || (first & 0xfe00) == 0xfc00
}

/// Check if an IP is a known cloud metadata endpoint, regardless of hostname.
pub fn is_metadata_endpoint_ip(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => METADATA_IPV4.contains(&v4),
        IpAddr::V6(v6) => METADATA_IPV6.contains(&v6),
    }
}

/// Hosts exempted from loopback blocks when a validator is in testing mode.
pub(crate) fn is_loopback_literal(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host.starts_with("127.")
}

/// Heuristic for hostnames worth a second DNS lookup.
///
/// Kept narrow so ordinary hosts do not pay for the re-check.
pub(crate) fn is_suspicious_domain(host: &str) -> bool {
    SUSPICIOUS_FRAGMENTS.iter().any(|f| host.contains(f))
        || SUSPICIOUS_SUFFIXES.iter().any(|s| host.ends_with(s))
}

/// Return the metadata endpoint `host` matches, either exactly or as `endpoint:`.
pub(crate) fn matching_metadata_endpoint<'a>(
    host: &str,
    endpoints: &'a [String],
) -> Option<&'a str> {
    endpoints
        .iter()
        .find(|e| host == e.as_str() || host.starts_with(&format!("{}:", e)))
        .map(String::as_str)
}

pub(crate) fn matching_internal_domain<'a>(host: &str, suffixes: &'a [String]) -> Option<&'a str> {
    suffixes
        .iter()
        .find(|s| host.ends_with(s.as_str()))
        .map(String::as_str)
}
