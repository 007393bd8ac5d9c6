//! Client identity derivation
//!
//! The identity key is the first *public* address found walking the
//! trusted proxy headers in precedence order. Private, loopback,
//! link-local, CGNAT and ULA addresses are proxies or spoofable hops and
//! are skipped.

use campus_common::RequestMeta;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;

/// Default proxy header precedence
pub const DEFAULT_PROXY_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

const NON_PUBLIC_RANGES: [&str; 11] = [
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
    "::/128",
];

fn non_public_ranges() -> &'static [IpNetwork] {
    static RANGES: OnceLock<Vec<IpNetwork>> = OnceLock::new();
    RANGES.get_or_init(|| {
        NON_PUBLIC_RANGES
            .iter()
            .filter_map(|cidr| cidr.parse().ok())
            .collect()
    })
}

/// True when `ip` is routable on the public internet
pub fn is_public(ip: &IpAddr) -> bool {
    if ip.is_multicast() || ip.is_unspecified() || ip.is_loopback() {
        return false;
    }
    !non_public_ranges().iter().any(|net| net.contains(*ip))
}

/// Parse one hop: bare address, `v4:port` or `[v6]:port`
fn parse_hop(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim().trim_matches('"');
    if raw.is_empty() {
        return None;
    }
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|s| s.ip()))
}

/// Rate-limit identity for a client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Key for a known address
    pub fn from_ip(ip: IpAddr) -> Self {
        Self(format!("ip:{}", ip))
    }

    /// Key shared by clients whose address could not be determined
    pub fn unknown() -> Self {
        Self("ip:unknown".to_string())
    }

    /// Arbitrary key (service accounts, tests)
    pub fn custom(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as stored
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Narrow the key to an endpoint class
    pub fn scoped(&self, class: &str) -> String {
        format!("{}:{}", class, self.0)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the client address.
///
/// Order: first public hop in the precedence headers, then the peer
/// socket address, then the first parseable (non-public) hop.
pub fn client_address<S: AsRef<str>>(request: &RequestMeta, precedence: &[S]) -> Option<IpAddr> {
    let mut first_seen = None;

    for header in precedence {
        let Some(value) = request.header(header.as_ref()) else {
            continue;
        };
        for hop in value.split(',').filter_map(parse_hop) {
            if is_public(&hop) {
                return Some(hop);
            }
            first_seen.get_or_insert(hop);
        }
    }

    request.peer_addr.or(first_seen)
}

/// Identity key for a request
pub fn client_identity<S: AsRef<str>>(request: &RequestMeta, precedence: &[S]) -> IdentityKey {
    client_address(request, precedence)
        .map(IdentityKey::from_ip)
        .unwrap_or_else(IdentityKey::unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> RequestMeta {
        RequestMeta::new("GET", "/api/v1/students")
    }

    #[test]
    fn test_public_detection() {
        assert!(is_public(&"203.0.113.9".parse().unwrap()));
        assert!(is_public(&"2001:4860:4860::8888".parse().unwrap()));
        assert!(!is_public(&"10.1.2.3".parse().unwrap()));
        assert!(!is_public(&"172.20.0.1".parse().unwrap()));
        assert!(!is_public(&"100.64.1.1".parse().unwrap()));
        assert!(!is_public(&"127.0.0.1".parse().unwrap()));
        assert!(!is_public(&"fd12::1".parse().unwrap()));
    }

    #[test]
    fn test_skips_private_hops_in_forwarded_for() {
        let request = req().with_header("x-forwarded-for", "10.0.0.7, 198.51.100.24, 203.0.113.1");
        let ip = client_address(&request, &DEFAULT_PROXY_HEADERS);
        assert_eq!(ip, Some("198.51.100.24".parse().unwrap()));
    }

    #[test]
    fn test_precedence_order() {
        let request = req()
            .with_header("cf-connecting-ip", "192.0.2.50")
            .with_header("x-real-ip", "198.51.100.7");
        let ip = client_address(&request, &DEFAULT_PROXY_HEADERS);
        assert_eq!(ip, Some("198.51.100.7".parse().unwrap()));
    }

    #[test]
    fn test_falls_back_to_peer_then_private_hop() {
        let request = req()
            .with_header("x-forwarded-for", "10.0.0.7")
            .with_peer("192.0.2.200".parse().unwrap());
        assert_eq!(
            client_address(&request, &DEFAULT_PROXY_HEADERS),
            Some("192.0.2.200".parse().unwrap())
        );

        let request = req().with_header("x-forwarded-for", "10.0.0.7");
        assert_eq!(
            client_identity(&request, &DEFAULT_PROXY_HEADERS).as_str(),
            "ip:10.0.0.7"
        );
    }

    #[test]
    fn test_ports_and_garbage() {
        let request = req().with_header("x-forwarded-for", "unknown, [2001:db8:1::5]:443, 203.0.113.5:8080");
        // 2001:db8::/32 is documentation space but still globally scoped here
        assert_eq!(
            client_address(&request, &DEFAULT_PROXY_HEADERS),
            Some("2001:db8:1::5".parse().unwrap())
        );
        assert_eq!(client_identity(&req(), &DEFAULT_PROXY_HEADERS), IdentityKey::unknown());
    }

    #[test]
    fn test_scoped_key() {
        let key = IdentityKey::from_ip("203.0.113.9".parse().unwrap());
        assert_eq!(key.scoped("session"), "session:ip:203.0.113.9");
    }
}
