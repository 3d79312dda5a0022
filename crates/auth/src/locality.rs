//! Client address resolution.
//!
//! Admission and throttling key everything by the originating address. When
//! the panel runs behind a reverse proxy the TCP peer is the proxy, so the
//! real client is read from the usual forwarding headers instead.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

/// Returns `true` when common proxy/forwarding headers are present.
pub fn has_proxy_headers(headers: &HeaderMap) -> bool {
    headers.contains_key("x-forwarded-for")
        || headers.contains_key("x-real-ip")
        || headers.contains_key("cf-connecting-ip")
        || headers.contains_key("forwarded")
}

/// The address a request should be attributed to.
///
/// Forwarding headers are only honoured when `behind_proxy` is set; otherwise
/// any client could claim an arbitrary address.
pub fn resolve_client_ip(headers: &HeaderMap, addr: SocketAddr, behind_proxy: bool) -> IpAddr {
    if behind_proxy && let Some(ip) = forwarded_ip(headers) {
        return ip;
    }
    addr.ip()
}

/// Address used for admission decisions.
///
/// Like [`resolve_client_ip`], but returns `None` when a trusted proxy
/// forwarded the request without a parseable client address (for example
/// `X-Forwarded-For: unknown`), i.e. the client is anonymised.
pub fn resolve_admission_ip(
    headers: &HeaderMap,
    addr: SocketAddr,
    behind_proxy: bool,
) -> Option<IpAddr> {
    if !behind_proxy {
        return Some(addr.ip());
    }
    match forwarded_ip(headers) {
        Some(ip) => Some(ip),
        None if has_proxy_headers(headers) => None,
        None => Some(addr.ip()),
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header("x-forwarded-for")
        .and_then(|xff| xff.split(',').find_map(|c| parse_ip(c.trim())))
        .or_else(|| header("x-real-ip").and_then(|v| parse_ip(v.trim())))
        .or_else(|| header("cf-connecting-ip").and_then(|v| parse_ip(v.trim())))
}

/// Parse a bare IP or an `ip:port` pair.
pub fn parse_ip(value: &str) -> Option<IpAddr> {
    if value.is_empty() {
        return None;
    }
    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|a| a.ip()))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn detects_forwarding_headers() {
        let mut h = HeaderMap::new();
        assert!(!has_proxy_headers(&h));
        h.insert("forwarded", "for=203.0.113.50".parse().unwrap());
        assert!(has_proxy_headers(&h));
    }

    #[test]
    fn ignores_headers_when_not_behind_proxy() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", "203.0.113.1".parse().unwrap());
        assert_eq!(resolve_client_ip(&h, peer(), false), peer().ip());
    }

    #[test]
    fn uses_first_parseable_xff_value() {
        let mut h = HeaderMap::new();
        h.insert(
            "x-forwarded-for",
            "garbage, 203.0.113.1, 198.51.100.9".parse().unwrap(),
        );
        assert_eq!(
            resolve_client_ip(&h, peer(), true),
            "203.0.113.1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn falls_back_to_real_ip_then_peer() {
        let mut h = HeaderMap::new();
        h.insert("x-real-ip", "198.51.100.7:5555".parse().unwrap());
        assert_eq!(
            resolve_client_ip(&h, peer(), true),
            "198.51.100.7".parse::<IpAddr>().unwrap()
        );
        assert_eq!(resolve_client_ip(&HeaderMap::new(), peer(), true), peer().ip());
    }

    #[test]
    fn admission_ip_is_unresolvable_when_proxy_hides_client() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", "unknown".parse().unwrap());
        assert_eq!(resolve_admission_ip(&h, peer(), true), None);
        assert_eq!(resolve_admission_ip(&h, peer(), false), Some(peer().ip()));
        assert_eq!(
            resolve_admission_ip(&HeaderMap::new(), peer(), true),
            Some(peer().ip())
        );
    }

    #[test]
    fn parse_ip_rejects_hostnames() {
        assert_eq!(parse_ip("play.example.com"), None);
        assert_eq!(parse_ip(""), None);
    }
}
