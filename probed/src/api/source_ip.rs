//! Reporting probe address

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::http::HeaderMap;

/// Address of the probe that sent a request
///
/// Taken from `X-Real-IP`, else the first parseable `X-Forwarded-For`
/// entry, else the connection's peer address. Without any of them the
/// request is treated as local.
pub fn source_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    if let Some(ip) = header_ips(headers, "x-real-ip").next() {
        return ip;
    }
    if let Some(ip) = header_ips(headers, "x-forwarded-for").next() {
        return ip;
    }
    peer.map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn header_ips<'a>(headers: &'a HeaderMap, name: &'static str) -> impl Iterator<Item = IpAddr> + 'a {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .into_iter()
        .flat_map(|value| value.split(','))
        .filter_map(|entry| entry.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("203.0.113.9:40000".parse().unwrap())
    }

    #[test]
    fn test_real_ip_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(source_ip(&headers, peer()), "198.51.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_first_parseable_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("garbage"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("unknown, 2001:db8::1, 198.51.100.2"),
        );
        assert_eq!(source_ip(&headers, peer()), "2001:db8::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_falls_back_to_peer_then_localhost() {
        let headers = HeaderMap::new();
        assert_eq!(source_ip(&headers, peer()), "203.0.113.9".parse::<IpAddr>().unwrap());
        assert_eq!(source_ip(&headers, None), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
