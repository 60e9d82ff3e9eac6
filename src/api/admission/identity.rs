//! Identity token resolution.
//!
//! Rate limits and bot scores are tracked per identity token: the session user
//! id when one exists, otherwise the client address, otherwise a loopback
//! placeholder so the token is never empty.

use axum::http::{HeaderMap, header::FORWARDED};
use std::net::{IpAddr, SocketAddr};

pub const PLACEHOLDER: &str = "127.0.0.1";

/// Single-value client address headers, most specific first. These are only
/// meaningful when the proxy in front of the gateway overwrites them.
const CLIENT_IP_HEADERS: &[&str] = &[
    "x-client-ip",
    "cf-connecting-ip",
    "do-connecting-ip",
    "fastly-client-ip",
    "true-client-ip",
    "x-real-ip",
    "x-cluster-client-ip",
    "fly-client-ip",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityKind {
    User,
    Address,
    Placeholder,
}

impl IdentityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Address => "address",
            Self::Placeholder => "placeholder",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityToken {
    kind: IdentityKind,
    value: String,
}

impl IdentityToken {
    #[must_use]
    pub fn user(id: &str) -> Self {
        Self {
            kind: IdentityKind::User,
            value: id.to_string(),
        }
    }

    #[must_use]
    pub fn address(ip: IpAddr) -> Self {
        Self {
            kind: IdentityKind::Address,
            value: ip.to_string(),
        }
    }

    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            kind: IdentityKind::Placeholder,
            value: PLACEHOLDER.to_string(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> IdentityKind {
        self.kind
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Pick the identity token for a request. An empty or blank user id counts as
/// no session.
#[must_use]
pub fn resolve_identity(user_id: Option<&str>, ip: Option<IpAddr>) -> IdentityToken {
    match user_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => IdentityToken::user(id),
        None => ip.map_or_else(IdentityToken::placeholder, IdentityToken::address),
    }
}

/// Best-effort client address.
///
/// Proxy headers are only consulted when `trust_proxy_headers` is set; the
/// socket peer address is the last resort. Hop lists (`x-forwarded-for`,
/// `Forwarded`) are read right to left and the first public hop wins, so
/// entries a client prepends never become the identity. Private, loopback,
/// link-local and unspecified addresses in headers are proxies, not clients.
#[must_use]
pub fn find_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> Option<IpAddr> {
    if trust_proxy_headers {
        let single = CLIENT_IP_HEADERS.iter().find_map(|name| {
            headers
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_ip)
                .filter(|ip| !is_internal(*ip))
        });
        if let Some(ip) = single.or_else(|| forwarded_hops(headers)) {
            return Some(ip);
        }
    }
    peer.map(|addr| addr.ip()).filter(|ip| !ip.is_unspecified())
}

// Rightmost public hop of `x-forwarded-for`, then of RFC 7239 `Forwarded`:
// `Forwarded: for=192.0.2.60;proto=http, for="[2001:db8::1]:4711"`
fn forwarded_hops(headers: &HeaderMap) -> Option<IpAddr> {
    let xff: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .collect();
    let forwarded: Vec<&str> = headers
        .get_all(FORWARDED)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .flat_map(|element| element.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case("for"))
        .map(|(_, value)| value)
        .collect();

    rightmost_public(&xff).or_else(|| rightmost_public(&forwarded))
}

fn rightmost_public(hops: &[&str]) -> Option<IpAddr> {
    hops.iter()
        .rev()
        .filter_map(|hop| parse_ip(hop))
        .find(|ip| !is_internal(*ip))
}

fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_internal(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || first & 0xfe00 == 0xfc00
                || first & 0xffc0 == 0xfe80
        }
    }
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let value = raw.trim().trim_matches('"');
    let ip = value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
        .or_else(|| {
            value
                .strip_prefix('[')
                .and_then(|rest| rest.split(']').next())
                .and_then(|inner| inner.parse().ok())
        })?;
    (!ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::Ipv4Addr;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn peer() -> Option<SocketAddr> {
        Some(SocketAddr::from(([198, 51, 100, 4], 53211)))
    }

    #[test]
    fn session_user_wins_over_address() {
        let ip = Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)));
        let token = resolve_identity(Some("user_123"), ip);
        assert_eq!(token.kind(), IdentityKind::User);
        assert_eq!(token.value(), "user_123");
    }

    #[test]
    fn empty_user_id_falls_back_to_address() {
        let ip = Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)));
        let token = resolve_identity(Some("  "), ip);
        assert_eq!(token.kind(), IdentityKind::Address);
        assert_eq!(token.value(), "203.0.113.7");
    }

    #[test]
    fn placeholder_when_nothing_is_known() {
        let token = resolve_identity(None, None);
        assert_eq!(token.kind(), IdentityKind::Placeholder);
        assert_eq!(token.value(), PLACEHOLDER);
    }

    #[test]
    fn forwarded_for_uses_rightmost_public_hop() {
        let map = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(
            find_ip(&map, peer(), true),
            Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)))
        );
    }

    #[test]
    fn forged_leading_hops_do_not_change_the_address() {
        let client = Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)));
        for forged in [
            "10.9.1.1, 203.0.113.5",
            "10.9.2.1, 203.0.113.5",
            "198.51.100.77, 203.0.113.5",
            "garbage, 203.0.113.5, 127.0.0.1",
        ] {
            let map = headers(&[("x-forwarded-for", forged)]);
            assert_eq!(find_ip(&map, peer(), true), client, "{forged}");
        }
    }

    #[test]
    fn internal_addresses_in_headers_fall_back_to_peer() {
        let map = headers(&[
            ("x-client-ip", "10.0.0.8"),
            ("x-real-ip", "::1"),
            ("x-forwarded-for", "192.168.1.1, 127.0.0.1"),
            ("forwarded", "for=\"[fd00::1]\""),
        ]);
        assert_eq!(
            find_ip(&map, peer(), true),
            Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4)))
        );
    }

    #[test]
    fn single_value_headers_win_over_hop_lists() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7"),
            ("fly-client-ip", "192.0.2.44"),
        ]);
        assert_eq!(
            find_ip(&map, peer(), true),
            Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 44)))
        );
    }

    #[test]
    fn header_order_is_respected() {
        let map = headers(&[
            ("x-real-ip", "192.0.2.9"),
            ("cf-connecting-ip", "192.0.2.1"),
        ]);
        assert_eq!(
            find_ip(&map, peer(), true),
            Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)))
        );
    }

    #[test]
    fn invalid_headers_are_skipped() {
        let map = headers(&[
            ("x-client-ip", "unknown"),
            ("x-forwarded-for", "0.0.0.0"),
            ("x-real-ip", "192.0.2.9:8443"),
        ]);
        assert_eq!(
            find_ip(&map, peer(), true),
            Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9)))
        );
    }

    #[test]
    fn forwarded_header_is_parsed() {
        let map = headers(&[(
            "forwarded",
            "for=198.51.100.9, proto=https;for=\"[2001:db8::1]:4711\"",
        )]);
        assert_eq!(
            find_ip(&map, None, true).map(|ip| ip.to_string()),
            Some("2001:db8::1".to_string())
        );
    }

    #[test]
    fn untrusted_headers_use_peer() {
        let map = headers(&[("x-forwarded-for", "203.0.113.7")]);
        assert_eq!(
            find_ip(&map, peer(), false),
            Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4)))
        );
        assert_eq!(find_ip(&map, None, false), None);
    }
}
