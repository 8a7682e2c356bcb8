//! The session-acquisition boundary.
//!
//! Logging into the portal, parsing the `Favorite`/`Object` XML profile, and
//! keeping a cookie jar are all out of scope for this crate. What the tunnel
//! core does need from that process is captured here as
//! a plain data type, so [`crate::link::connect`] can be exercised against a
//! hand-built `SessionInfo` in tests without a real portal.

use std::net::Ipv4Addr;

/// Everything the link needs out of a completed portal login.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// `Session-Id` cookie value.
    pub session_id: String,
    /// The `Z` URL parameter some F5 deployments require.
    pub ur_z: String,
    /// Gateway host/IP to dial for the tunnel connection.
    pub server: String,
    /// TLS port (default 443).
    pub tls_port: u16,
    /// DTLS port, if the profile advertises one.
    pub dtls_port: Option<u16>,
    /// Whether the profile allows DTLS for this session.
    pub dtls_allowed: bool,
    /// DNS servers the gateway wants the client to use.
    pub dns_servers: Vec<Ipv4Addr>,
    /// DNS search suffix advertised by the gateway, if any.
    pub dns_suffix: Option<String>,
    /// Subnets the gateway asks the client to exclude from the tunnel.
    pub exclude_subnets: Vec<ipnet::Ipv4Net>,
    /// Whether the profile negotiates IPv6 in addition to IPv4.
    pub ipv6: bool,
}

/// Response headers the gateway sends back on the initial `GET /myvpn` TLS
/// handshake, naming the client/server tunnel endpoint addresses. Parsing
/// these out of the raw HTTP/1.0 response is the one piece of the session
/// handshake this crate *does* own, since it is part of the tunnel wire
/// protocol rather than the portal login flow.
#[derive(Debug, Clone, Default)]
pub struct TunnelEndpoints {
    pub local_ipv4: Option<Ipv4Addr>,
    pub server_ipv4: Option<Ipv4Addr>,
    pub local_ipv6: Option<std::net::Ipv6Addr>,
    pub server_ipv6: Option<std::net::Ipv6Addr>,
}

impl TunnelEndpoints {
    /// Parses the `X-VPN-client-IP` / `X-VPN-server-IP` (and IPv6 variants)
    /// headers out of the raw HTTP/1.0 response text the gateway sends
    /// before switching the TLS stream to raw F5 framing.
    pub fn parse(response: &str) -> TunnelEndpoints {
        let mut out = TunnelEndpoints::default();
        for line in response.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match name {
                "X-VPN-client-IP" => out.local_ipv4 = value.parse().ok(),
                "X-VPN-server-IP" => out.server_ipv4 = value.parse().ok(),
                "X-VPN-client-IPv6" => out.local_ipv6 = value.parse().ok(),
                "X-VPN-server-IPv6" => out.server_ipv6 = value.parse().ok(),
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoint_headers() {
        let resp = "HTTP/1.0 200 OK\r\nX-VPN-client-IP: 10.10.0.5\r\nX-VPN-server-IP: 10.10.0.1\r\n\r\n";
        let endpoints = TunnelEndpoints::parse(resp);
        assert_eq!(endpoints.local_ipv4, Some("10.10.0.5".parse().unwrap()));
        assert_eq!(endpoints.server_ipv4, Some("10.10.0.1".parse().unwrap()));
        assert_eq!(endpoints.local_ipv6, None);
    }
}
