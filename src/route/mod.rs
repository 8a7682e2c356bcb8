//! Route handler (C6).
//!
//! Grounded in two sources: `utils::sys_route::SysRoute`
//! (shelling out to the platform `ip`/`route` binary per-OS, with idempotent
//! "already exists"/"not found" handling) for *how* routes get installed,
//! and `original_source/pkg/link.go::waitAndConfig`/`routes_linux.go` for
//! *what* gets installed: first a "pin" route to the gateway's own IP via
//! whatever the pre-VPN default gateway already was (so the TLS/DTLS
//! transport itself is never pulled into the tunnel), then the tunneled
//! route set (`0.0.0.0/0` minus reserved ranges minus the server's
//! `ExcludeSubnets`).

pub mod ipset;

use std::net::Ipv4Addr;
use std::process::Command;

use ipnet::Ipv4Net;

use crate::error::TunnelError;
use ipset::{reserved_ranges, Ipv4Set};

/// Routes this crate has installed, tracked so `restore` can remove exactly
/// what `apply` added — mirroring `vpnLink`'s `routesReady`/
/// `serverRoutesReady` booleans and `gateways`/`serverIPs` fields.
pub struct AppliedRoutes {
    tun_name: String,
    pin_routes: Vec<(Ipv4Addr, Ipv4Addr)>,
    tunnel_gateway: Ipv4Addr,
    tunneled_nets: Vec<Ipv4Net>,
}

/// Looks up the gateway currently used to reach `dst`, equivalent to
/// `routes_linux.go::routeGet` (there implemented via `netlink.RouteGet`;
/// here via shelling to `ip route get`, consistent with this crate's
/// Command-based approach to route manipulation elsewhere).
pub fn route_get(dst: Ipv4Addr) -> Result<Ipv4Addr, TunnelError> {
    let output = Command::new("ip")
        .args(["route", "get", &dst.to_string()])
        .output()
        .map_err(|e| TunnelError::ConfigureFailed { what: "route lookup", source: e.into() })?;
    if !output.status.success() {
        return Err(TunnelError::NoRoute(dst.into()));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    parse_route_get_gateway(&text).ok_or(TunnelError::NoRoute(dst.into()))
}

fn parse_route_get_gateway(text: &str) -> Option<Ipv4Addr> {
    let mut tokens = text.split_whitespace();
    while let Some(tok) = tokens.next() {
        if tok == "via" {
            return tokens.next()?.parse().ok();
        }
    }
    None
}

fn run_ip(args: &[&str], allow: &[&str]) -> Result<(), TunnelError> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .map_err(|e| TunnelError::ConfigureFailed { what: "ip route", source: e.into() })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if allow.iter().any(|needle| stderr.contains(needle)) {
        return Ok(());
    }
    Err(TunnelError::ConfigureFailed { what: "ip route", source: anyhow::anyhow!(stderr.into_owned()) })
}

/// Installs pin routes for each resolved gateway address plus the
/// tunneled default-route-minus-exclusions set, all via `tun_name`.
pub fn apply(
    tun_name: &str,
    server_ips: &[Ipv4Addr],
    peer_gateway: Ipv4Addr,
    exclude_subnets: &[Ipv4Net],
    extra_routes: &[Ipv4Net],
) -> Result<AppliedRoutes, TunnelError> {
    let mut pin_routes = Vec::new();
    for &dst in server_ips {
        let gw = route_get(dst)?;
        run_ip(
            &["route", "add", &format!("{dst}/32"), "via", &gw.to_string(), "metric", "1"],
            &["File exists"],
        )?;
        pin_routes.push((dst, gw));
    }

    let excluded = Ipv4Set::from_nets(exclude_subnets);
    let reserved = Ipv4Set::from_nets(&reserved_ranges());
    let pinned: Vec<Ipv4Net> = server_ips.iter().map(|&ip| Ipv4Net::new(ip, 32).expect("32 is a valid IPv4 prefix")).collect();
    let pinned = Ipv4Set::from_nets(&pinned);
    let tunneled = Ipv4Set::all().subtract(&reserved).subtract(&excluded).subtract(&pinned);
    let mut tunneled_nets = tunneled.to_nets();
    tunneled_nets.extend_from_slice(extra_routes);

    for net in &tunneled_nets {
        run_ip(
            &["route", "add", &net.to_string(), "via", &peer_gateway.to_string(), "dev", tun_name],
            &["File exists"],
        )?;
    }

    Ok(AppliedRoutes {
        tun_name: tun_name.to_string(),
        pin_routes,
        tunnel_gateway: peer_gateway,
        tunneled_nets,
    })
}

/// Reverses exactly what `apply` installed, best-effort (mirrors
/// `restoreConfig`'s behavior of logging rather than failing on any single
/// route removal).
pub fn restore(applied: &AppliedRoutes) {
    for (dst, gw) in &applied.pin_routes {
        if let Err(e) = run_ip(
            &["route", "del", &format!("{dst}/32"), "via", &gw.to_string()],
            &["No such process"],
        ) {
            tracing::warn!("failed to remove pin route to {dst}: {e}");
        }
    }
    for net in &applied.tunneled_nets {
        if let Err(e) = run_ip(
            &["route", "del", &net.to_string(), "via", &applied.tunnel_gateway.to_string(), "dev", &applied.tun_name],
            &["No such process"],
        ) {
            tracing::warn!("failed to remove route {net}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gateway_from_ip_route_get_output() {
        let text = "10.0.0.5 via 192.168.1.1 dev eth0 src 192.168.1.50 uid 1000\n    cache\n";
        assert_eq!(parse_route_get_gateway(text), Some("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn parses_none_when_no_gateway_hop() {
        let text = "192.168.1.50 dev eth0 src 192.168.1.50 uid 1000\n";
        assert_eq!(parse_route_get_gateway(text), None);
    }
}
