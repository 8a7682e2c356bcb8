//! A minimal IPv4 interval set, the Rust equivalent of the Go
//! `github.com/IBM/netaddr` `IPSet` the original vendors for computing
//! "route everything except these subnets". Represented as a sorted,
//! merged list of half-open `[start, end)` `u32` intervals rather than a
//! CIDR tree, since the only operations this crate needs are
//! union/subtract over the full `0.0.0.0/0` space.

use ipnet::Ipv4Net;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ipv4Set {
    intervals: Vec<(u32, u32)>,
}

fn net_to_interval(net: &Ipv4Net) -> (u32, u32) {
    let start = u32::from(net.network());
    let end = start + (1u64 << (32 - net.prefix_len())) as u32 - 1;
    (start, end)
}

impl Ipv4Set {
    /// The entire IPv4 address space.
    pub fn all() -> Ipv4Set {
        Ipv4Set { intervals: vec![(0, u32::MAX)] }
    }

    pub fn empty() -> Ipv4Set {
        Ipv4Set { intervals: Vec::new() }
    }

    pub fn from_nets(nets: &[Ipv4Net]) -> Ipv4Set {
        let mut set = Ipv4Set::empty();
        for net in nets {
            set.add_interval(net_to_interval(net));
        }
        set
    }

    fn add_interval(&mut self, new: (u32, u32)) {
        self.intervals.push(new);
        self.intervals.sort_unstable();
        self.merge();
    }

    fn merge(&mut self) {
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.intervals.len());
        for (start, end) in self.intervals.drain(..) {
            match merged.last_mut() {
                Some((_, last_end)) if start <= last_end.saturating_add(1) => {
                    *last_end = (*last_end).max(end);
                }
                _ => merged.push((start, end)),
            }
        }
        self.intervals = merged;
    }

    /// Subtracts `other` from `self`, returning the remainder.
    pub fn subtract(&self, other: &Ipv4Set) -> Ipv4Set {
        let mut result = self.intervals.clone();
        for &(os, oe) in &other.intervals {
            let mut next = Vec::with_capacity(result.len());
            for (s, e) in result {
                if oe < s || os > e {
                    next.push((s, e));
                    continue;
                }
                if os > s {
                    next.push((s, os - 1));
                }
                if oe < e {
                    next.push((oe + 1, e));
                }
            }
            result = next;
        }
        Ipv4Set { intervals: result }
    }

    /// Expresses this set as the minimal list of CIDR blocks covering it.
    pub fn to_nets(&self) -> Vec<Ipv4Net> {
        let mut out = Vec::new();
        for &(start, end) in &self.intervals {
            out.extend(interval_to_nets(start, end));
        }
        out
    }
}

fn interval_to_nets(mut start: u32, end: u32) -> Vec<Ipv4Net> {
    let mut out = Vec::new();
    while start <= end {
        let max_size = if start == 0 { 32 } else { start.trailing_zeros() };
        let mut prefix = 32 - max_size;
        loop {
            let block_size = 1u64 << (32 - prefix);
            if block_size - 1 > (end - start) as u64 {
                prefix += 1;
            } else {
                break;
            }
        }
        out.push(Ipv4Net::new(start.into(), prefix as u8).expect("valid prefix"));
        let block_size = 1u64 << (32 - prefix);
        if start as u64 + block_size > end as u64 + 1 {
            break;
        }
        start = (start as u64 + block_size) as u32;
        if start == 0 {
            break;
        }
    }
    out
}

/// The reserved (non-routable / special-use) ranges that are always
/// excluded from the tunneled default route, exactly the four named in
/// `original_source/pkg/link.go::waitAndConfig`'s route-set computation:
/// "this host" (`0.0.0.0/8`), loopback, link-local, and multicast. Private
/// (RFC 1918) space is deliberately NOT excluded here — a server's
/// `ExcludeSubnets` list is the only thing that carves private ranges out
/// of the tunneled set, since many F5 deployments tunnel exactly that
/// space (10/8 VPN-internal networks).
pub fn reserved_ranges() -> Vec<Ipv4Net> {
    ["0.0.0.0/8", "127.0.0.0/8", "169.254.0.0/16", "224.0.0.0/4"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtract_removes_excluded_subnet() {
        let all = Ipv4Set::all();
        let excluded = Ipv4Set::from_nets(&["10.0.0.0/8".parse().unwrap()]);
        let remaining = all.subtract(&excluded);
        let nets = remaining.to_nets();
        assert!(!nets.iter().any(|n| n.to_string() == "0.0.0.0/0"));
        // 10.0.0.0/8 must not be present in the remaining coverage.
        let probe: Ipv4Net = "10.1.2.3/32".parse().unwrap();
        assert!(!nets.iter().any(|n| n.contains(&probe.addr())));
    }

    #[test]
    fn subtract_nothing_is_identity() {
        let all = Ipv4Set::all();
        let remaining = all.subtract(&Ipv4Set::empty());
        assert_eq!(remaining.to_nets(), all.to_nets());
    }
}
