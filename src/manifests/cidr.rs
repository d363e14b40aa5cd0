// src/manifests/cidr.rs

use std::net::IpAddr;

/// Picks the per-node CIDR mask the controller manager should carve out
/// of the pod subnet. IPv4 nodes always get a /24. For IPv6 the mask is
/// chosen on byte boundaries so each node receives at least 256
/// addresses; subnets tighter than that are passed through unchanged and
/// rejected later by flag validation.
pub fn calc_node_cidr_mask_size(pod_subnet: &str) -> Option<u8> {
    let (address, prefix) = split_cidr(pod_subnet)?;
    match address {
        IpAddr::V4(_) => Some(24),
        IpAddr::V6(_) => Some(ipv6_node_mask(prefix)),
    }
}

fn ipv6_node_mask(pod_bits: u8) -> u8 {
    if pod_bits > 112 {
        return pod_bits;
    }
    if pod_bits == 112 {
        return 120;
    }
    // Widest byte-aligned mask that still leaves more than one node
    // subnet inside the pod range.
    128 - ((128 - pod_bits - 1) / 8 - 1) * 8
}

fn split_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (address, prefix) = cidr.split_once('/')?;
    let address: IpAddr = address.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix > max {
        return None;
    }
    Some((address, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_subnets_always_use_slash_24() {
        assert_eq!(calc_node_cidr_mask_size("10.244.0.0/16"), Some(24));
        assert_eq!(calc_node_cidr_mask_size("192.168.0.0/24"), Some(24));
    }

    #[test]
    fn ipv6_slash_112_becomes_slash_120() {
        assert_eq!(calc_node_cidr_mask_size("fd00::/112"), Some(120));
    }

    #[test]
    fn wide_ipv6_subnets_round_to_byte_boundaries() {
        assert_eq!(calc_node_cidr_mask_size("fd00::/64"), Some(80));
        assert_eq!(calc_node_cidr_mask_size("fd00::/104"), Some(120));
        assert_eq!(calc_node_cidr_mask_size("fd00::/96"), Some(112));
    }

    #[test]
    fn tight_ipv6_subnets_pass_through() {
        assert_eq!(calc_node_cidr_mask_size("fd00::/120"), Some(120));
        assert_eq!(calc_node_cidr_mask_size("fd00::/126"), Some(126));
    }

    #[test]
    fn malformed_subnets_are_rejected() {
        assert_eq!(calc_node_cidr_mask_size("not-a-cidr"), None);
        assert_eq!(calc_node_cidr_mask_size("10.0.0.0/40"), None);
    }
}
