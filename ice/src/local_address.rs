use crate::network_type::{classify_scope, AddressScope, InterfaceType};
use std::net::IpAddr;

/// LocalAddress is one enumerated host interface address, as produced by
/// whatever address-enumeration facility the embedder wires in (this crate
/// does not enumerate interfaces itself; see the Non-goals on platform
/// interface listing).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalAddress {
    pub ip: IpAddr,
    pub interface_index: u32,
    pub interface_type: InterfaceType,
}

impl LocalAddress {
    pub fn new(ip: IpAddr, interface_index: u32, interface_type: InterfaceType) -> Self {
        LocalAddress {
            ip,
            interface_index,
            interface_type,
        }
    }

    pub fn scope(&self) -> AddressScope {
        classify_scope(&self.ip)
    }
}

/// Sorts local addresses by the order Host candidates should be gathered
/// and prioritized in: broadest scope first, IPv6 ahead of IPv4 within the
/// same scope. Narrower-scope addresses (loopback, link-local) sort last
/// since they rarely produce a usable candidate pair but are still gathered
/// (RFC 8445 does not forbid them).
pub fn sort_for_gathering(addrs: &mut [LocalAddress]) {
    addrs.sort_by(|a, b| {
        b.scope()
            .cmp(&a.scope())
            .then_with(|| b.ip.is_ipv6().cmp(&a.ip.is_ipv6()))
            .then_with(|| a.interface_index.cmp(&b.interface_index))
    });
}

#[cfg(test)]
mod local_address_test {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_sort_prefers_global_then_ipv6() {
        let mut addrs = vec![
            LocalAddress::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1, InterfaceType::Unknown),
            LocalAddress::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)), 2, InterfaceType::Ethernet),
            LocalAddress::new(
                "2001:db8::1".parse().unwrap(),
                3,
                InterfaceType::Ethernet,
            ),
        ];
        sort_for_gathering(&mut addrs);
        assert_eq!(addrs[0].interface_index, 3);
        assert_eq!(addrs[1].interface_index, 2);
        assert_eq!(addrs[2].interface_index, 1);
    }
}
