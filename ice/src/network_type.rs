use std::fmt;
use std::net::IpAddr;

/// InterfaceType distinguishes the kind of network interface a local
/// address was enumerated from. It feeds the Host-candidate type
/// preference: an interface known to be virtual (a VPN or container
/// bridge) gets a type-preference of 0 instead of 126 (RFC 8445 Section
/// 5.1.2.1 rationale: such paths are rarely the best one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceType {
    Ethernet,
    Wifi,
    Virtual,
    Unknown,
}

impl InterfaceType {
    pub fn is_virtual(&self) -> bool {
        matches!(self, InterfaceType::Virtual)
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterfaceType::Ethernet => "ethernet",
            InterfaceType::Wifi => "wifi",
            InterfaceType::Virtual => "virtual",
            InterfaceType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// AddressScope orders candidate local addresses by how likely they are to
/// be globally reachable, narrowest first. RFC 8445 Section 5.1.1.1 leaves
/// enumeration order to the implementation; we sort ascending by this scope
/// so IPv6 is preferred over IPv4 within the same scope (ties broken by the
/// caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddressScope {
    Loopback,
    LinkLocal,
    // Deprecated fec0::/10 IPv6 site-local addresses (RFC 3879):
    // `classify_scope` never emits this today, kept for completeness.
    SiteLocal,
    Private,
    UniqueLocal,
    Global,
}

pub fn classify_scope(ip: &IpAddr) -> AddressScope {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_loopback() {
                AddressScope::Loopback
            } else if v4.is_link_local() {
                AddressScope::LinkLocal
            } else if v4.is_private() {
                AddressScope::Private
            } else {
                AddressScope::Global
            }
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                AddressScope::Loopback
            } else if (v6.segments()[0] & 0xffc0) == 0xfe80 {
                AddressScope::LinkLocal
            } else if (v6.segments()[0] & 0xfe00) == 0xfc00 {
                AddressScope::UniqueLocal
            } else {
                AddressScope::Global
            }
        }
    }
}
