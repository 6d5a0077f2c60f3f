use crate::transport_address::TransportAddress;
use std::fmt;

/// CandidateType per RFC 8445 Section 5.1.1, with the type-preference
/// constant it contributes to CandidateInfo::priority. Host candidates on a
/// virtual interface are demoted to 0, the same as Relayed, since they are
/// rarely the best path (RFC 8445 Section 5.1.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateType {
    Host,
    PeerReflexive,
    ServerReflexive,
    Relayed,
}

impl CandidateType {
    pub fn type_preference(&self, on_virtual_interface: bool) -> u32 {
        match self {
            CandidateType::Host if on_virtual_interface => 0,
            CandidateType::Host => 126,
            CandidateType::PeerReflexive => 110,
            CandidateType::ServerReflexive => 100,
            CandidateType::Relayed => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::Relayed => "relay",
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// default_priority computes the uint32 CandidateInfo priority (RFC 8445
/// Section 5.1.2.1): `(2^24 * type-pref) + (2^8 * local-pref) + (256 -
/// component-id)`. `local_pref` is capped to 16 bits and `component_id` to
/// 8 bits by the caller; both are asserted here as a defensive invariant
/// check during gathering, not a protocol requirement on wire-parsed data.
pub fn default_priority(type_pref: u32, local_pref: u32, component_id: u8) -> u32 {
    (type_pref << 24) + (local_pref << 8) + (256 - component_id as u32)
}

/// prflx_priority computes the PRIORITY attribute a connectivity check
/// carries for its sending local candidate (RFC 8445 Section 7.1.1,
/// Section 4.6's "Peer-reflexive priority"): `default_priority(PeerReflexive,
/// 65535 - slot, component_id)`, where `slot` is the candidate's ordinal
/// within its component's candidate array (direct-path ordinal; relayed
/// candidates are offset by 512 so they never collide with a direct-path
/// slot). `on_virtual_interface` is threaded through to `type_preference`
/// for symmetry with `default_priority`'s other callers, though it has no
/// effect on the PeerReflexive type preference itself.
pub fn prflx_priority(slot: u32, on_virtual_interface: bool, component_id: u8) -> u32 {
    let type_pref = CandidateType::PeerReflexive.type_preference(on_virtual_interface);
    let local_pref = 65535u32.saturating_sub(slot);
    default_priority(type_pref, local_pref, component_id)
}

/// CandidateInfo is the ICE core's candidate record: an address with a
/// type, a priority, and the provenance needed to foundation-group it with
/// other candidates discovered the same way.
#[derive(Debug, Clone)]
pub struct CandidateInfo {
    pub id: u64,
    pub candidate_type: CandidateType,
    pub priority: u32,
    pub component_id: u8,
    pub foundation: String,
    pub address: TransportAddress,
    pub base_address: TransportAddress,
    pub related_address: Option<TransportAddress>,
    pub network_index: u32,
    pub opaque_id: u64,
}

impl CandidateInfo {
    /// foundation is a stable string keyed by (type, base-ip, stun-server-ip,
    /// stun-transport). Candidates sharing a foundation are unfrozen
    /// together (RFC 8445 Section 7.2.5.3.3).
    pub fn compute_foundation(
        candidate_type: CandidateType,
        base_ip: &std::net::IpAddr,
        stun_server_ip: Option<&std::net::IpAddr>,
        stun_transport: &str,
    ) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        candidate_type.as_str().hash(&mut hasher);
        base_ip.hash(&mut hasher);
        if let Some(ip) = stun_server_ip {
            ip.hash(&mut hasher);
        }
        stun_transport.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }

    pub fn is_relayed(&self) -> bool {
        self.candidate_type == CandidateType::Relayed
    }
}

#[cfg(test)]
mod candidate_test {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_default_priority_matches_formula() {
        let p = default_priority(126, 65535, 1);
        assert_eq!(p, (126u32 << 24) + (65535u32 << 8) + 255);
    }

    #[test]
    fn test_virtual_interface_demotes_host_type_preference() {
        assert_eq!(CandidateType::Host.type_preference(true), 0);
        assert_eq!(CandidateType::Host.type_preference(false), 126);
    }

    #[test]
    fn test_prflx_priority_uses_peer_reflexive_type_preference_and_slot() {
        let p = prflx_priority(0, false, 1);
        assert_eq!(p, default_priority(110, 65535, 1));
        let p_second_slot = prflx_priority(1, false, 1);
        assert_eq!(p_second_slot, default_priority(110, 65534, 1));
        assert!(p_second_slot < p);
    }

    #[test]
    fn test_prflx_priority_never_reaches_host_type_preference() {
        // A relayed candidate's offset slot must still sort below any
        // direct-path prflx priority, and neither ever collides with a
        // type-126 Host priority.
        let direct = prflx_priority(0, false, 1);
        let relayed = prflx_priority(512, false, 1);
        assert!(relayed < direct);
        assert!(direct < default_priority(126, 65535, 1));
    }

    #[test]
    fn test_foundation_is_stable_for_identical_provenance() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let f1 = CandidateInfo::compute_foundation(CandidateType::Host, &ip, None, "udp");
        let f2 = CandidateInfo::compute_foundation(CandidateType::Host, &ip, None, "udp");
        assert_eq!(f1, f2);

        let other_ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let f3 = CandidateInfo::compute_foundation(CandidateType::Host, &other_ip, None, "udp");
        assert_ne!(f1, f3);
    }
}
