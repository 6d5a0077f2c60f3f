use crate::candidate::{CandidateInfo, CandidateType};
use crate::checklist::{CandidatePair, CheckList};
use crate::control::Role;

/// Builds checklist pairs from the current local/remote candidate sets per
/// Section 4.7: same component id, same IP family, PeerReflexive locals
/// never paired (they only arise from check responses), and a Relayed
/// local is never paired against a Loopback remote.
pub fn pair_candidates(
    locals: &[CandidateInfo],
    remotes: &[CandidateInfo],
    role: Role,
    checklist: &mut CheckList,
    num_components: usize,
) {
    for local in locals {
        if local.candidate_type == CandidateType::PeerReflexive {
            continue;
        }
        for remote in remotes {
            if local.component_id != remote.component_id {
                continue;
            }
            if local.address.ip.is_ipv4() != remote.address.ip.is_ipv4() {
                continue;
            }
            if local.is_relayed() && remote.address.is_loopback() {
                continue;
            }

            let (controlling_priority, controlled_priority) = match role {
                Role::Controlling => (local.priority, remote.priority),
                _ => (remote.priority, local.priority),
            };

            let pair = CandidatePair::new(
                local.clone(),
                remote.clone(),
                controlling_priority,
                controlled_priority,
            );
            checklist.add_and_prune(pair, num_components);
        }
    }
}

#[cfg(test)]
mod pairing_test {
    use super::*;
    use crate::transport_address::TransportAddress;
    use std::net::{IpAddr, Ipv4Addr};

    fn info(priority: u32, component_id: u8, octet: u8, relayed: bool) -> CandidateInfo {
        let addr = TransportAddress::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet)),
            5000 + octet as u16,
        );
        CandidateInfo {
            id: octet as u64,
            candidate_type: if relayed {
                CandidateType::Relayed
            } else {
                CandidateType::Host
            },
            priority,
            component_id,
            foundation: format!("f{octet}"),
            address: addr,
            base_address: addr,
            related_address: None,
            network_index: 0,
            opaque_id: 0,
        }
    }

    #[test]
    fn test_pairing_skips_mismatched_components() {
        let locals = vec![info(1000, 1, 1, false)];
        let remotes = vec![info(1000, 2, 2, false)];
        let mut cl = CheckList::new();
        pair_candidates(&locals, &remotes, Role::Controlling, &mut cl, 1);
        assert!(cl.pairs().is_empty());
    }

    #[test]
    fn test_pairing_builds_one_pair_for_matching_component() {
        let locals = vec![info(1000, 1, 1, false)];
        let remotes = vec![info(2000, 1, 9, false)];
        let mut cl = CheckList::new();
        pair_candidates(&locals, &remotes, Role::Controlling, &mut cl, 1);
        assert_eq!(cl.pairs().len(), 1);
    }

    #[test]
    fn test_pairing_skips_relayed_local_against_loopback_remote() {
        let locals = vec![info(1000, 1, 1, true)];
        let mut remote = info(2000, 1, 9, false);
        remote.address = TransportAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6000);
        let mut cl = CheckList::new();
        pair_candidates(&locals, &[remote], Role::Controlling, &mut cl, 1);
        assert!(cl.pairs().is_empty());
    }
}
