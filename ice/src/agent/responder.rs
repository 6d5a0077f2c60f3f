use std::net::SocketAddr;

use stun::attributes::ATTR_PRIORITY;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::{Message, Setter, BINDING_REQUEST, BINDING_SUCCESS};
use stun::textattrs::Username;
use stun::xoraddr::XorMappedAddress;

use crate::candidate::{CandidateInfo, CandidateType};
use crate::checklist::{CandidatePair, CandidatePairState};
use crate::component::Component;
use crate::control::Role;
use crate::transport_address::TransportAddress;
use crate::use_candidate::UseCandidateAttr;

/// Outcome of handling one inbound datagram that parsed as STUN but was not
/// claimed by the Transaction Pool.
pub enum Handled {
    /// A Binding Request that validated against our local credentials;
    /// carries the Binding Success response ready to send back to the
    /// sender.
    Reply(Vec<u8>),
    /// Not a request we answer: a stray/late response to a transaction we
    /// no longer track, a Binding Request with the wrong USERNAME or a
    /// failed MESSAGE-INTEGRITY check, or something that doesn't parse as a
    /// request at all.
    Ignored,
}

/// Section 4.7/4.8/4.9's Responder path, grounded on the original
/// implementation's read-loop dispatch for incoming connectivity checks:
/// validate the request against our local ufrag/password, learn a
/// peer-reflexive remote candidate when the source doesn't already match a
/// known remote candidate (RFC 8445 Section 7.3.1.3), queue a triggered
/// check for the pair (Section 7.3.1.4), and build the Binding Success
/// reply.
#[allow(clippy::too_many_arguments)]
pub fn handle_request(
    component: &mut Component,
    remote_candidates: &mut Vec<CandidateInfo>,
    local: &CandidateInfo,
    local_ufrag: &str,
    local_password: &str,
    remote_ufrag: &str,
    role: Role,
    from: SocketAddr,
    mut request: Message,
) -> Handled {
    if request.typ != BINDING_REQUEST {
        return Handled::Ignored;
    }

    let username = match Username::get_from_as(&request, stun::attributes::ATTR_USERNAME) {
        Ok(u) => u,
        Err(_) => {
            log::debug!("binding request from {from} missing USERNAME");
            return Handled::Ignored;
        }
    };
    let expected_username = format!("{local_ufrag}:{remote_ufrag}");
    if username.text != expected_username {
        log::debug!("binding request from {from} carried unexpected USERNAME {}", username.text);
        return Handled::Ignored;
    }
    if MessageIntegrity::new_short_term_integrity(local_password.to_string())
        .check(&mut request)
        .is_err()
    {
        log::debug!("binding request from {from} failed MESSAGE-INTEGRITY");
        return Handled::Ignored;
    }

    let use_candidate = UseCandidateAttr::is_set(&request);
    let priority = request
        .get(ATTR_PRIORITY)
        .ok()
        .filter(|v| v.len() == 4)
        .map(|v| u32::from_be_bytes([v[0], v[1], v[2], v[3]]))
        .unwrap_or(0);

    let remote = resolve_peer_reflexive(remote_candidates, from.into(), priority, local.component_id);
    do_triggered_check(component, local, &remote, role, use_candidate);

    Handled::Reply(build_success_response(&request, from, local_password))
}

/// Finds the remote candidate this request's apparent source already
/// matches, or synthesizes a peer-reflexive one with the PRIORITY the peer
/// advertised (RFC 8445 Section 7.3.1.3). A later signalling-supplied
/// candidate at the same address still wins on type once it arrives,
/// since pairing always looks the address up fresh.
fn resolve_peer_reflexive(
    remote_candidates: &mut Vec<CandidateInfo>,
    from: TransportAddress,
    priority: u32,
    component_id: u8,
) -> CandidateInfo {
    if let Some(existing) = remote_candidates
        .iter()
        .find(|c| c.address == from && c.component_id == component_id)
    {
        return existing.clone();
    }

    let prflx = CandidateInfo {
        id: crate::rand::generate_cand_id(),
        candidate_type: CandidateType::PeerReflexive,
        priority,
        component_id,
        foundation: CandidateInfo::compute_foundation(CandidateType::PeerReflexive, &from.ip, None, "udp"),
        address: from,
        base_address: from,
        related_address: None,
        network_index: 0,
        opaque_id: 0,
    };
    remote_candidates.push(prflx.clone());
    prflx
}

/// RFC 8445 Section 7.3.1.4: find the pair for (local, remote) and decide
/// what a triggered check against it means.
/// - Already `Succeeded` and this request carried USE-CANDIDATE but the
///   pair wasn't nominated yet: flip `is_nominated` without re-running the
///   check (we already know this pair works).
/// - `InProgress`: let the in-flight check finish; only remember that its
///   result should count as a final nomination if this request asked for
///   one, and queue a follow-up triggered check if none is queued yet.
/// - Anything else, or no existing pair: queue (or create-then-queue) a
///   fresh triggered check.
fn do_triggered_check(
    component: &mut Component,
    local: &CandidateInfo,
    remote: &CandidateInfo,
    role: Role,
    use_candidate: bool,
) {
    let existing_idx = component
        .checklist
        .pairs()
        .iter()
        .position(|p| p.local.base_address == local.base_address && p.remote.address == remote.address);

    let idx = match existing_idx {
        Some(idx) => idx,
        None => {
            let (controlling_priority, controlled_priority) = match role {
                Role::Controlling => (local.priority, remote.priority),
                _ => (remote.priority, local.priority),
            };
            let mut pair = CandidatePair::new(local.clone(), remote.clone(), controlling_priority, controlled_priority);
            pair.final_nomination = use_candidate;
            component.checklist.add_and_prune(pair, 1)
        }
    };

    let Some(pair) = component.checklist.pair_mut(idx) else {
        return;
    };

    match pair.state {
        CandidatePairState::Succeeded => {
            if use_candidate && !pair.is_nominated {
                pair.is_nominated = true;
                component.has_nominated = true;
                component.checklist.insert_valid(idx);
            }
        }
        CandidatePairState::InProgress => {
            if use_candidate {
                pair.final_nomination = true;
            }
            if !pair.is_triggered {
                pair.is_triggered_for_nominated = use_candidate;
                component.checklist.push_triggered(idx);
            }
        }
        _ => {
            if existing_idx.is_some() {
                pair.final_nomination = use_candidate;
            }
            pair.is_triggered_for_nominated = use_candidate;
            component.checklist.push_triggered(idx);
        }
    }
}

/// Builds a Binding Success response carrying XOR-MAPPED-ADDRESS (set to
/// the request's apparent source, which is exactly what a STUN responder
/// reflects back), keyed MESSAGE-INTEGRITY, and FINGERPRINT, echoing the
/// request's transaction id.
fn build_success_response(request: &Message, from: SocketAddr, local_password: &str) -> Vec<u8> {
    let mut response = Message::new();
    response.typ = BINDING_SUCCESS;
    let _ = request.add_to(&mut response);

    let mapped = XorMappedAddress {
        ip: from.ip(),
        port: from.port(),
    };
    let _ = mapped.add_to(&mut response);
    let _ = MessageIntegrity::new_short_term_integrity(local_password.to_string()).add_to(&mut response);
    let _ = FINGERPRINT.add_to(&mut response);
    response.write_header();
    response.raw.clone()
}

#[cfg(test)]
mod responder_test {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use stun::message::Getter as _;

    fn addr(octet: u8, port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, octet)), port)
    }

    fn local_candidate() -> CandidateInfo {
        CandidateInfo {
            id: 1,
            candidate_type: CandidateType::Host,
            priority: 2_130_706_431,
            component_id: 1,
            foundation: "local".into(),
            address: addr(1, 5000).into(),
            base_address: addr(1, 5000).into(),
            related_address: None,
            network_index: 0,
            opaque_id: 0,
        }
    }

    fn signed_request(username: &str, password: &str, use_candidate: bool) -> Message {
        let mut m = Message::new();
        m.typ = BINDING_REQUEST;
        m.add(ATTR_PRIORITY, &1_000_000u32.to_be_bytes());
        if use_candidate {
            let _ = UseCandidateAttr::new().add_to(&mut m);
        }
        let _ = Username::new(stun::attributes::ATTR_USERNAME, username.to_string()).add_to(&mut m);
        let _ = MessageIntegrity::new_short_term_integrity(password.to_string()).add_to(&mut m);
        m.write_header();
        // Round-trip through the wire format so `Message::get`'s attribute
        // offsets (used by MESSAGE-INTEGRITY::check) match what a real
        // inbound datagram would decode to.
        let raw = m.raw.clone();
        let mut decoded = Message::new();
        decoded.unmarshal_binary(&raw).unwrap();
        decoded
    }

    #[test]
    fn test_valid_request_learns_peer_reflexive_and_queues_triggered_check() {
        let mut component = Component::new(1);
        let mut remotes = Vec::new();
        let local = local_candidate();
        let from = addr(2, 6000);

        let request = signed_request("local-ufrag:remote-ufrag", "local-pass", false);
        let outcome = handle_request(
            &mut component,
            &mut remotes,
            &local,
            "local-ufrag",
            "local-pass",
            "remote-ufrag",
            Role::Controlled,
            from,
            request,
        );
        assert!(matches!(outcome, Handled::Reply(_)));
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].candidate_type, CandidateType::PeerReflexive);
        assert_eq!(component.checklist.pairs().len(), 1);
        assert!(component.checklist.pairs()[0].is_triggered_for_nominated == false);
    }

    #[test]
    fn test_use_candidate_on_already_succeeded_pair_flips_nomination_without_new_check() {
        let mut component = Component::new(1);
        let mut remotes = Vec::new();
        let local = local_candidate();
        let from = addr(2, 6000);

        let remote = CandidateInfo {
            id: 2,
            candidate_type: CandidateType::Host,
            priority: 1_000_000,
            component_id: 1,
            foundation: "remote".into(),
            address: from.into(),
            base_address: from.into(),
            related_address: None,
            network_index: 0,
            opaque_id: 0,
        };
        let mut pair = CandidatePair::new(local.clone(), remote, local.priority, 1_000_000);
        pair.state = CandidatePairState::Succeeded;
        let idx = component.checklist.add_and_prune(pair, 1);
        component.checklist.insert_valid(idx);

        let request = signed_request("local-ufrag:remote-ufrag", "local-pass", true);
        let outcome = handle_request(
            &mut component,
            &mut remotes,
            &local,
            "local-ufrag",
            "local-pass",
            "remote-ufrag",
            Role::Controlled,
            from,
            request,
        );
        assert!(matches!(outcome, Handled::Reply(_)));
        assert!(component.checklist.pairs()[0].is_nominated);
        assert!(component.has_nominated);
    }

    #[test]
    fn test_wrong_username_is_ignored() {
        let mut component = Component::new(1);
        let mut remotes = Vec::new();
        let local = local_candidate();
        let from = addr(2, 6000);

        let request = signed_request("wrong:pair", "local-pass", false);
        let outcome = handle_request(
            &mut component,
            &mut remotes,
            &local,
            "local-ufrag",
            "local-pass",
            "remote-ufrag",
            Role::Controlled,
            from,
            request,
        );
        assert!(matches!(outcome, Handled::Ignored));
        assert!(remotes.is_empty());
    }

    #[test]
    fn test_wrong_password_fails_integrity_check() {
        let mut component = Component::new(1);
        let mut remotes = Vec::new();
        let local = local_candidate();
        let from = addr(2, 6000);

        let request = signed_request("local-ufrag:remote-ufrag", "not-the-local-pass", false);
        let outcome = handle_request(
            &mut component,
            &mut remotes,
            &local,
            "local-ufrag",
            "local-pass",
            "remote-ufrag",
            Role::Controlled,
            from,
            request,
        );
        assert!(matches!(outcome, Handled::Ignored));
    }

    #[test]
    fn test_response_message_echoes_transaction_id_and_is_well_formed() {
        let mut component = Component::new(1);
        let mut remotes = Vec::new();
        let local = local_candidate();
        let from = addr(2, 6000);

        let request = signed_request("local-ufrag:remote-ufrag", "local-pass", false);
        let sent_transaction_id = request.transaction_id;
        let outcome = handle_request(
            &mut component,
            &mut remotes,
            &local,
            "local-ufrag",
            "local-pass",
            "remote-ufrag",
            Role::Controlled,
            from,
            request,
        );
        let Handled::Reply(bytes) = outcome else {
            panic!("expected a reply");
        };
        let mut response = Message::new();
        response.unmarshal_binary(&bytes).unwrap();
        assert_eq!(response.typ, BINDING_SUCCESS);
        assert_eq!(response.transaction_id, sent_transaction_id);

        let mut mapped = XorMappedAddress::default();
        mapped.get_from(&response).unwrap();
        assert_eq!(mapped.ip, from.ip());
        assert_eq!(mapped.port, from.port());
    }
}
