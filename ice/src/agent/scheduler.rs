use std::sync::Arc;

use stun::attributes::ATTR_PRIORITY;
use stun::message::{Message, BINDING_REQUEST, BINDING_SUCCESS};

use crate::candidate::{CandidateInfo, CandidateType};
use crate::checklist::{CandidatePair, CandidatePairState};
use crate::component::Component;
use crate::control::{AttrControl, Role, TieBreaker};
use crate::transaction_pool::{Credentials, TransactionPool};
use crate::use_candidate::UseCandidateAttr;

/// Scheduler tick decision (Section 4.8): triggered FIFO first, then the
/// highest-priority Waiting pair, then the highest-priority Frozen pair.
pub fn next_check(component: &mut Component) -> Option<usize> {
    if let Some(idx) = component.checklist.pop_triggered() {
        if let Some(pair) = component.checklist.pair_mut(idx) {
            pair.is_triggered = true;
        }
        return Some(idx);
    }
    if let Some(idx) = component.checklist.highest_waiting() {
        return Some(idx);
    }
    component.checklist.highest_frozen()
}

pub enum CheckOutcome {
    Valid,
    Nominated,
    Failed,
    SessionFailed,
}

/// Runs one connectivity check to completion: builds the Binding Request
/// with the attributes Section 4.8 requires, sends it through the
/// transport's Transaction Pool, and applies the success/error handling.
#[allow(clippy::too_many_arguments)]
pub async fn run_check(
    pool: &Arc<TransactionPool>,
    conn: &(dyn util::Conn + Send + Sync),
    component: &mut Component,
    idx: usize,
    role: Role,
    tie_breaker: u64,
    include_use_candidate: bool,
    check_priority: u32,
    local_candidates: &mut Vec<CandidateInfo>,
    local_ufrag: &str,
    remote_ufrag: &str,
    remote_password: &str,
) -> CheckOutcome {
    let (remote_addr, component_id) = {
        let pair = match component.checklist.pair_mut(idx) {
            Some(p) => p,
            None => return CheckOutcome::Failed,
        };
        pair.state = CandidatePairState::InProgress;
        (pair.remote.address, pair.local.component_id)
    };

    // Section 4.6's peer-reflexive priority, not the host candidate's own
    // priority: RFC 8445 Section 7.1.1 requires a check's PRIORITY
    // attribute to carry the priority the remote would assign this
    // candidate if discovered as peer-reflexive, so the responder's
    // prflx-promoted remote candidate sorts correctly.
    let mut request = Message::new();
    request.typ = BINDING_REQUEST;
    request.add(ATTR_PRIORITY, &check_priority.to_be_bytes());

    let control = AttrControl {
        role,
        tie_breaker: TieBreaker(tie_breaker),
    };
    if let Err(e) = stun::message::Setter::add_to(&control, &mut request) {
        log::warn!("failed to attach role attribute to binding request: {e}");
        return CheckOutcome::Failed;
    }

    if include_use_candidate {
        if let Err(e) = stun::message::Setter::add_to(&UseCandidateAttr::new(), &mut request) {
            log::warn!("failed to attach USE-CANDIDATE: {e}");
            return CheckOutcome::Failed;
        }
    }

    let credentials = Credentials::ShortTerm {
        username: format!("{remote_ufrag}:{local_ufrag}"),
        password: remote_password.to_string(),
    };

    let result = pool
        .start(conn, remote_addr.into(), request, Some(credentials))
        .await;

    match result {
        Ok(response) if response.typ == BINDING_SUCCESS => {
            apply_success(
                component,
                idx,
                &response,
                role,
                include_use_candidate,
                check_priority,
                local_candidates,
                component_id,
            )
        }
        _ => apply_error(component, idx, role, include_use_candidate),
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_success(
    component: &mut Component,
    idx: usize,
    response: &Message,
    role: Role,
    we_sent_use_candidate: bool,
    check_priority: u32,
    local_candidates: &mut Vec<CandidateInfo>,
    component_id: u8,
) -> CheckOutcome {
    use stun::xoraddr::XorMappedAddress;

    let mut mapped = XorMappedAddress::default();
    if stun::message::Getter::get_from(&mut mapped, response).is_err() {
        return apply_error(component, idx, role, we_sent_use_candidate);
    }
    let mapped_addr = crate::transport_address::TransportAddress::new(mapped.ip, mapped.port);

    let local_matches = component
        .checklist
        .pair(idx)
        .map(|p| p.local.address == mapped_addr)
        .unwrap_or(false);

    let resolved_idx = if local_matches {
        idx
    } else {
        discover_peer_reflexive(
            component,
            idx,
            mapped_addr,
            check_priority,
            local_candidates,
            component_id,
            role,
        )
    };

    let (foundation, is_nominated) = {
        let pair = match component.checklist.pair_mut(resolved_idx) {
            Some(p) => p,
            None => return CheckOutcome::Failed,
        };
        pair.state = CandidatePairState::Succeeded;
        pair.is_valid = true;
        // USE-CANDIDATE only ever rides on a request, never on the response
        // to it, so nomination from this (Initiator-sent) side of a check
        // is decided entirely by whether we sent it. Never clear a
        // nomination the Responder path already marked on this same pair
        // from the peer's own triggered check (responder.rs).
        pair.is_nominated = pair.is_nominated || we_sent_use_candidate;
        (pair.foundation_pair.0.clone(), pair.is_nominated)
    };

    component.checklist.insert_valid(resolved_idx);
    component.has_valid = true;
    let highest = component.checklist.highest_priority_valid();
    if let Some(h) = highest {
        if h == resolved_idx {
            if let Some(priority) = component.checklist.pair(resolved_idx).map(|p| p.priority) {
                component.checklist.optimize_below(component_id, priority);
            }
        }
    }
    component.checklist.unfreeze_foundation(&foundation);

    if is_nominated {
        component.has_nominated = true;
        CheckOutcome::Nominated
    } else {
        CheckOutcome::Valid
    }
}

/// Section 4.8's peer-reflexive discovery: find an existing local candidate
/// whose base or address equals the mapped address, or synthesize one with
/// base = the checked pair's local base and priority = the PRIORITY
/// attribute the request actually carried (`check_priority`, Section 4.6's
/// peer-reflexive-priority formula — never the host candidate's own
/// priority).
fn discover_peer_reflexive(
    component: &mut Component,
    idx: usize,
    mapped_addr: crate::transport_address::TransportAddress,
    check_priority: u32,
    local_candidates: &mut Vec<CandidateInfo>,
    component_id: u8,
    role: Role,
) -> usize {
    let existing = local_candidates
        .iter()
        .position(|c| c.base_address == mapped_addr || c.address == mapped_addr);

    let local = if let Some(pos) = existing {
        local_candidates[pos].clone()
    } else {
        let base = component
            .checklist
            .pair(idx)
            .map(|p| p.local.base_address)
            .unwrap_or(mapped_addr);
        let new_local = CandidateInfo {
            id: crate::rand::generate_cand_id(),
            candidate_type: CandidateType::PeerReflexive,
            priority: check_priority,
            component_id,
            foundation: CandidateInfo::compute_foundation(
                CandidateType::PeerReflexive,
                &base.ip,
                None,
                "udp",
            ),
            address: mapped_addr,
            base_address: base,
            related_address: None,
            network_index: 0,
            opaque_id: 0,
        };
        local_candidates.push(new_local.clone());
        new_local
    };

    let remote = match component.checklist.pair(idx) {
        Some(p) => p.remote.clone(),
        None => return idx,
    };
    let (controlling_priority, controlled_priority) = match role {
        Role::Controlling => (local.priority, remote.priority),
        _ => (remote.priority, local.priority),
    };
    let pair = CandidatePair::new(local, remote, controlling_priority, controlled_priority);
    component.checklist.add_and_prune(pair, 1)
}

fn apply_error(
    component: &mut Component,
    idx: usize,
    _role: Role,
    was_final_nomination: bool,
) -> CheckOutcome {
    let fatal = {
        let pair = match component.checklist.pair_mut(idx) {
            Some(p) => p,
            None => return CheckOutcome::Failed,
        };
        pair.state = CandidatePairState::Failed;
        pair.is_valid = false;
        was_final_nomination && pair.final_nomination
    };
    component.checklist.remove_valid(idx);
    if fatal {
        CheckOutcome::SessionFailed
    } else {
        CheckOutcome::Failed
    }
}
