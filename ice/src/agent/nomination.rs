use std::time::Duration;

use crate::checklist::CandidatePairState;
use crate::component::Component;

/// NominationMode selects between aggressive (every initiator check carries
/// USE-CANDIDATE) and ordinary (a single synthetic nomination check after
/// the nomination timer expires) nomination, per Section 4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NominationMode {
    Aggressive,
    Ordinary,
}

/// True once a component has a selected pair, which under aggressive
/// nomination happens on the first valid pair once the nomination timer
/// expires, freezing in whatever is currently the best valid pair.
pub fn maybe_finalize_aggressive(component: &mut Component, now: Duration) -> bool {
    if component.selected_pair.is_some() {
        return false;
    }
    if !component.nomination_due(now) {
        return false;
    }
    if let Some(best) = component.checklist.highest_priority_valid() {
        component.selected_pair = Some(best);
        true
    } else {
        false
    }
}

/// Ordinary-mode nomination timer expiry: arms a synthetic triggered check
/// against the current highest-priority valid pair with USE-CANDIDATE and
/// `final_nomination=true`. For a Relayed candidate, nomination stays
/// deferred until gathering is known complete or no non-relayed pair is
/// still pending, so a cheaper path is not bypassed.
pub fn maybe_arm_ordinary_nomination(
    component: &mut Component,
    now: Duration,
    gathering_complete: bool,
) -> Option<usize> {
    if component.selected_pair.is_some() || component.has_nominated {
        return None;
    }
    if !component.nomination_due(now) {
        return None;
    }

    let best = component.checklist.highest_priority_valid()?;
    let is_relayed = component
        .checklist
        .pair(best)
        .map(|p| p.local.is_relayed())
        .unwrap_or(false);

    let non_relayed_still_pending = component.checklist.pairs().iter().any(|p| {
        !p.local.is_relayed()
            && matches!(
                p.state,
                CandidatePairState::Frozen | CandidatePairState::Waiting | CandidatePairState::InProgress
            )
    });

    if is_relayed && !gathering_complete && non_relayed_still_pending {
        return None;
    }

    if let Some(pair) = component.checklist.pair_mut(best) {
        pair.final_nomination = true;
    }
    component.checklist.push_triggered(best);
    Some(best)
}

/// Finalizes selection once the nominating check (aggressive or ordinary)
/// has succeeded: the component's selected pair is never replaced again
/// for the remainder of the session.
pub fn finalize_selection(component: &mut Component, nominated_idx: usize) {
    if component.selected_pair.is_none() {
        component.selected_pair = Some(nominated_idx);
    }
}

#[cfg(test)]
mod nomination_test {
    use super::*;
    use crate::candidate::{CandidateInfo, CandidateType};
    use crate::checklist::CandidatePair;
    use crate::transport_address::TransportAddress;
    use std::net::{IpAddr, Ipv4Addr};

    fn info(priority: u32) -> CandidateInfo {
        let addr = TransportAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5000);
        CandidateInfo {
            id: 1,
            candidate_type: CandidateType::Host,
            priority,
            component_id: 1,
            foundation: "f".into(),
            address: addr,
            base_address: addr,
            related_address: None,
            network_index: 0,
            opaque_id: 0,
        }
    }

    #[test]
    fn test_aggressive_finalizes_only_after_timer_due() {
        let mut c = Component::new(1);
        let pair = CandidatePair::new(info(3000), info(1), 3000, 1);
        c.checklist.add_and_prune(pair, 1);
        c.checklist.insert_valid(0);
        c.has_valid = true;
        c.arm_nomination_if_needed(Duration::from_millis(0));

        assert!(!maybe_finalize_aggressive(&mut c, Duration::from_millis(1000)));
        assert!(maybe_finalize_aggressive(&mut c, Duration::from_millis(3001)));
        assert_eq!(c.selected_pair, Some(0));
    }

    #[test]
    fn test_ordinary_defers_relayed_pair_while_non_relayed_pending() {
        let mut c = Component::new(1);
        let mut relayed_local = info(3000);
        relayed_local.candidate_type = CandidateType::Relayed;
        let relayed_pair = CandidatePair::new(relayed_local, info(1), 3000, 1);
        c.checklist.add_and_prune(relayed_pair, 1);
        c.checklist.pairs_mut()[0].state = CandidatePairState::Succeeded;
        c.checklist.insert_valid(0);

        let host_local = info(2000);
        let host_pair = CandidatePair::new(host_local, info(1), 2000, 1);
        c.checklist.add_and_prune(host_pair, 1);

        c.has_valid = true;
        c.arm_nomination_if_needed(Duration::from_millis(0));

        let armed = maybe_arm_ordinary_nomination(&mut c, Duration::from_millis(3001), false);
        assert!(armed.is_none());
    }
}
