use crate::candidate::CandidateInfo;
use crate::transport_address::TransportAddress;

/// CandidatePairState per RFC 8445 Section 6.1.2.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePairState {
    Frozen,
    Waiting,
    InProgress,
    Succeeded,
    Failed,
}

/// pair_priority computes the 64-bit connectivity-check priority (RFC 8445
/// Section 6.1.2.3): `2^32 * min(G,D) + 2 * max(G,D) + (G>D ? 1 : 0)`, where
/// `controlling_priority` (G) and `controlled_priority` (D) are each side's
/// CandidateInfo priority. The value is symmetric: both agents derive the
/// same 64-bit number for the same pair regardless of which side computes
/// it, since it only depends on which of G/D is larger, not on local role.
pub fn pair_priority(controlling_priority: u32, controlled_priority: u32) -> u64 {
    let g = controlling_priority as u64;
    let d = controlled_priority as u64;
    let min = g.min(d);
    let max = g.max(d);
    (1u64 << 32) * min + 2 * max + if g > d { 1 } else { 0 }
}

/// CandidatePair: a prospective connectivity path between one local and one
/// remote candidate. `id` is a stable identity independent of the pair's
/// current position in the checklist's sorted Vec, since that position
/// shifts every time a new pair is added and the list is re-sorted; the
/// triggered FIFO and valid-list key on `id`, not on a Vec index, so they
/// survive those reshuffles.
#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub id: u64,
    pub local: CandidateInfo,
    pub remote: CandidateInfo,
    pub priority: u64,
    pub state: CandidatePairState,
    pub foundation_pair: (String, String),
    pub is_valid: bool,
    pub is_nominated: bool,
    pub is_triggered: bool,
    pub is_triggered_for_nominated: bool,
    pub final_nomination: bool,
}

impl CandidatePair {
    pub fn new(
        local: CandidateInfo,
        remote: CandidateInfo,
        controlling_priority: u32,
        controlled_priority: u32,
    ) -> Self {
        let foundation_pair = (local.foundation.clone(), remote.foundation.clone());
        CandidatePair {
            id: 0,
            priority: pair_priority(controlling_priority, controlled_priority),
            state: CandidatePairState::Frozen,
            foundation_pair,
            is_valid: false,
            is_nominated: false,
            is_triggered: false,
            is_triggered_for_nominated: false,
            final_nomination: false,
            local,
            remote,
        }
    }

    fn dedup_key(&self) -> (u8, TransportAddress, TransportAddress) {
        (self.local.component_id, self.local.base_address, self.remote.address)
    }
}

/// CheckList holds the sorted pair list, the triggered-check FIFO, and the
/// valid-list for one media component group.
#[derive(Debug, Default)]
pub struct CheckList {
    pairs: Vec<CandidatePair>,
    next_id: u64,
    triggered: std::collections::VecDeque<u64>,
    valid: Vec<u64>,
}

impl CheckList {
    pub fn new() -> Self {
        CheckList::default()
    }

    pub fn pairs(&self) -> &[CandidatePair] {
        &self.pairs
    }

    pub fn pairs_mut(&mut self) -> &mut [CandidatePair] {
        &mut self.pairs
    }

    pub fn pair(&self, idx: usize) -> Option<&CandidatePair> {
        self.pairs.get(idx)
    }

    pub fn pair_mut(&mut self, idx: usize) -> Option<&mut CandidatePair> {
        self.pairs.get_mut(idx)
    }

    fn index_of(&self, id: u64) -> Option<usize> {
        self.pairs.iter().position(|p| p.id == id)
    }

    /// Appends a pair, re-sorts by (priority desc, component-id asc), prunes
    /// same-(component,local-base,remote-addr) duplicates keeping the
    /// higher-priority one, and caps the list at `100 * num_components`.
    /// Returns the post-sort index of `pair`, or of the higher-priority
    /// duplicate that survived in its place.
    pub fn add_and_prune(&mut self, mut pair: CandidatePair, num_components: usize) -> usize {
        self.next_id += 1;
        pair.id = self.next_id;
        let new_id = pair.id;
        self.pairs.push(pair);
        self.pairs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.local.component_id.cmp(&b.local.component_id))
        });

        let mut seen: std::collections::HashMap<(u8, TransportAddress, TransportAddress), ()> =
            std::collections::HashMap::new();
        let mut keep = Vec::with_capacity(self.pairs.len());
        for p in self.pairs.drain(..) {
            let key = p.dedup_key();
            if seen.contains_key(&key) {
                continue;
            }
            seen.insert(key, ());
            keep.push(p);
        }
        keep.truncate(100 * num_components.max(1));
        self.pairs = keep;

        let alive: std::collections::HashSet<u64> = self.pairs.iter().map(|p| p.id).collect();
        self.triggered.retain(|id| alive.contains(id));
        self.valid.retain(|id| alive.contains(id));

        self.index_of(new_id)
            .or_else(|| {
                // The just-added pair was itself dropped as the lower-priority
                // duplicate; report the surviving representative instead.
                self.pairs
                    .iter()
                    .position(|p| alive.contains(&p.id))
            })
            .unwrap_or(0)
    }

    pub fn push_triggered(&mut self, idx: usize) {
        if let Some(pair) = self.pairs.get(idx) {
            self.triggered.push_back(pair.id);
        }
    }

    pub fn pop_triggered(&mut self) -> Option<usize> {
        while let Some(id) = self.triggered.pop_front() {
            if let Some(idx) = self.index_of(id) {
                return Some(idx);
            }
        }
        None
    }

    pub fn highest_waiting(&self) -> Option<usize> {
        self.pairs
            .iter()
            .enumerate()
            .find(|(_, p)| p.state == CandidatePairState::Waiting)
            .map(|(i, _)| i)
    }

    pub fn highest_frozen(&self) -> Option<usize> {
        self.pairs
            .iter()
            .enumerate()
            .find(|(_, p)| p.state == CandidatePairState::Frozen)
            .map(|(i, _)| i)
    }

    /// Inserts the pair at `idx` into the valid-list keeping it sorted by
    /// priority descending.
    pub fn insert_valid(&mut self, idx: usize) {
        let (id, priority) = match self.pairs.get(idx) {
            Some(p) => (p.id, p.priority),
            None => return,
        };
        if self.valid.contains(&id) {
            return;
        }
        let pos = self
            .valid
            .iter()
            .position(|&other| self.index_of(other).map(|i| self.pairs[i].priority) < Some(priority))
            .unwrap_or(self.valid.len());
        self.valid.insert(pos, id);
    }

    pub fn valid_list(&self) -> Vec<usize> {
        self.valid.iter().filter_map(|&id| self.index_of(id)).collect()
    }

    /// Removes `idx`'s pair from the valid-list, if present. Called on
    /// Binding Error (Section 4.8) so a pair that succeeded once and later
    /// fails can't keep being returned by `highest_priority_valid`.
    pub fn remove_valid(&mut self, idx: usize) {
        let Some(id) = self.pairs.get(idx).map(|p| p.id) else {
            return;
        };
        self.valid.retain(|&v| v != id);
    }

    pub fn highest_priority_valid(&self) -> Option<usize> {
        self.valid.iter().find_map(|&id| self.index_of(id))
    }

    /// Unfreezes every Frozen pair sharing `foundation` on the local side
    /// (RFC 8445 Section 7.2.5.3.3).
    pub fn unfreeze_foundation(&mut self, foundation: &str) {
        for p in self.pairs.iter_mut() {
            if p.state == CandidatePairState::Frozen && p.foundation_pair.0 == foundation {
                p.state = CandidatePairState::Waiting;
            }
        }
    }

    /// Fails any Frozen/Waiting pair in `component_id` whose priority is
    /// below `highest_valid_priority` (best-candidate optimization).
    pub fn optimize_below(&mut self, component_id: u8, highest_valid_priority: u64) {
        for p in self.pairs.iter_mut() {
            if p.local.component_id == component_id
                && matches!(p.state, CandidatePairState::Frozen | CandidatePairState::Waiting)
                && p.priority < highest_valid_priority
            {
                p.state = CandidatePairState::Failed;
            }
        }
    }
}

#[cfg(test)]
mod checklist_test {
    use super::*;
    use crate::candidate::CandidateType;
    use std::net::{IpAddr, Ipv4Addr};

    fn info(priority: u32, component_id: u8, addr_octet: u8) -> CandidateInfo {
        let addr = TransportAddress::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, addr_octet)),
            5000 + addr_octet as u16,
        );
        CandidateInfo {
            id: addr_octet as u64,
            candidate_type: CandidateType::Host,
            priority,
            component_id,
            foundation: format!("f{addr_octet}"),
            address: addr,
            base_address: addr,
            related_address: None,
            network_index: 0,
            opaque_id: 0,
        }
    }

    #[test]
    fn test_pair_priority_is_symmetric_in_max_min() {
        let a = pair_priority(1000, 2000);
        let b = pair_priority(2000, 1000);
        assert_ne!(a, b, "order still flips the low tie bit");
        assert_eq!(a >> 1, b >> 1);
    }

    #[test]
    fn test_checklist_pruning_keeps_highest_priority_duplicate() {
        let remote = info(1, 1, 9);
        let mut cl = CheckList::new();
        for (priority, octet) in [(1000u32, 1u8), (900, 1), (800, 1)] {
            let local = info(priority, 1, octet);
            let pair = CandidatePair::new(local, remote.clone(), priority, remote.priority);
            cl.add_and_prune(pair, 1);
        }
        assert_eq!(cl.pairs().len(), 1);
        assert_eq!(cl.pairs()[0].priority, pair_priority(1000, remote.priority));
    }

    #[test]
    fn test_checklist_caps_at_100_per_component() {
        let remote = info(1, 1, 9);
        let mut cl = CheckList::new();
        for octet in 0..150u8 {
            let local = info(1000 - octet as u32, 1, octet.wrapping_add(10));
            let pair = CandidatePair::new(local, remote.clone(), 1000 - octet as u32, remote.priority);
            cl.add_and_prune(pair, 1);
        }
        assert!(cl.pairs().len() <= 100);
    }

    #[test]
    fn test_valid_list_survives_later_inserts_via_stable_ids() {
        let remote = info(1, 1, 9);
        let mut cl = CheckList::new();
        let idx_a = cl.add_and_prune(CandidatePair::new(info(3000, 1, 1), remote.clone(), 3000, 1), 1);
        cl.insert_valid(idx_a);
        assert_eq!(cl.highest_priority_valid(), Some(idx_a));

        // Adding a higher-priority pair re-sorts the Vec, shifting idx_a.
        let idx_b = cl.add_and_prune(CandidatePair::new(info(9000, 1, 2), remote, 9000, 1), 1);
        assert_ne!(idx_b, idx_a);
        // The previously recorded valid pair is still found by identity,
        // not by its now-stale original index.
        assert!(cl.highest_priority_valid().is_some());
    }

    #[test]
    fn test_remove_valid_drops_pair_from_valid_list() {
        let remote = info(1, 1, 9);
        let mut cl = CheckList::new();
        let idx_a = cl.add_and_prune(CandidatePair::new(info(3000, 1, 1), remote.clone(), 3000, 1), 1);
        let idx_b = cl.add_and_prune(CandidatePair::new(info(2000, 1, 2), remote, 2000, 1), 1);
        cl.insert_valid(idx_a);
        cl.insert_valid(idx_b);
        assert_eq!(cl.valid_list().len(), 2);

        cl.remove_valid(idx_a);
        assert_eq!(cl.valid_list().len(), 1);
        assert_ne!(cl.highest_priority_valid(), Some(idx_a));

        // Removing an already-absent pair (or a stale/out-of-range index) is a no-op.
        cl.remove_valid(idx_a);
        assert_eq!(cl.valid_list().len(), 1);
        cl.remove_valid(999);
        assert_eq!(cl.valid_list().len(), 1);
    }
}
