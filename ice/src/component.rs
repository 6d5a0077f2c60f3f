use crate::checklist::CheckList;
use std::time::Duration;

/// Nomination timer default: 3 s (RFC 8445 Section 8.1.1 recommendation).
pub const NOMINATION_TIMEOUT: Duration = Duration::from_secs(3);

/// Total PAC ("Patiently Awaiting Connectivity") budget from start_checks.
pub const PAC_TIMEOUT: Duration = Duration::from_secs(30);

/// Component is the per-media-component runtime state: its checklist plus
/// the bookkeeping the scheduler and nomination logic need (RFC 8445
/// Section 8, and the spec's own 4.6/4.9/4.10 component description).
#[derive(Debug)]
pub struct Component {
    pub id: u8,
    pub checklist: CheckList,
    pub selected_pair: Option<usize>,
    pub has_valid: bool,
    pub has_nominated: bool,
    pub nomination_armed_at: Option<Duration>,
    pub stopped: bool,
    pub low_overhead: bool,
}

impl Component {
    pub fn new(id: u8) -> Self {
        Component {
            id,
            checklist: CheckList::new(),
            selected_pair: None,
            has_valid: false,
            has_nominated: false,
            nomination_armed_at: None,
            stopped: false,
            low_overhead: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.selected_pair.is_some()
    }

    /// Arms the nomination timer exactly once, the first time a valid pair
    /// appears for this component.
    pub fn arm_nomination_if_needed(&mut self, now: Duration) {
        if self.nomination_armed_at.is_none() && self.has_valid {
            self.nomination_armed_at = Some(now);
        }
    }

    pub fn nomination_due(&self, now: Duration) -> bool {
        match self.nomination_armed_at {
            Some(armed) => now.saturating_sub(armed) >= NOMINATION_TIMEOUT,
            None => false,
        }
    }

    pub fn flag_low_overhead(&mut self) {
        self.low_overhead = true;
    }
}

#[cfg(test)]
mod component_test {
    use super::*;

    #[test]
    fn test_nomination_arms_once_and_fires_after_timeout() {
        let mut c = Component::new(1);
        c.has_valid = true;
        c.arm_nomination_if_needed(Duration::from_millis(100));
        assert_eq!(c.nomination_armed_at, Some(Duration::from_millis(100)));

        // Re-arming is a no-op once set.
        c.arm_nomination_if_needed(Duration::from_millis(500));
        assert_eq!(c.nomination_armed_at, Some(Duration::from_millis(100)));

        assert!(!c.nomination_due(Duration::from_millis(2000)));
        assert!(c.nomination_due(Duration::from_millis(3100)));
    }
}
