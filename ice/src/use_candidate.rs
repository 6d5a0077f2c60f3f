use stun::attributes::ATTR_USE_CANDIDATE;
use stun::message::*;

/// USE-CANDIDATE attribute (RFC 8445 Section 7.1.1): marks a connectivity
/// check as nominating the pair it travels on.
#[derive(Default)]
pub struct UseCandidateAttr;

impl Setter for UseCandidateAttr {
    fn add_to(&self, m: &mut Message) -> Result<(), stun::Error> {
        m.add(ATTR_USE_CANDIDATE, &[]);
        Ok(())
    }
}

impl UseCandidateAttr {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn is_set(m: &Message) -> bool {
        m.get(ATTR_USE_CANDIDATE).is_ok()
    }
}

#[cfg(test)]
mod use_candidate_test {
    use super::*;

    #[test]
    fn test_use_candidate_add_then_is_set() {
        let mut m = Message::new();
        UseCandidateAttr::new().add_to(&mut m).unwrap();
        m.write_header();

        let mut decoded = Message::new();
        decoded.write(&m.raw).unwrap();
        assert!(UseCandidateAttr::is_set(&decoded));
    }

    #[test]
    fn test_use_candidate_not_set_on_bare_message() {
        let mut m = Message::new();
        m.write_header();
        let mut decoded = Message::new();
        decoded.write(&m.raw).unwrap();
        assert!(!UseCandidateAttr::is_set(&decoded));
    }
}
