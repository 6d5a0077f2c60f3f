use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

/// Length of a locally generated ICE username fragment, in characters.
pub const RUNES_ALPHA: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const UFRAG_LENGTH: usize = 4;
pub const PASSWORD_LENGTH: usize = 22;

fn random_string(n: usize) -> String {
    let mut rng = StdRng::from_entropy();
    (0..n)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect()
}

/// generate_ufrag returns a fresh 4-character local username fragment.
pub fn generate_ufrag() -> String {
    random_string(UFRAG_LENGTH)
}

/// generate_pwd returns a fresh 22-character local password.
pub fn generate_pwd() -> String {
    random_string(PASSWORD_LENGTH)
}

/// generate_tie_breaker draws a fresh 64-bit tie-breaker value used to
/// resolve a role conflict (RFC 8445 Section 7.3.1.1).
pub fn generate_tie_breaker() -> u64 {
    let mut rng = StdRng::from_entropy();
    rng.gen()
}

/// generate_cand_id returns an opaque id used to identify a local candidate
/// for the lifetime of the agent.
pub fn generate_cand_id() -> u64 {
    let mut rng = StdRng::from_entropy();
    rng.gen()
}
