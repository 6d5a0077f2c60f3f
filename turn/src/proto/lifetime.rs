use std::fmt;
use std::time::Duration;

use stun::attributes::ATTR_LIFETIME;
use stun::message::*;

/// DEFAULT_LIFETIME is the allocation lifetime used when a client does not
/// ask for one explicitly and a REFRESH does not ask for a shorter one.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// Lifetime represents the LIFETIME attribute (RFC 5766 Section 14.2),
/// carried in seconds on the wire.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct Lifetime(pub Duration);

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}

impl Setter for Lifetime {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let secs = self.0.as_secs() as u32;
        m.add(ATTR_LIFETIME, &secs.to_be_bytes());
        Ok(())
    }
}

impl Getter for Lifetime {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_LIFETIME)?;
        if v.len() < 4 {
            return Err(Error::ErrUnexpectedEof);
        }
        let secs = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
        self.0 = Duration::from_secs(secs as u64);
        Ok(())
    }
}
