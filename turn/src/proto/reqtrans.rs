use std::fmt;

use stun::attributes::ATTR_REQUESTED_TRANSPORT;
use stun::message::*;

use super::Protocol;

/// RequestedTransport represents the REQUESTED-TRANSPORT attribute
/// (RFC 5766 Section 14.7). The lower 8 bits of the first octet carry the
/// protocol number; the remaining 3 octets are reserved and sent as zero.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct RequestedTransport {
    pub protocol: Protocol,
}

impl fmt::Display for RequestedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol: {}", self.protocol)
    }
}

impl Setter for RequestedTransport {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = vec![0u8; 4];
        v[0] = self.protocol.0;
        m.add(ATTR_REQUESTED_TRANSPORT, &v);
        Ok(())
    }
}

impl Getter for RequestedTransport {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_REQUESTED_TRANSPORT)?;
        if v.is_empty() {
            return Err(Error::ErrUnexpectedEof);
        }
        self.protocol = Protocol(v[0]);
        Ok(())
    }
}
