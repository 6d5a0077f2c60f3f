pub mod addr;
pub mod chandata;
pub mod channum;
pub mod data;
pub mod lifetime;
pub mod peeraddr;
pub mod relayaddr;
pub mod reqtrans;

use std::fmt;

use stun::attributes::ATTR_DONT_FRAGMENT;
use stun::message::*;

/// DontFragment is the zero-length DONT-FRAGMENT attribute (RFC 5766
/// Section 14.8), a hint to the server to set the IP DF bit on relayed
/// UDP datagrams.
#[derive(Default, Copy, Clone, Debug)]
pub struct DontFragment;

impl Setter for DontFragment {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_DONT_FRAGMENT, &[]);
        Ok(())
    }
}

/// Protocol is the value carried by REQUESTED-TRANSPORT; TURN (RFC 5766)
/// only defines UDP (17).
#[derive(PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct Protocol(pub u8);

pub const PROTO_UDP: Protocol = Protocol(17);

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.0 {
            17 => "udp",
            _ => "unknown",
        };
        write!(f, "{s}")
    }
}
