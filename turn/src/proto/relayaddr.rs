use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use stun::attributes::ATTR_XOR_RELAYED_ADDRESS;
use stun::message::*;
use stun::xoraddr::*;

/// RelayedAddress represents the XOR-RELAYED-ADDRESS attribute (RFC 5766
/// Section 14.5): the address and port the TURN server allocated for this
/// client to be reached on by peers.
#[derive(Clone, Copy, Debug)]
pub struct RelayedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for RelayedAddress {
    fn default() -> Self {
        RelayedAddress {
            ip: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 0,
        }
    }
}

impl fmt::Display for RelayedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl Setter for RelayedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let xor = XorMappedAddress {
            ip: self.ip,
            port: self.port,
        };
        xor.add_to_as(m, ATTR_XOR_RELAYED_ADDRESS)
    }
}

impl Getter for RelayedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let mut xor = XorMappedAddress::default();
        xor.get_from_as(m, ATTR_XOR_RELAYED_ADDRESS)?;
        self.ip = xor.ip;
        self.port = xor.port;
        Ok(())
    }
}
