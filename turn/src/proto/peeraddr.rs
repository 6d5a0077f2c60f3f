use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use stun::attributes::ATTR_XOR_PEER_ADDRESS;
use stun::message::*;
use stun::xoraddr::*;

/// PeerAddress represents the XOR-PEER-ADDRESS attribute (RFC 5766 Section
/// 14.3), reusing STUN's XOR-MAPPED-ADDRESS transform under a different
/// attribute number.
#[derive(Clone, Copy, Debug)]
pub struct PeerAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for PeerAddress {
    fn default() -> Self {
        PeerAddress {
            ip: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 0,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl Setter for PeerAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let xor = XorMappedAddress {
            ip: self.ip,
            port: self.port,
        };
        xor.add_to_as(m, ATTR_XOR_PEER_ADDRESS)
    }
}

impl Getter for PeerAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let mut xor = XorMappedAddress::default();
        xor.get_from_as(m, ATTR_XOR_PEER_ADDRESS)?;
        self.ip = xor.ip;
        self.port = xor.port;
        Ok(())
    }
}
