use std::fmt;

use stun::attributes::ATTR_CHANNEL_NUMBER;
use stun::message::*;

use crate::error::Error as TurnError;

pub const MIN_CHANNEL_NUMBER: u16 = 0x4000;
pub const MAX_CHANNEL_NUMBER: u16 = 0x7fff;

/// ChannelNumber represents the CHANNEL-NUMBER attribute (RFC 5766 Section
/// 14.1). The upper two octets carry the channel number; the lower two are
/// reserved and sent as zero.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelNumber(pub u16);

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl Setter for ChannelNumber {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = vec![0u8; 4];
        v[0..2].copy_from_slice(&self.0.to_be_bytes());
        m.add(ATTR_CHANNEL_NUMBER, &v);
        Ok(())
    }
}

impl Getter for ChannelNumber {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_CHANNEL_NUMBER)?;
        if v.len() < 2 {
            return Err(Error::ErrUnexpectedEof);
        }
        self.0 = u16::from_be_bytes([v[0], v[1]]);
        Ok(())
    }
}

pub fn is_channel_number_valid(n: u16) -> std::result::Result<(), TurnError> {
    if (MIN_CHANNEL_NUMBER..=MAX_CHANNEL_NUMBER).contains(&n) {
        Ok(())
    } else {
        Err(TurnError::ErrInvalidChannelNumber)
    }
}
