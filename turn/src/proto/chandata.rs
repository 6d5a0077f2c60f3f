use super::channum::{is_channel_number_valid, ChannelNumber};
use crate::error::{Error, Result};

const CHANNEL_DATA_HEADER_SIZE: usize = 4;
const CHANNEL_DATA_LENGTH_SIZE: usize = 2;
const CHANNEL_DATA_NUMBER_SIZE: usize = 2;
const PADDING: usize = 4;

/// ChannelData is the ChannelData message framing of RFC 5766 Section 11.4:
/// a 4-byte header (channel number, length) directly followed by the
/// payload, padded to a 4-byte boundary without the padding counted in
/// `length`.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct ChannelData {
    pub data: Vec<u8>,
    pub number: ChannelNumber,
    pub raw: Vec<u8>,
}

impl ChannelData {
    /// Cheap check used to classify an inbound datagram before attempting a
    /// full decode: channel numbers occupy [0x4000, 0x7FFF], which can never
    /// collide with a STUN message's leading two zero bits + magic cookie.
    pub fn is_channel_data(buf: &[u8]) -> bool {
        if buf.len() < CHANNEL_DATA_HEADER_SIZE {
            return false;
        }
        let number = u16::from_be_bytes([buf[0], buf[1]]);
        is_channel_number_valid(number).is_ok()
    }

    pub fn encode(&mut self) {
        self.raw.clear();
        self.raw.extend_from_slice(&self.number.0.to_be_bytes());
        self.raw
            .extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        self.raw.extend_from_slice(&self.data);

        let padded = nearest_padded_value_length(self.data.len());
        self.raw.resize(CHANNEL_DATA_HEADER_SIZE + padded, 0);
    }

    pub fn decode(&mut self) -> Result<()> {
        if self.raw.len() < CHANNEL_DATA_HEADER_SIZE {
            return Err(Error::ErrUnexpectedEof);
        }

        let number = ChannelNumber(u16::from_be_bytes([self.raw[0], self.raw[1]]));
        is_channel_number_valid(number.0)?;

        let length = u16::from_be_bytes([
            self.raw[CHANNEL_DATA_NUMBER_SIZE],
            self.raw[CHANNEL_DATA_NUMBER_SIZE + 1],
        ]) as usize;

        if CHANNEL_DATA_HEADER_SIZE + length > self.raw.len() {
            return Err(Error::ErrBadChannelDataLength);
        }

        self.number = number;
        self.data = self.raw[CHANNEL_DATA_HEADER_SIZE..CHANNEL_DATA_HEADER_SIZE + length].to_vec();

        Ok(())
    }
}

fn nearest_padded_value_length(l: usize) -> usize {
    let mut n = PADDING * (l / PADDING);
    if n < l {
        n += PADDING;
    }
    n
}
