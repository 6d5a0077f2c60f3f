use stun::attributes::ATTR_DATA;
use stun::message::*;

/// Data represents the DATA attribute (RFC 5766 Section 14.4): the payload
/// carried by a Send/Data indication.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct Data(pub Vec<u8>);

impl Setter for Data {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_DATA, &self.0);
        Ok(())
    }
}

impl Getter for Data {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_DATA)?;
        self.0 = v;
        Ok(())
    }
}
