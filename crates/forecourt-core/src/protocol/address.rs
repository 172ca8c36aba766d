//! Pump addressing
//!
//! Pumps on a two-wire loop are addressed 1-16. On the wire an address is a
//! single nibble: addresses 1-15 map to themselves and address 16 maps to 0x0.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ProtocolError;

/// A validated pump address on the two-wire bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PumpAddress(u8);

impl PumpAddress {
    /// Lowest addressable pump.
    pub const MIN: PumpAddress = PumpAddress(1);

    /// Highest addressable pump.
    pub const MAX: PumpAddress = PumpAddress(16);

    /// Create an address, rejecting values outside 1-16.
    pub fn new(value: u8) -> Result<Self, ProtocolError> {
        if (Self::MIN.0..=Self::MAX.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ProtocolError::InvalidAddress(value))
        }
    }

    /// The numeric address (1-16).
    pub fn get(self) -> u8 {
        self.0
    }

    /// Wire nibble for this address (address 16 is nibble 0x0).
    pub fn to_nibble(self) -> u8 {
        if self.0 == 16 {
            0x0
        } else {
            self.0
        }
    }

    /// Decode a wire nibble back into an address. Returns `None` for
    /// values that are not a nibble (> 0xF).
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x0 => Some(Self(16)),
            1..=15 => Some(Self(nibble)),
            _ => None,
        }
    }

    /// All addresses in the inclusive range `self..=hi`, in ascending order.
    pub fn range_to(self, hi: PumpAddress) -> impl Iterator<Item = PumpAddress> {
        (self.0..=hi.0).map(PumpAddress)
    }
}

impl fmt::Display for PumpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for PumpAddress {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PumpAddress> for u8 {
    fn from(address: PumpAddress) -> u8 {
        address.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_range() {
        assert!(PumpAddress::new(0).is_err());
        assert!(PumpAddress::new(1).is_ok());
        assert!(PumpAddress::new(16).is_ok());
        assert!(PumpAddress::new(17).is_err());
    }

    #[test]
    fn test_nibble_mapping() {
        assert_eq!(PumpAddress::new(16).unwrap().to_nibble(), 0x0);
        assert_eq!(PumpAddress::new(5).unwrap().to_nibble(), 0x5);
        assert_eq!(PumpAddress::from_nibble(0x0), PumpAddress::new(16).ok());
        assert_eq!(PumpAddress::from_nibble(0x7), PumpAddress::new(7).ok());
        assert_eq!(PumpAddress::from_nibble(0x10), None);
    }

    #[test]
    fn test_nibble_roundtrip() {
        for n in 1..=16u8 {
            let addr = PumpAddress::new(n).unwrap();
            assert_eq!(PumpAddress::from_nibble(addr.to_nibble()), Some(addr));
        }
    }

    #[test]
    fn test_range_iteration() {
        let lo = PumpAddress::new(2).unwrap();
        let hi = PumpAddress::new(5).unwrap();
        let range: Vec<u8> = lo.range_to(hi).map(|a| a.get()).collect();
        assert_eq!(range, vec![2, 3, 4, 5]);
    }
}
