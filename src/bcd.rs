//! CD addressing uses binary-coded decimal (BCD) everywhere: the MSF in
//! sector headers, the timecodes in the Q subchannel and the track numbers
//! are all stored as two packed decimal digits per byte.

use std::fmt;
use std::str::FromStr;

use crate::CdError;

/// Pack a binary value into BCD. The result is only meaningful for
/// `value < 100`; larger values produce out-of-range nibbles exactly like
/// drives that blindly encode them.
pub const fn bcd_encode(value: u8) -> u8 {
    value / 10 * 0x10 + value % 10
}

/// Unpack a BCD byte. No validation is performed, invalid nibbles are
/// decoded arithmetically.
pub const fn bcd_decode(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0xf)
}

/// A validated packed BCD byte, 00 to 99
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bcd(u8);

impl Bcd {
    /// BCD equal to 0
    pub const ZERO: Bcd = Bcd(0);

    /// Wrap a raw BCD byte, `None` if either nibble is above 9
    pub const fn from_bcd(b: u8) -> Option<Bcd> {
        if b >> 4 <= 9 && b & 0xf <= 9 {
            Some(Bcd(b))
        } else {
            None
        }
    }

    /// Encode a binary value, `None` above 99
    pub const fn from_binary(b: u8) -> Option<Bcd> {
        if b < 100 {
            Some(Bcd(bcd_encode(b)))
        } else {
            None
        }
    }

    /// Raw BCD byte
    pub const fn bcd(self) -> u8 {
        self.0
    }

    /// Binary value
    pub const fn binary(self) -> u8 {
        bcd_decode(self.0)
    }
}

/// Parses decimal strings: "7", "07" and "42" are accepted, "100" isn't
impl FromStr for Bcd {
    type Err = CdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b = u8::from_str(s).map_err(|_| CdError::BadBcd)?;

        Bcd::from_binary(b).ok_or(CdError::BadBcd)
    }
}

impl fmt::Display for Bcd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

impl fmt::Debug for Bcd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[test]
fn packing() {
    assert_eq!(bcd_encode(0), 0x00);
    assert_eq!(bcd_encode(59), 0x59);
    assert_eq!(bcd_decode(0x74), 74);

    for b in 0..100 {
        assert_eq!(bcd_decode(bcd_encode(b)), b);
        assert_eq!(Bcd::from_binary(b).unwrap().binary(), b);
    }

    assert_eq!(Bcd::from_binary(100), None);
}

#[test]
fn validation() {
    assert_eq!(Bcd::from_bcd(0x42).map(Bcd::binary), Some(42));
    assert_eq!(Bcd::from_bcd(0x99).map(Bcd::binary), Some(99));
    assert!(Bcd::from_bcd(0x1a).is_none());
    assert!(Bcd::from_bcd(0xa1).is_none());
    assert!(Bcd::from_bcd(0xff).is_none());
}

#[test]
fn parse_and_display() {
    assert_eq!("7".parse::<Bcd>().unwrap().bcd(), 0x07);
    assert_eq!("42".parse::<Bcd>().unwrap().to_string(), "42");

    for bad in ["100", "-2", "ab", "0x10", ""] {
        assert!(bad.parse::<Bcd>().is_err(), "{}", bad);
    }
}
