//! Sector addresses.
//!
//! Positions on a CD are given as "minute:second:frame" where a frame is a
//! sector: 75 frames per second, 60 seconds per minute, every field stored
//! as BCD. The linear address (LBA) of a sector is `75 * (60 * m + s) + f`.
//!
//! The program area starts with a 2 second (150 sector) pregap, so the
//! absolute MSF of the first sector of a data track dump is `00:02:00`.

use std::fmt;
use std::str::FromStr;

use crate::bcd::Bcd;
use crate::CdError;

/// Number of sectors in the pregap of track 01
pub const PREGAP_SECTORS: u32 = 150;

const FRAMES_PER_SECOND: u32 = 75;
const FRAMES_PER_MINUTE: u32 = 60 * FRAMES_PER_SECOND;

/// A validated "minute:second:frame" address. Ordering follows the
/// position on the disc.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Msf {
    m: Bcd,
    s: Bcd,
    f: Bcd,
}

impl Msf {
    /// 00:00:00
    pub const ZERO: Msf = Msf {
        m: Bcd::ZERO,
        s: Bcd::ZERO,
        f: Bcd::ZERO,
    };

    /// Highest LBA representable as an MSF (99:59:74)
    pub const MAX_LBA: u32 = 100 * FRAMES_PER_MINUTE - 1;

    /// Assemble an MSF, `None` if the seconds or frames are out of range
    pub const fn new(m: Bcd, s: Bcd, f: Bcd) -> Option<Msf> {
        if s.binary() < 60 && (f.binary() as u32) < FRAMES_PER_SECOND {
            Some(Msf { m, s, f })
        } else {
            None
        }
    }

    /// Parse the 3-byte on-disc representation used by sector headers, the Q subchannel and
    /// SBI records
    pub fn from_bcd_bytes(raw: [u8; 3]) -> Option<Msf> {
        let [m, s, f] = raw;

        Msf::new(Bcd::from_bcd(m)?, Bcd::from_bcd(s)?, Bcd::from_bcd(f)?)
    }

    /// 3-byte on-disc representation
    pub const fn to_bcd_bytes(self) -> [u8; 3] {
        [self.m.bcd(), self.s.bcd(), self.f.bcd()]
    }

    /// Linear address, 00:00:00 being LBA 0
    pub const fn lba(self) -> u32 {
        let m = self.m.binary() as u32;
        let s = self.s.binary() as u32;
        let f = self.f.binary() as u32;

        m * FRAMES_PER_MINUTE + s * FRAMES_PER_SECOND + f
    }

    /// Inverse of [`Msf::lba`], `None` past 99:59:74
    pub fn from_lba(lba: u32) -> Option<Msf> {
        if lba > Msf::MAX_LBA {
            return None;
        }

        let m = lba / FRAMES_PER_MINUTE;
        let s = lba % FRAMES_PER_MINUTE / FRAMES_PER_SECOND;
        let f = lba % FRAMES_PER_SECOND;

        Msf::new(
            Bcd::from_binary(m as u8)?,
            Bcd::from_binary(s as u8)?,
            Bcd::from_binary(f as u8)?,
        )
    }

    /// Absolute address of the sector at `index` in a dump of track 01, accounting for the
    /// pregap
    pub fn absolute(index: u32) -> Option<Msf> {
        index
            .checked_add(PREGAP_SECTORS)
            .and_then(Msf::from_lba)
    }
}

/// Formats as `mm:ss:ff`
impl fmt::Display for Msf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.m, self.s, self.f)
    }
}

impl fmt::Debug for Msf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Parses `mm:ss:ff`
impl FromStr for Msf {
    type Err = CdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();

        let [m, s, f] = fields[..] else {
            return Err(CdError::InvalidMsf);
        };

        Msf::new(m.parse()?, s.parse()?, f.parse()?).ok_or(CdError::InvalidMsf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn msf(raw: [u8; 3]) -> Msf {
        Msf::from_bcd_bytes(raw).unwrap()
    }

    #[test]
    fn lba_round_trip() {
        for lba in 0..=Msf::MAX_LBA {
            let m = Msf::from_lba(lba).unwrap();

            assert_eq!(m.lba(), lba);
            assert_eq!(Msf::from_bcd_bytes(m.to_bcd_bytes()), Some(m));
        }

        assert_eq!(Msf::from_lba(Msf::MAX_LBA).unwrap().to_bcd_bytes(), [0x99, 0x59, 0x74]);
        assert!(Msf::from_lba(Msf::MAX_LBA + 1).is_none());
    }

    #[test]
    fn pregap() {
        assert_eq!(Msf::absolute(0), Some(msf([0x00, 0x02, 0x00])));
        assert_eq!(Msf::absolute(100).unwrap().to_string(), "00:03:25");
        assert_eq!(msf([0x00, 0x03, 0x25]).lba(), 250);
        assert_eq!(msf([0x01, 0x00, 0x00]).lba(), 4500);
        assert!(Msf::absolute(Msf::MAX_LBA).is_none());
    }

    #[test]
    fn invalid_bytes() {
        assert!(Msf::from_bcd_bytes([0x00, 0x60, 0x00]).is_none());
        assert!(Msf::from_bcd_bytes([0x00, 0x00, 0x75]).is_none());
        assert!(Msf::from_bcd_bytes([0x0a, 0x00, 0x00]).is_none());
        assert!(Msf::from_bcd_bytes([0xff, 0xff, 0xff]).is_none());
    }

    #[test]
    fn ordering() {
        assert!(msf([0x00, 0x01, 0x74]) < msf([0x00, 0x02, 0x00]));
        assert!(msf([0x01, 0x00, 0x00]) > msf([0x00, 0x59, 0x74]));
        assert!(Msf::ZERO < msf([0x00, 0x00, 0x01]));
    }

    #[test]
    fn parse() {
        assert_eq!("00:02:00".parse::<Msf>().unwrap(), Msf::absolute(0).unwrap());
        assert_eq!("99:59:74".parse::<Msf>().unwrap().lba(), Msf::MAX_LBA);

        for bad in ["00", "00:00", "00:00:00:00", "00:60:00", "00:00:75", "1:2:x"] {
            assert!(bad.parse::<Msf>().is_err(), "{}", bad);
        }
    }
}
