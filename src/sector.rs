//! CD-ROM sector codec.
//!
//! A raw sector is 2352 bytes long and starts with a 12 byte sync pattern
//! followed by a 4 byte header (BCD MSF + mode). The rest of the sector
//! depends on the mode and, for Mode 2 (CD-ROM XA), on the Form 2 bit of
//! the sub-header:
//!
//! ```text
//!            0    12   16       24                 2072  2076  2248  2352
//! Mode 1:    sync hdr  user data (2048)     EDC    int.  P      Q
//! Mode 2 F1: sync hdr  subhdr x2 user data (2048)  EDC   P      Q
//! Mode 2 F2: sync hdr  subhdr x2 user data (2324)               EDC
//! ```

use crate::ecc::{self, Ecc, ECC_SIZE};
use crate::edc;
use crate::msf::Msf;

/// Size of a raw sector
pub const SECTOR_SIZE: usize = 2352;
/// User data size of Mode 1 and Mode 2 Form 1 sectors
pub const FORM1_DATA_SIZE: usize = 2048;
/// User data size of Mode 2 Form 2 sectors
pub const FORM2_DATA_SIZE: usize = 2324;

/// Sync pattern at the start of every CD-ROM sector
pub const SYNC_PATTERN: [u8; 12] = [
    0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00,
];

const HEADER_OFFSET: usize = 12;
const MODE1_DATA_OFFSET: usize = 16;
const MODE1_EDC_OFFSET: usize = MODE1_DATA_OFFSET + FORM1_DATA_SIZE;
const MODE1_INTERMEDIATE_OFFSET: usize = MODE1_EDC_OFFSET + 4;
const SUBHEADER_OFFSET: usize = 16;
const XA_DATA_OFFSET: usize = 24;
const FORM1_EDC_OFFSET: usize = XA_DATA_OFFSET + FORM1_DATA_SIZE;
const FORM2_EDC_OFFSET: usize = XA_DATA_OFFSET + FORM2_DATA_SIZE;
const ECC_OFFSET: usize = 2076;

/// One raw 2352 byte sector
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sector {
    #[cfg_attr(feature = "serde", serde(with = "serde_big_array::BigArray"))]
    data: [u8; SECTOR_SIZE],
}

impl Sector {
    /// Wrap raw sector data
    pub fn new(data: [u8; SECTOR_SIZE]) -> Sector {
        Sector { data }
    }

    /// Create a sector containing only zeroes
    pub fn empty() -> Sector {
        Sector {
            data: [0; SECTOR_SIZE],
        }
    }

    /// Build a sector with a sync pattern, a header and the given `mode`. The payload is left
    /// zeroed.
    pub fn with_header(msf: Msf, mode: u8) -> Sector {
        let mut sector = Sector::empty();

        sector.data[..12].copy_from_slice(&SYNC_PATTERN);
        sector.data[12..15].copy_from_slice(&msf.to_bcd_bytes());
        sector.data[15] = mode;

        sector
    }

    /// Retrieve the entire sector data
    pub fn data_2352(&self) -> &[u8; SECTOR_SIZE] {
        &self.data
    }

    /// Mutable access to the entire sector data
    pub fn data_2352_mut(&mut self) -> &mut [u8; SECTOR_SIZE] {
        &mut self.data
    }

    /// True if the sector starts with the CD-ROM sync pattern
    pub fn has_sync(&self) -> bool {
        self.data[..12] == SYNC_PATTERN
    }

    /// Return the CD-ROM header. The address is kept raw since real dumps
    /// may contain garbage there.
    pub fn header(&self) -> CdRomHeader {
        CdRomHeader {
            address: *array_ref![self.data, HEADER_OFFSET, 3],
            mode: self.data[15],
        }
    }

    /// Return the first copy of the XA sub-header. Only meaningful for Mode 2 sectors.
    pub fn sub_header(&self) -> XaSubHeader {
        XaSubHeader(*array_ref![self.data, SUBHEADER_OFFSET, 4])
    }

    /// Return the second copy of the XA sub-header. Only meaningful for Mode 2 sectors.
    pub fn sub_header_copy(&self) -> XaSubHeader {
        XaSubHeader(*array_ref![self.data, SUBHEADER_OFFSET + 4, 4])
    }

    /// Decode the payload. The interpretation is selected solely by the header mode and, for
    /// Mode 2, by the Form 2 bit of the first sub-header copy.
    pub fn payload(&self) -> Payload<'_> {
        let d = &self.data;

        match self.header().mode {
            0 => Payload::Mode0,
            1 => Payload::Mode1 {
                user_data: array_ref![d, MODE1_DATA_OFFSET, FORM1_DATA_SIZE],
                edc: read_edc(d, MODE1_EDC_OFFSET),
                intermediate: array_ref![d, MODE1_INTERMEDIATE_OFFSET, 8],
                ecc: array_ref![d, ECC_OFFSET, ECC_SIZE],
            },
            2 => {
                let sub_header = self.sub_header();
                let sub_header_copy = self.sub_header_copy();

                match sub_header.submode().form() {
                    XaForm::Form1 => Payload::Mode2Form1 {
                        sub_header,
                        sub_header_copy,
                        user_data: array_ref![d, XA_DATA_OFFSET, FORM1_DATA_SIZE],
                        edc: read_edc(d, FORM1_EDC_OFFSET),
                        ecc: array_ref![d, ECC_OFFSET, ECC_SIZE],
                    },
                    XaForm::Form2 => Payload::Mode2Form2 {
                        sub_header,
                        sub_header_copy,
                        user_data: array_ref![d, XA_DATA_OFFSET, FORM2_DATA_SIZE],
                        edc: read_edc(d, FORM2_EDC_OFFSET),
                    },
                }
            }
            mode => Payload::Unsupported(mode),
        }
    }

    /// Return the sector kind without borrowing the payload
    pub fn kind(&self) -> SectorKind {
        self.payload().kind()
    }

    /// Return the user data, 2048 bytes for Mode 1 and Form 1, 2324 bytes for Form 2. Returns
    /// `None` for Mode 0 and unsupported modes.
    pub fn user_data(&self) -> Option<&[u8]> {
        match self.payload() {
            Payload::Mode1 { user_data, .. } => Some(user_data),
            Payload::Mode2Form1 { user_data, .. } => Some(user_data),
            Payload::Mode2Form2 { user_data, .. } => Some(user_data),
            Payload::Mode0 | Payload::Unsupported(_) => None,
        }
    }

    /// Compute the EDC the sector should have. Returns `None` for sectors without EDC.
    pub fn expected_edc(&self) -> Option<u32> {
        let d = &self.data;

        let edc = match self.kind() {
            SectorKind::Mode1 => edc::compute(&d[..MODE1_EDC_OFFSET]),
            SectorKind::Mode2Form1 => edc::compute(&d[SUBHEADER_OFFSET..FORM1_EDC_OFFSET]),
            SectorKind::Mode2Form2 => edc::compute(&d[SUBHEADER_OFFSET..FORM2_EDC_OFFSET]),
            SectorKind::Mode0 | SectorKind::Unsupported => return None,
        };

        Some(edc)
    }

    /// Compute the ECC the sector should have. Returns `None` for sectors without ECC.
    pub fn expected_ecc(&self) -> Option<Ecc> {
        match self.kind() {
            SectorKind::Mode1 => Some(ecc::generate(&self.data, false)),
            SectorKind::Mode2Form1 => Some(ecc::generate(&self.data, true)),
            _ => None,
        }
    }

    /// Check the sector's EDC, ECC and sub-header copies. Mismatches are reported, never
    /// treated as errors.
    pub fn validate(&self) -> SectorCheck {
        let mut check = SectorCheck {
            kind: self.kind(),
            ..SectorCheck::default()
        };

        match self.payload() {
            Payload::Mode0 | Payload::Unsupported(_) => (),
            Payload::Mode1 { edc, ecc, .. } => {
                check.edc_error = self.expected_edc() != Some(edc);
                check.ecc_error = self.expected_ecc() != Some(Ecc::from_raw(ecc));
            }
            Payload::Mode2Form1 {
                sub_header,
                sub_header_copy,
                edc,
                ecc,
                ..
            } => {
                check.sub_header_mismatch = sub_header != sub_header_copy;
                check.edc_error = self.expected_edc() != Some(edc);
                check.ecc_error = self.expected_ecc() != Some(Ecc::from_raw(ecc));
            }
            Payload::Mode2Form2 {
                sub_header,
                sub_header_copy,
                edc,
                ..
            } => {
                check.sub_header_mismatch = sub_header != sub_header_copy;

                // Form 2 EDC is optional: all zero means it wasn't computed when mastering
                if edc == 0 {
                    check.edc_absent = true;
                } else {
                    check.edc_error = self.expected_edc() != Some(edc);
                }
            }
        }

        check
    }

    /// Recompute EDC and ECC for Mode 1 and Mode 2 sectors (and clear the Mode 1 intermediate
    /// bytes). Mode 0 and unsupported sectors are left untouched.
    pub fn regenerate(&mut self) {
        let kind = self.kind();

        let edc_offset = match kind {
            SectorKind::Mode1 => {
                self.data[MODE1_INTERMEDIATE_OFFSET..ECC_OFFSET].fill(0);
                MODE1_EDC_OFFSET
            }
            SectorKind::Mode2Form1 => FORM1_EDC_OFFSET,
            SectorKind::Mode2Form2 => FORM2_EDC_OFFSET,
            SectorKind::Mode0 | SectorKind::Unsupported => return,
        };

        if let Some(edc) = self.expected_edc() {
            self.data[edc_offset..edc_offset + 4].copy_from_slice(&edc.to_le_bytes());
        }

        if let Some(ecc) = self.expected_ecc() {
            self.data[ECC_OFFSET..].copy_from_slice(&ecc.to_raw());
        }
    }
}

fn read_edc(data: &[u8; SECTOR_SIZE], offset: usize) -> u32 {
    u32::from_le_bytes(*array_ref![data, offset, 4])
}

/// Decoded CD-ROM sector header
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CdRomHeader {
    /// Raw BCD address
    pub address: [u8; 3],
    /// Raw mode byte
    pub mode: u8,
}

impl CdRomHeader {
    /// Sector MSF, `None` if the address isn't valid BCD
    pub fn msf(&self) -> Option<Msf> {
        Msf::from_bcd_bytes(self.address)
    }
}

/// Payload of a sector. Each variant only exposes the fields that exist in its layout.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Payload<'a> {
    /// Mode 0: empty sector
    Mode0,
    /// Mode 1: "regular" CD-ROM
    Mode1 {
        /// User data
        user_data: &'a [u8; FORM1_DATA_SIZE],
        /// Stored EDC
        edc: u32,
        /// Intermediate bytes, should be zero
        intermediate: &'a [u8; 8],
        /// Stored P and Q parity
        ecc: &'a [u8; ECC_SIZE],
    },
    /// CD-ROM XA Mode 2 Form 1: error corrected data
    Mode2Form1 {
        /// Sub-header
        sub_header: XaSubHeader,
        /// Redundant sub-header copy
        sub_header_copy: XaSubHeader,
        /// User data
        user_data: &'a [u8; FORM1_DATA_SIZE],
        /// Stored EDC
        edc: u32,
        /// Stored P and Q parity
        ecc: &'a [u8; ECC_SIZE],
    },
    /// CD-ROM XA Mode 2 Form 2: bigger payload, no ECC
    Mode2Form2 {
        /// Sub-header
        sub_header: XaSubHeader,
        /// Redundant sub-header copy
        sub_header_copy: XaSubHeader,
        /// User data
        user_data: &'a [u8; FORM2_DATA_SIZE],
        /// Stored EDC, zero if unused
        edc: u32,
    },
    /// Any other mode byte
    Unsupported(u8),
}

impl<'a> Payload<'a> {
    /// Return the kind of this payload
    pub fn kind(&self) -> SectorKind {
        match self {
            Payload::Mode0 => SectorKind::Mode0,
            Payload::Mode1 { .. } => SectorKind::Mode1,
            Payload::Mode2Form1 { .. } => SectorKind::Mode2Form1,
            Payload::Mode2Form2 { .. } => SectorKind::Mode2Form2,
            Payload::Unsupported(_) => SectorKind::Unsupported,
        }
    }
}

/// Payload discriminant
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SectorKind {
    /// Mode 0
    #[default]
    Mode0,
    /// Mode 1
    Mode1,
    /// Mode 2 Form 1
    Mode2Form1,
    /// Mode 2 Form 2
    Mode2Form2,
    /// Unknown mode byte
    Unsupported,
}

impl SectorKind {
    /// Data form of the sector for file reads: Mode 1 counts as Form 1. `None` for sectors
    /// without user data.
    pub fn form(self) -> Option<XaForm> {
        match self {
            SectorKind::Mode1 | SectorKind::Mode2Form1 => Some(XaForm::Form1),
            SectorKind::Mode2Form2 => Some(XaForm::Form2),
            SectorKind::Mode0 | SectorKind::Unsupported => None,
        }
    }
}

/// Validation result of a single sector
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorCheck {
    /// Decoded sector kind
    pub kind: SectorKind,
    /// Stored ECC differs from the computed one
    pub ecc_error: bool,
    /// Stored EDC differs from the computed one
    pub edc_error: bool,
    /// Form 2 sector with an all-zero EDC field
    pub edc_absent: bool,
    /// The two XA sub-header copies differ
    pub sub_header_mismatch: bool,
}

impl SectorCheck {
    /// True if no mismatch was found
    pub fn is_ok(&self) -> bool {
        !(self.ecc_error || self.edc_error || self.sub_header_mismatch)
    }
}

/// Mode 2 XA sub-header: file number, channel number, submode and coding information. It
/// follows the CD-ROM header and is stored twice.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct XaSubHeader(pub [u8; 4]);

impl XaSubHeader {
    /// Interleaved file the sector belongs to
    pub fn file(&self) -> u8 {
        self.0[0]
    }

    /// Channel within the interleaved file
    pub fn channel(&self) -> u8 {
        self.0[1]
    }

    /// Submode flags
    pub fn submode(&self) -> XaSubmode {
        XaSubmode(self.0[2])
    }

    /// Coding information, only meaningful for audio and video sectors
    pub fn coding(&self) -> u8 {
        self.0[3]
    }
}

/// Submode flags of an XA sub-header
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct XaSubmode(pub u8);

impl XaSubmode {
    /// End of record
    pub const EOR: u8 = 0x01;
    /// Video
    pub const VIDEO: u8 = 0x02;
    /// Audio
    pub const AUDIO: u8 = 0x04;
    /// Data
    pub const DATA: u8 = 0x08;
    /// Trigger
    pub const TRIGGER: u8 = 0x10;
    /// Form 2
    pub const FORM2: u8 = 0x20;
    /// Real-time
    pub const REAL_TIME: u8 = 0x40;
    /// End of file
    pub const EOF: u8 = 0x80;

    /// True if every bit of `flags` is set
    pub fn has(self, flags: u8) -> bool {
        self.0 & flags == flags
    }

    /// Sector form advertised by the FORM2 bit
    pub fn form(self) -> XaForm {
        if self.has(XaSubmode::FORM2) {
            XaForm::Form2
        } else {
            XaForm::Form1
        }
    }
}

/// Layout of a Mode 2 sector
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum XaForm {
    /// 2048 bytes of data protected by EDC and ECC
    Form1,
    /// 2324 bytes of data followed by an optional EDC (zero when unused)
    Form2,
}

#[cfg(test)]
mod test {
    use super::*;

    fn filled(mode: u8, submode: u8) -> Sector {
        let mut sector = Sector::with_header(Msf::from_lba(166).unwrap(), mode);

        if mode == 2 {
            let sh = [0x01, 0x00, submode, 0x00];
            sector.data_2352_mut()[16..20].copy_from_slice(&sh);
            sector.data_2352_mut()[20..24].copy_from_slice(&sh);
        }

        let start = if mode == 1 { 16 } else { 24 };
        for (i, b) in sector.data_2352_mut()[start..start + 2048].iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }

        sector.regenerate();
        sector
    }

    #[test]
    fn decode_kinds() {
        assert_eq!(Sector::empty().kind(), SectorKind::Mode0);
        assert_eq!(filled(1, 0).kind(), SectorKind::Mode1);
        assert_eq!(filled(2, 0x08).kind(), SectorKind::Mode2Form1);
        assert_eq!(filled(2, 0x24).kind(), SectorKind::Mode2Form2);

        let odd = Sector::with_header(Msf::ZERO, 3);
        assert_eq!(odd.payload(), Payload::Unsupported(3));
        assert!(odd.user_data().is_none());
        assert_eq!(odd.validate(), SectorCheck {
            kind: SectorKind::Unsupported,
            ..SectorCheck::default()
        });
    }

    #[test]
    fn header() {
        let sector = filled(1, 0);

        assert!(sector.has_sync());
        assert_eq!(sector.header().address, [0x00, 0x02, 0x16]);
        assert_eq!(sector.header().msf().unwrap().lba(), 166);
        assert_eq!(sector.user_data().unwrap().len(), FORM1_DATA_SIZE);
        assert_eq!(filled(2, 0x20).user_data().unwrap().len(), FORM2_DATA_SIZE);
    }

    #[test]
    fn valid_mode1() {
        let check = filled(1, 0).validate();

        assert!(check.is_ok());
        assert!(!check.ecc_error);
        assert!(!check.edc_error);
    }

    #[test]
    fn corrupted_mode1() {
        let mut sector = filled(1, 0);
        sector.data_2352_mut()[100] ^= 0x01;

        let check = sector.validate();

        assert!(check.edc_error);
        assert!(check.ecc_error);
    }

    #[test]
    fn mode2_form1_ignores_address() {
        let mut sector = filled(2, 0x08);
        assert!(sector.validate().is_ok());

        // Form 1 ECC doesn't cover the header, EDC doesn't either
        sector.data_2352_mut()[14] = 0x20;
        assert!(sector.validate().is_ok());

        sector.data_2352_mut()[1000] ^= 0xff;
        let check = sector.validate();
        assert!(check.ecc_error && check.edc_error);
    }

    #[test]
    fn sub_header_mismatch() {
        let mut sector = filled(2, 0x08);
        sector.data_2352_mut()[21] = 0x07;
        sector.regenerate();

        let check = sector.validate();

        assert!(check.sub_header_mismatch);
        assert!(!check.edc_error);
        assert!(!check.is_ok());
    }

    #[test]
    fn form2_edc() {
        let mut sector = filled(2, 0x24);
        assert!(sector.validate().is_ok());
        assert!(!sector.validate().edc_absent);

        sector.data_2352_mut()[2348..].fill(0);
        let check = sector.validate();
        assert!(check.edc_absent);
        assert!(!check.edc_error);

        sector.regenerate();
        sector.data_2352_mut()[30] ^= 0x10;
        let check = sector.validate();
        assert!(check.edc_error);
        assert!(!check.edc_absent);
        assert!(!check.ecc_error);
    }

    #[test]
    fn submode_bits() {
        let sh = XaSubHeader([0x01, 0x03, 0x64, 0x05]);
        assert_eq!((sh.file(), sh.channel(), sh.coding()), (1, 3, 5));

        let s = sh.submode();

        assert!(s.has(XaSubmode::AUDIO | XaSubmode::REAL_TIME));
        assert!(!s.has(XaSubmode::DATA));
        assert!(!s.has(XaSubmode::DATA | XaSubmode::AUDIO));
        assert_eq!(s.form(), XaForm::Form2);
        assert_eq!(XaSubmode(0x08).form(), XaForm::Form1);
    }
}
