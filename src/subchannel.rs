//! Subchannel captures.
//!
//! Every sector carries 96 bytes of subcode split across eight channels
//! named P to W, 12 bytes each. Raw drive reads return them interleaved
//! bitwise (one bit of every channel per byte, P in bit 7 and W in bit 0)
//! while some dumping tools store each channel contiguously.
//!
//! Only Q is decoded here. It holds the track position of the sector and a
//! CRC, and since subcode is not covered by the sector ECC, damaged Q
//! frames are common on real dumps. LibCrypt relies on that by shipping
//! discs with deliberately corrupted Q data, see the `libcrypt` module.

use std::io::{self, Read};

use crc::{Crc, CRC_16_GSM};

use crate::msf::Msf;
use crate::{CdError, CdResult};

/// Size of the subchannel data of a single sector, all channels included
pub const SUBCODE_SIZE: usize = 96;

/// Size of the data of a single channel for one sector
pub const CHANNEL_SIZE: usize = 12;

/// The Q subchannel CRC is a CRC-16/CCITT stored inverted, which is exactly CRC-16/GSM
const Q_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_GSM);

/// Compute the CRC-16/GSM of `data`
pub fn crc16_gsm(data: &[u8]) -> u16 {
    Q_CRC.checksum(data)
}

/// The eight subchannels. The discriminant is the bit holding the channel in interleaved
/// subcode bytes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Subchannel {
    /// Pause flag
    P = 7,
    /// Timing and table of contents
    Q = 6,
    /// R
    R = 5,
    /// S
    S = 4,
    /// T
    T = 3,
    /// U
    U = 2,
    /// V
    V = 1,
    /// W
    W = 0,
}

impl Subchannel {
    /// All channels, in the order they're stored in deinterleaved captures
    pub const ALL: [Subchannel; 8] = [
        Subchannel::P,
        Subchannel::Q,
        Subchannel::R,
        Subchannel::S,
        Subchannel::T,
        Subchannel::U,
        Subchannel::V,
        Subchannel::W,
    ];

    /// Bit position of this channel in an interleaved subcode byte
    pub fn bit(self) -> u8 {
        self as u8
    }

    /// Position of this channel's 12 bytes within a deinterleaved subcode block
    pub fn deinterleaved_offset(self) -> usize {
        (7 - self.bit() as usize) * CHANNEL_SIZE
    }
}

/// Extract the bit-plane of `channel` from 96 bytes of interleaved subcode data
pub fn extract_channel(subcode: &[u8; SUBCODE_SIZE], channel: Subchannel) -> [u8; CHANNEL_SIZE] {
    let mut out = [0; CHANNEL_SIZE];
    let shift = channel.bit();

    for (i, &b) in subcode.iter().enumerate() {
        let bit = (b >> shift) & 1;

        out[i / 8] |= bit << (7 - (i % 8));
    }

    out
}

/// Inverse of `extract_channel`: OR the bits of `data` into the `channel` bit-plane of `subcode`
pub fn insert_channel(
    subcode: &mut [u8; SUBCODE_SIZE],
    channel: Subchannel,
    data: &[u8; CHANNEL_SIZE],
) {
    let shift = channel.bit();

    for (i, b) in subcode.iter_mut().enumerate() {
        let bit = (data[i / 8] >> (7 - (i % 8))) & 1;

        *b |= bit << shift;
    }
}

/// Q subchannel of one sector: 10 bytes of payload followed by a big-endian CRC.
///
/// In the program area (mode 1 Q data) the payload is laid out as:
///
/// * byte 0: control (high nibble) and ADR (low nibble)
/// * byte 1: track number
/// * byte 2: index (called "point" in the lead-in)
/// * bytes 3-5: MSF relative to the track start
/// * byte 6: zero
/// * bytes 7-9: absolute MSF ("data address")
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubQ {
    raw: [u8; 10],
    crc: [u8; 2],
}

impl SubQ {
    /// Build from the 12 raw bytes of a Q channel
    pub fn new(bytes: &[u8; CHANNEL_SIZE]) -> SubQ {
        let (raw, crc) = array_refs![bytes, 10, 2];

        SubQ {
            raw: *raw,
            crc: *crc,
        }
    }

    /// Return the 10 bytes covered by the CRC
    pub fn raw(&self) -> &[u8; 10] {
        &self.raw
    }

    /// Return the full 12 bytes, CRC included
    pub fn to_bytes(&self) -> [u8; CHANNEL_SIZE] {
        let mut bytes = [0; CHANNEL_SIZE];

        bytes[..10].copy_from_slice(&self.raw);
        bytes[10..].copy_from_slice(&self.crc);

        bytes
    }

    /// Control and ADR nibbles
    pub fn control_adr(&self) -> u8 {
        self.raw[0]
    }

    /// Return true if this is a data track
    pub fn is_data(&self) -> bool {
        self.raw[0] & 0x40 != 0
    }

    /// Q data mode (ADR). Mode 1 is used for the timing information
    pub fn mode(&self) -> u8 {
        self.raw[0] & 0xf
    }

    /// Track number (BCD)
    pub fn track_number(&self) -> u8 {
        self.raw[1]
    }

    /// Index or lead-in pointer (BCD)
    pub fn point(&self) -> u8 {
        self.raw[2]
    }

    /// Raw relative MSF
    pub fn address(&self) -> [u8; 3] {
        *array_ref![self.raw, 3, 3]
    }

    /// Replace the relative MSF
    pub fn set_address(&mut self, address: [u8; 3]) {
        self.raw[3..6].copy_from_slice(&address);
    }

    /// Raw absolute MSF
    pub fn data_address(&self) -> [u8; 3] {
        *array_ref![self.raw, 7, 3]
    }

    /// Replace the absolute MSF
    pub fn set_data_address(&mut self, address: [u8; 3]) {
        self.raw[7..10].copy_from_slice(&address);
    }

    /// Relative MSF, if valid BCD
    pub fn address_msf(&self) -> Option<Msf> {
        Msf::from_bcd_bytes(self.address())
    }

    /// Absolute MSF, if valid BCD
    pub fn data_address_msf(&self) -> Option<Msf> {
        Msf::from_bcd_bytes(self.data_address())
    }

    /// CRC as stored on the disc
    pub fn stored_crc(&self) -> u16 {
        u16::from_be_bytes(self.crc)
    }

    /// Raw CRC bytes in storage order
    pub fn crc_bytes(&self) -> [u8; 2] {
        self.crc
    }

    /// CRC computed over the current payload
    pub fn computed_crc(&self) -> u16 {
        crc16_gsm(&self.raw)
    }

    /// True if the stored CRC matches the payload
    pub fn crc_valid(&self) -> bool {
        self.computed_crc() == self.stored_crc()
    }

    /// Overwrite the stored CRC with the one computed from the payload
    pub fn update_crc(&mut self) {
        self.crc = self.computed_crc().to_be_bytes();
    }
}

/// Possible on-disk layouts for a subchannel capture
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SubchannelLayout {
    /// Raw 96 byte blocks as returned by the drive, channels interleaved bitwise
    Interleaved,
    /// 96 byte blocks with each channel stored as 12 contiguous bytes, P first (CloneCD `.sub`)
    Deinterleaved,
    /// Only the 12 Q bytes of each sector
    QOnly,
}

impl SubchannelLayout {
    /// Number of bytes per sector
    pub fn block_size(self) -> usize {
        match self {
            SubchannelLayout::Interleaved | SubchannelLayout::Deinterleaved => SUBCODE_SIZE,
            SubchannelLayout::QOnly => CHANNEL_SIZE,
        }
    }

    /// Extract the Q channel from one block. `block` must be `block_size()` long.
    pub fn extract_q(self, block: &[u8]) -> SubQ {
        match self {
            SubchannelLayout::Interleaved => {
                let q = extract_channel(array_ref![block, 0, SUBCODE_SIZE], Subchannel::Q);
                SubQ::new(&q)
            }
            SubchannelLayout::Deinterleaved => {
                SubQ::new(array_ref![block, Subchannel::Q.deinterleaved_offset(), CHANNEL_SIZE])
            }
            SubchannelLayout::QOnly => SubQ::new(array_ref![block, 0, CHANNEL_SIZE]),
        }
    }

    /// Number of sectors in a capture of `size` bytes. Returns an error if the size isn't a
    /// multiple of the block size.
    pub fn sector_count(self, size: u64) -> CdResult<u32> {
        let block = self.block_size() as u64;

        if size % block != 0 {
            return Err(CdError::BadSubchannelSize { size, block });
        }

        u32::try_from(size / block).map_err(|_| CdError::BadSubchannelSize { size, block })
    }
}

/// Iterator over the Q channel of a subchannel capture
pub struct QReader<R> {
    reader: R,
    layout: SubchannelLayout,
    buf: Vec<u8>,
}

impl<R: Read> QReader<R> {
    /// Read Q data from `reader`, one `layout.block_size()` block per sector
    pub fn new(reader: R, layout: SubchannelLayout) -> QReader<R> {
        QReader {
            reader,
            layout,
            buf: vec![0; layout.block_size()],
        }
    }
}

impl<R: Read> Iterator for QReader<R> {
    type Item = CdResult<SubQ>;

    fn next(&mut self) -> Option<CdResult<SubQ>> {
        match self.reader.read_exact(&mut self.buf) {
            Ok(()) => Some(Ok(self.layout.extract_q(&self.buf))),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn q_for_sector(lba: u32) -> SubQ {
        let mut q = SubQ::new(&[0x41, 0x01, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        q.set_address(Msf::from_lba(lba).unwrap().to_bcd_bytes());
        q.set_data_address(Msf::from_lba(lba + 150).unwrap().to_bcd_bytes());
        q.update_crc();
        q
    }

    #[test]
    fn crc_check_value() {
        assert_eq!(crc16_gsm(b"123456789"), 0xce3c);
    }

    #[test]
    fn q_crc() {
        let mut q = q_for_sector(16);

        assert!(q.crc_valid());
        assert_eq!(q.stored_crc().to_be_bytes(), q.crc_bytes());
        assert_eq!(q.data_address(), [0x00, 0x02, 0x16]);
        assert_eq!(q.data_address_msf().unwrap().lba(), 166);

        q.set_address([0x00, 0x00, 0x17]);
        assert!(!q.crc_valid());
    }

    #[test]
    fn bit_planes() {
        let q = q_for_sector(1234).to_bytes();
        let p = [0xff; CHANNEL_SIZE];
        let w = [0x5a; CHANNEL_SIZE];

        let mut subcode = [0; SUBCODE_SIZE];
        insert_channel(&mut subcode, Subchannel::P, &p);
        insert_channel(&mut subcode, Subchannel::Q, &q);
        insert_channel(&mut subcode, Subchannel::W, &w);

        assert_eq!(subcode[0] & 0x80, 0x80);
        assert_eq!(extract_channel(&subcode, Subchannel::P), p);
        assert_eq!(extract_channel(&subcode, Subchannel::Q), q);
        assert_eq!(extract_channel(&subcode, Subchannel::W), w);
        assert_eq!(extract_channel(&subcode, Subchannel::R), [0; CHANNEL_SIZE]);
    }

    #[test]
    fn layouts() {
        let q = q_for_sector(42);

        let mut interleaved = [0; SUBCODE_SIZE];
        insert_channel(&mut interleaved, Subchannel::Q, &q.to_bytes());

        let mut deinterleaved = [0xaa; SUBCODE_SIZE];
        deinterleaved[12..24].copy_from_slice(&q.to_bytes());

        assert_eq!(SubchannelLayout::Interleaved.extract_q(&interleaved), q);
        assert_eq!(SubchannelLayout::Deinterleaved.extract_q(&deinterleaved), q);
        assert_eq!(SubchannelLayout::QOnly.extract_q(&q.to_bytes()), q);

        assert_eq!(SubchannelLayout::QOnly.sector_count(120).unwrap(), 10);
        assert!(SubchannelLayout::Interleaved.sector_count(97).is_err());
    }

    #[test]
    fn reader() {
        let mut capture = Vec::new();
        for lba in 0..3 {
            capture.extend_from_slice(&q_for_sector(lba).to_bytes());
        }

        let qs: Vec<SubQ> = QReader::new(&capture[..], SubchannelLayout::QOnly)
            .collect::<CdResult<_>>()
            .unwrap();

        assert_eq!(qs.len(), 3);
        assert_eq!(qs[2], q_for_sector(2));
    }
}
