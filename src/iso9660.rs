//! ISO 9660 on-disc structures: volume descriptors and directory records.
//!
//! Multi-byte numbers are mostly stored twice, little-endian then
//! big-endian ("both-byte order"). Corrupted dumps routinely break that
//! redundancy, which is what the directory walker relies on to tell
//! genuine records from garbage.

use chrono::{NaiveDate, NaiveDateTime};

use crate::sector::FORM1_DATA_SIZE;
use crate::{CdError, CdResult, Policy};

/// Number of sectors reserved for the system area at the start of the volume
pub const SYSTEM_AREA_SIZE: u32 = 16;

/// Standard identifier found in every volume descriptor
pub const STANDARD_IDENTIFIER: &[u8; 5] = b"CD001";

/// Fixed part of a directory record, the identifier follows
pub const DIRECTORY_RECORD_HEADER_SIZE: usize = 33;

/// Volume descriptor types
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum VolumeDescriptorType {
    /// Boot record
    BootRecord,
    /// Primary volume descriptor
    Primary,
    /// Supplementary (Joliet) or enhanced volume descriptor
    Supplementary,
    /// Volume partition descriptor
    Partition,
    /// Volume descriptor set terminator
    SetTerminator,
    /// Reserved value
    Unknown(u8),
}

impl From<u8> for VolumeDescriptorType {
    fn from(t: u8) -> VolumeDescriptorType {
        match t {
            0 => VolumeDescriptorType::BootRecord,
            1 => VolumeDescriptorType::Primary,
            2 => VolumeDescriptorType::Supplementary,
            3 => VolumeDescriptorType::Partition,
            255 => VolumeDescriptorType::SetTerminator,
            n => VolumeDescriptorType::Unknown(n),
        }
    }
}

/// Both-byte order value. `msb` holds the big-endian copy already converted to native order,
/// so a sane record has `lsb == msb`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct BothEndian<T> {
    /// Little-endian copy
    pub lsb: T,
    /// Big-endian copy
    pub msb: T,
}

impl<T: PartialEq + Copy> BothEndian<T> {
    /// True if both copies agree
    pub fn is_consistent(&self) -> bool {
        self.lsb == self.msb
    }

    /// Value of the little-endian copy, which is the one used throughout
    pub fn get(&self) -> T {
        self.lsb
    }
}

impl BothEndian<u32> {
    fn parse(b: &[u8; 8]) -> BothEndian<u32> {
        let (le, be) = array_refs![b, 4, 4];

        BothEndian {
            lsb: u32::from_le_bytes(*le),
            msb: u32::from_be_bytes(*be),
        }
    }

    /// Build a consistent value
    pub fn new(v: u32) -> BothEndian<u32> {
        BothEndian { lsb: v, msb: v }
    }

    /// On-disc representation
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut b = [0; 8];

        b[..4].copy_from_slice(&self.lsb.to_le_bytes());
        b[4..].copy_from_slice(&self.msb.to_be_bytes());
        b
    }
}

impl BothEndian<u16> {
    fn parse(b: &[u8; 4]) -> BothEndian<u16> {
        let (le, be) = array_refs![b, 2, 2];

        BothEndian {
            lsb: u16::from_le_bytes(*le),
            msb: u16::from_be_bytes(*be),
        }
    }
}

/// 7 byte recording date of a directory record
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct RecordingDateTime {
    /// Years since 1900
    pub year: u8,
    /// Month, 1 to 12
    pub month: u8,
    /// Day, 1 to 31
    pub day: u8,
    /// Hour
    pub hour: u8,
    /// Minute
    pub minute: u8,
    /// Second
    pub second: u8,
    /// Offset from GMT in 15 minute intervals
    pub gmt_offset: i8,
}

impl RecordingDateTime {
    fn parse(b: &[u8; 7]) -> RecordingDateTime {
        RecordingDateTime {
            year: b[0],
            month: b[1],
            day: b[2],
            hour: b[3],
            minute: b[4],
            second: b[5],
            gmt_offset: b[6] as i8,
        }
    }

    /// Full year. Some mastering tools stored the year without the 1900 base (Chrono Cross
    /// (USA) for instance), so years 0 to 20 are taken as 2000 to 2020.
    pub fn full_year(&self) -> i32 {
        let year = i32::from(self.year);

        if year <= 20 {
            year + 2000
        } else {
            year + 1900
        }
    }

    /// Return the date as a `NaiveDateTime`, `None` if the fields are out of range
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.full_year(), u32::from(self.month), u32::from(self.day))?
            .and_hms_opt(
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.second),
            )
    }
}

/// 17 byte ASCII date used in volume descriptors: `YYYYMMDDHHMMSScc` + GMT offset
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DecDateTime(pub [u8; 17]);

impl DecDateTime {
    /// Parse the date, `None` if unset or malformed
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let digits = std::str::from_utf8(&self.0[..16]).ok()?;

        if digits.bytes().any(|b| !b.is_ascii_digit()) || digits.bytes().all(|b| b == b'0') {
            return None;
        }

        let field = |r: std::ops::Range<usize>| digits[r].parse::<u32>().ok();

        NaiveDate::from_ymd_opt(field(0..4)? as i32, field(4..6)?, field(6..8)?)?.and_hms_milli_opt(
            field(8..10)?,
            field(10..12)?,
            field(12..14)?,
            field(14..16)? * 10,
        )
    }
}

/// A parsed directory record
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DirectoryRecord {
    /// Length of the record in bytes
    pub length: u8,
    /// Extended attribute record length
    pub extended_attribute_length: u8,
    /// First sector of the extent
    pub offset: BothEndian<u32>,
    /// Size of the extent in bytes
    pub data_length: BothEndian<u32>,
    /// Recording date
    pub recording_date_time: RecordingDateTime,
    /// File flags
    pub file_flags: FileFlags,
    /// File unit size for interleaved files
    pub file_unit_size: u8,
    /// Interleave gap size
    pub interleave_gap_size: u8,
    /// Volume sequence number
    pub volume_sequence_number: BothEndian<u16>,
    /// Raw identifier
    pub identifier: Vec<u8>,
}

impl DirectoryRecord {
    /// Parse a record from `buf`, which must start at the record. Only the length fields are
    /// checked, use `is_consistent` to check the both-byte order fields.
    pub fn parse(buf: &[u8]) -> Option<DirectoryRecord> {
        if buf.len() < DIRECTORY_RECORD_HEADER_SIZE {
            return None;
        }

        let length = buf[0];
        let identifier_length = usize::from(buf[32]);

        if usize::from(length) < DIRECTORY_RECORD_HEADER_SIZE + identifier_length
            || buf.len() < usize::from(length)
        {
            return None;
        }

        let identifier = buf
            [DIRECTORY_RECORD_HEADER_SIZE..DIRECTORY_RECORD_HEADER_SIZE + identifier_length]
            .to_vec();

        Some(DirectoryRecord {
            length,
            extended_attribute_length: buf[1],
            offset: BothEndian::<u32>::parse(array_ref![buf, 2, 8]),
            data_length: BothEndian::<u32>::parse(array_ref![buf, 10, 8]),
            recording_date_time: RecordingDateTime::parse(array_ref![buf, 18, 7]),
            file_flags: FileFlags(buf[25]),
            file_unit_size: buf[26],
            interleave_gap_size: buf[27],
            volume_sequence_number: BothEndian::<u16>::parse(array_ref![buf, 28, 4]),
            identifier,
        })
    }

    /// True if the offset and data length copies agree
    pub fn is_consistent(&self) -> bool {
        self.offset.is_consistent() && self.data_length.is_consistent()
    }

    /// True for the "." and ".." records
    pub fn is_self_or_parent(&self) -> bool {
        matches!(self.identifier.first(), Some(0) | Some(1))
    }

    /// Number of 2048 byte blocks spanned by the extent
    pub fn sector_count(&self) -> u32 {
        self.data_length.get().div_ceil(FORM1_DATA_SIZE as u32)
    }
}

/// Directory record file flags
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct FileFlags(pub u8);

impl FileFlags {
    /// Hidden file
    pub fn hidden(self) -> bool {
        self.0 & 1 != 0
    }

    /// The record describes a directory
    pub fn directory(self) -> bool {
        self.0 & (1 << 1) != 0
    }

    /// Associated file
    pub fn associated(self) -> bool {
        self.0 & (1 << 2) != 0
    }

    /// The file has more extents
    pub fn multi_extent(self) -> bool {
        self.0 & (1 << 7) != 0
    }
}

/// A record found while scanning a directory extent
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RawRecord {
    /// Byte offset of the record within the directory extent
    pub position: usize,
    /// The record itself
    pub record: DirectoryRecord,
}

/// Bounded cursor over the raw bytes of a directory extent.
///
/// Records never span a 2048 byte block: a zero length byte, or a length that would cross
/// the end of the current block, means the rest of the block is padding. A record whose
/// both-byte order fields disagree (or whose lengths don't fit) is garbage; with
/// `Policy::Lenient` the cursor moves forward by a single byte and tries again, with
/// `Policy::Strict` it returns `CdError::CorruptDirectoryRecord`.
pub struct RecordCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    policy: Policy,
    skipped: usize,
}

impl<'a> RecordCursor<'a> {
    /// Create a cursor at the start of `buf`
    pub fn new(buf: &'a [u8], policy: Policy) -> RecordCursor<'a> {
        RecordCursor {
            buf,
            pos: 0,
            policy,
            skipped: 0,
        }
    }

    /// Number of garbage bytes skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Return the next record, `None` at the end of the buffer
    pub fn next_record(&mut self) -> CdResult<Option<RawRecord>> {
        while self.pos < self.buf.len() {
            let pos = self.pos;
            let length = usize::from(self.buf[pos]);
            let block_left = FORM1_DATA_SIZE - pos % FORM1_DATA_SIZE;

            if length == 0 || length > block_left {
                self.pos = (pos / FORM1_DATA_SIZE + 1) * FORM1_DATA_SIZE;
                continue;
            }

            let record = DirectoryRecord::parse(&self.buf[pos..]).filter(|r| r.is_consistent());

            match record {
                Some(record) => {
                    self.pos += length;
                    return Ok(Some(RawRecord {
                        position: pos,
                        record,
                    }));
                }
                None => match self.policy {
                    Policy::Strict => return Err(CdError::CorruptDirectoryRecord { offset: pos }),
                    Policy::Lenient => {
                        self.pos += 1;
                        self.skipped += 1;
                    }
                },
            }
        }

        Ok(None)
    }
}

impl<'a> Iterator for RecordCursor<'a> {
    type Item = CdResult<RawRecord>;

    fn next(&mut self) -> Option<CdResult<RawRecord>> {
        self.next_record().transpose()
    }
}

/// Primary volume descriptor
#[derive(Clone, Debug)]
pub struct VolumeDescriptor {
    /// System identifier, "PLAYSTATION" on PSX discs
    pub system_identifier: String,
    /// Volume identifier
    pub volume_identifier: String,
    /// Volume size in logical blocks
    pub volume_space_size: BothEndian<u32>,
    /// Root directory record
    pub root_directory_record: DirectoryRecord,
    /// Volume creation date
    pub volume_creation_date_time: DecDateTime,
}

impl VolumeDescriptor {
    /// Return the descriptor type if `data` starts with a volume descriptor
    pub fn identify(data: &[u8; FORM1_DATA_SIZE]) -> Option<VolumeDescriptorType> {
        if &data[1..6] == STANDARD_IDENTIFIER {
            Some(VolumeDescriptorType::from(data[0]))
        } else {
            None
        }
    }

    /// Parse a primary volume descriptor
    pub fn parse(data: &[u8; FORM1_DATA_SIZE]) -> CdResult<VolumeDescriptor> {
        let root_directory_record =
            DirectoryRecord::parse(&data[156..190]).ok_or(CdError::NoVolumeDescriptor)?;

        Ok(VolumeDescriptor {
            system_identifier: a_string(&data[8..40]),
            volume_identifier: a_string(&data[40..72]),
            volume_space_size: BothEndian::<u32>::parse(array_ref![data, 80, 8]),
            root_directory_record,
            volume_creation_date_time: DecDateTime(*array_ref![data, 813, 17]),
        })
    }
}

/// Space padded identifier string
fn a_string(b: &[u8]) -> String {
    String::from_utf8_lossy(b).trim_end_matches([' ', '\0']).to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(name: &[u8], offset: u32, length: u32, flags: u8) -> Vec<u8> {
        let mut r = vec![0; DIRECTORY_RECORD_HEADER_SIZE];

        r[2..10].copy_from_slice(&BothEndian::new(offset).to_bytes());
        r[10..18].copy_from_slice(&BothEndian::new(length).to_bytes());
        r[18..25].copy_from_slice(&[99, 12, 31, 23, 59, 58, 0]);
        r[25] = flags;
        r[32] = name.len() as u8;
        r.extend_from_slice(name);

        if r.len() % 2 != 0 {
            r.push(0);
        }

        r[0] = r.len() as u8;
        r
    }

    #[test]
    fn parse_record() {
        let raw = record(b"FILE.TXT;1", 30, 5000, 0);
        let r = DirectoryRecord::parse(&raw).unwrap();

        assert!(r.is_consistent());
        assert_eq!(r.offset.get(), 30);
        assert_eq!(r.sector_count(), 3);
        assert_eq!(r.identifier, b"FILE.TXT;1");
        assert!(!r.file_flags.directory());
        assert_eq!(r.recording_date_time.full_year(), 1999);
        assert!(r.recording_date_time.to_naive().is_some());

        // Truncated
        assert!(DirectoryRecord::parse(&raw[..20]).is_none());
    }

    #[test]
    fn two_digit_years() {
        let d = RecordingDateTime {
            year: 5,
            month: 1,
            day: 2,
            ..RecordingDateTime::default()
        };

        assert_eq!(d.full_year(), 2005);
        assert_eq!(d.to_naive().unwrap().to_string(), "2005-01-02 00:00:00");

        let bad = RecordingDateTime {
            month: 13,
            ..d
        };
        assert!(bad.to_naive().is_none());
    }

    #[test]
    fn dec_date() {
        let mut raw = [0u8; 17];
        raw[..16].copy_from_slice(b"1999051211223300");

        let d = DecDateTime(raw).to_naive().unwrap();
        assert_eq!(d.to_string(), "1999-05-12 11:22:33");

        assert!(DecDateTime([b'0'; 17]).to_naive().is_none());
        assert!(DecDateTime([b' '; 17]).to_naive().is_none());
    }

    #[test]
    fn cursor_skips_padding() {
        let mut buf = vec![0u8; 2 * FORM1_DATA_SIZE];

        let a = record(b"A;1", 20, 10, 0);
        buf[..a.len()].copy_from_slice(&a);

        // A record that would cross the block boundary is ignored
        let tail = FORM1_DATA_SIZE - 10;
        buf[tail] = 40;

        let b = record(b"B;1", 21, 10, 0);
        buf[FORM1_DATA_SIZE..FORM1_DATA_SIZE + b.len()].copy_from_slice(&b);

        let records: Vec<RawRecord> = RecordCursor::new(&buf, Policy::Strict)
            .collect::<CdResult<_>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record.identifier, b"A;1");
        assert_eq!(records[1].position, FORM1_DATA_SIZE);
    }

    #[test]
    fn cursor_garbage() {
        let mut buf = vec![0u8; FORM1_DATA_SIZE];

        // Strictly increasing bytes never satisfy the both-byte order check
        for (i, b) in buf[..48].iter_mut().enumerate() {
            *b = 0x30 + i as u8;
        }

        let a = record(b"A;1", 20, 10, 0);
        buf[48..48 + a.len()].copy_from_slice(&a);

        let mut lenient = RecordCursor::new(&buf, Policy::Lenient);
        let first = lenient.next_record().unwrap().unwrap();
        assert_eq!(first.position, 48);
        assert_eq!(lenient.skipped(), 48);
        assert!(lenient.next_record().unwrap().is_none());

        let mut strict = RecordCursor::new(&buf, Policy::Strict);
        match strict.next_record() {
            Err(CdError::CorruptDirectoryRecord { offset: 0 }) => (),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn descriptor_type() {
        let mut data = [0u8; FORM1_DATA_SIZE];
        assert_eq!(VolumeDescriptor::identify(&data), None);

        data[1..6].copy_from_slice(STANDARD_IDENTIFIER);
        data[0] = 255;
        assert_eq!(
            VolumeDescriptor::identify(&data),
            Some(VolumeDescriptorType::SetTerminator)
        );
    }
}
