//! LibCrypt detection.
//!
//! LibCrypt protected PlayStation discs carry a few sectors whose Q
//! subchannel timecodes have been deliberately damaged. The game reads
//! them back and derives a key from which sectors are "bad". Since the
//! corruption affects a single MSF field in both the relative and absolute
//! addresses it can be told apart from regular read errors by rebuilding
//! the Q data the sector should have had and comparing the two.
//!
//! Detected sectors are written to an SBI file that emulators use to
//! reproduce the protection.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use crate::msf::Msf;
use crate::subchannel::{QReader, SubQ, SubchannelLayout};
use crate::{CdError, CdResult};

/// Magic number at the start of SBI files
pub const SBI_MAGIC: [u8; 4] = *b"SBI\0";

/// Size of one SBI record: absolute MSF, priority and raw Q payload
pub const SBI_RECORD_SIZE: usize = 3 + 1 + 10;

/// Priority byte written in every SBI record
const SBI_PRIORITY: u8 = 0x01;

/// The MSF field altered by the protection
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Classification {
    /// Minutes differ
    Min,
    /// Seconds differ
    Sec,
    /// Frames differ
    Frm,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Classification::Min => "MIN",
            Classification::Sec => "SEC",
            Classification::Frm => "FRM",
        };

        f.write_str(s)
    }
}

/// Compare the addresses of `actual` against `expected`. The protection alters exactly one
/// of minute, second or frame, and it does so in both the relative and the absolute address.
/// Anything else isn't recognized.
pub fn classify(actual: &SubQ, expected: &SubQ) -> Option<Classification> {
    let a = actual.address();
    let da = actual.data_address();
    let e = expected.address();
    let de = expected.data_address();

    // Per field: true if the field differs in both addresses, false if it matches in both
    let mut changed = [None; 3];

    for (i, c) in changed.iter_mut().enumerate() {
        *c = match (a[i] != e[i], da[i] != de[i]) {
            (true, true) => Some(true),
            (false, false) => Some(false),
            _ => None,
        };
    }

    match changed {
        [Some(true), Some(false), Some(false)] => Some(Classification::Min),
        [Some(false), Some(true), Some(false)] => Some(Classification::Sec),
        [Some(false), Some(false), Some(true)] => Some(Classification::Frm),
        _ => None,
    }
}

/// Q data the sector at `index` (counting from the start of the program area) should contain.
/// Only the addresses and the CRC are rebuilt, the rest is copied from `actual`.
pub fn expected_q(actual: &SubQ, index: u32) -> CdResult<SubQ> {
    let address = Msf::from_lba(index).ok_or(CdError::InvalidMsf)?;
    let data_address = Msf::absolute(index).ok_or(CdError::InvalidMsf)?;

    let mut q = *actual;

    q.set_address(address.to_bcd_bytes());
    q.set_data_address(data_address.to_bcd_bytes());
    q.update_crc();

    Ok(q)
}

/// A sector recognized as part of the protection
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LibCryptSector {
    /// Position of the sector in the capture
    pub index: u32,
    /// Q data as read from the disc
    pub q: SubQ,
    /// Q data the sector should have had
    pub expected: SubQ,
    /// Altered field
    pub classification: Classification,
}

impl LibCryptSector {
    /// Absolute MSF of the sector
    pub fn msf(&self) -> Msf {
        // `expected` is always built from a valid MSF
        self.expected.data_address_msf().unwrap_or(Msf::ZERO)
    }

    /// Absolute sector number, pregap included
    pub fn lba(&self) -> u32 {
        self.msf().lba()
    }

    /// Expected CRC XOR stored CRC
    pub fn xor1(&self) -> u16 {
        self.expected.stored_crc() ^ self.q.stored_crc()
    }

    /// CRC of the damaged payload XOR stored CRC
    pub fn xor2(&self) -> u16 {
        self.q.computed_crc() ^ self.q.stored_crc()
    }

    /// Record for the SBI file
    pub fn sbi_record(&self) -> [u8; SBI_RECORD_SIZE] {
        let mut record = [0; SBI_RECORD_SIZE];

        {
            let (msf, priority, raw) = mut_array_refs![&mut record, 3, 1, 10];

            *msf = self.msf().to_bcd_bytes();
            priority[0] = SBI_PRIORITY;
            *raw = *self.q.raw();
        }

        record
    }
}

/// One diagnostic line: LBA, MSF, raw Q payload, stored CRC, classification and the two CRC
/// XORs.
impl fmt::Display for LibCryptSector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:5}\t{}\t", self.lba(), self.msf())?;

        for b in self.q.raw() {
            write!(f, "{:02x} ", b)?;
        }

        let crc = self.q.crc_bytes();

        write!(
            f,
            "{:02x} {:02x}\t{}\t{:04x} {:04x}",
            crc[0],
            crc[1],
            self.classification,
            self.xor1(),
            self.xor2()
        )
    }
}

/// Outcome of a LibCrypt scan
#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LibCryptReport {
    /// Sectors matching the protection pattern
    pub sectors: Vec<LibCryptSector>,
    /// Indices of sectors with a bad CRC that don't match the pattern
    pub unclassified: Vec<u32>,
    /// Number of sectors in the capture
    pub sector_count: u32,
}

impl LibCryptReport {
    /// True if at least one protected sector was found
    pub fn is_protected(&self) -> bool {
        !self.sectors.is_empty()
    }
}

/// SBI file writer
pub struct SbiWriter<W: Write> {
    writer: W,
}

impl<W: Write> SbiWriter<W> {
    /// Write the SBI header to `writer`
    pub fn new(mut writer: W) -> CdResult<SbiWriter<W>> {
        writer.write_all(&SBI_MAGIC)?;

        Ok(SbiWriter { writer })
    }

    /// Append one record
    pub fn write_record(&mut self, sector: &LibCryptSector) -> CdResult<()> {
        self.writer.write_all(&sector.sbi_record())?;

        Ok(())
    }

    /// Flush and return the underlying writer
    pub fn into_inner(mut self) -> CdResult<W> {
        self.writer.flush()?;

        Ok(self.writer)
    }
}

/// Scan a sequence of Q subchannel sectors. Every sector whose CRC doesn't match is compared
/// against its reconstructed timecode; the recognized ones are written to `sbi`.
pub fn detect<I, W>(q_data: I, sbi: &mut SbiWriter<W>) -> CdResult<LibCryptReport>
where
    I: IntoIterator<Item = CdResult<SubQ>>,
    W: Write,
{
    let mut report = LibCryptReport::default();

    for (index, q) in q_data.into_iter().enumerate() {
        let q = q?;
        let index = u32::try_from(index).map_err(|_| CdError::InvalidMsf)?;

        report.sector_count = index + 1;

        if q.crc_valid() {
            continue;
        }

        let expected = match expected_q(&q, index) {
            Ok(expected) => expected,
            Err(_) => {
                log::warn!(
                    "sector {}: Q CRC mismatch past the last addressable MSF",
                    index
                );
                report.unclassified.push(index);
                continue;
            }
        };

        match classify(&q, &expected) {
            Some(classification) => {
                let sector = LibCryptSector {
                    index,
                    q,
                    expected,
                    classification,
                };

                log::debug!("LibCrypt sector: {}", sector);

                sbi.write_record(&sector)?;
                report.sectors.push(sector);
            }
            None => {
                log::warn!(
                    "sector {}: Q CRC mismatch doesn't match a LibCrypt pattern",
                    index
                );
                report.unclassified.push(index);
            }
        }
    }

    Ok(report)
}

/// Run `detect` on the subchannel capture at `sub_path` and write the SBI file at `sbi_path`.
/// Fails if the capture size isn't a whole number of `layout` blocks.
pub fn detect_file(
    sub_path: &Path,
    sbi_path: &Path,
    layout: SubchannelLayout,
) -> CdResult<LibCryptReport> {
    let size = std::fs::metadata(sub_path)?.len();
    let sector_count = layout.sector_count(size)?;

    let reader = QReader::new(BufReader::new(File::open(sub_path)?), layout);
    let report = detect_to_path(reader, sbi_path)?;

    log::info!(
        "{}: {} sectors, {} LibCrypt sectors, {} unrecognized CRC errors",
        sub_path.display(),
        sector_count,
        report.sectors.len(),
        report.unclassified.len()
    );

    Ok(report)
}

/// Run `detect` in memory and write the SBI file once the whole capture was processed.
/// Nothing is written if the scan fails.
fn detect_to_path<I>(q_data: I, sbi_path: &Path) -> CdResult<LibCryptReport>
where
    I: IntoIterator<Item = CdResult<SubQ>>,
{
    let mut sbi = SbiWriter::new(Vec::new())?;
    let report = detect(q_data, &mut sbi)?;

    std::fs::write(sbi_path, sbi.into_inner()?)?;

    Ok(report)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::msf::PREGAP_SECTORS;
    use crate::subchannel::{insert_channel, Subchannel, SUBCODE_SIZE};
    use std::io;

    fn track_q(count: u32) -> Vec<SubQ> {
        (0..count)
            .map(|i| {
                let q = SubQ::new(&[0x41, 0x01, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
                expected_q(&q, i).unwrap()
            })
            .collect()
    }

    fn run(qs: &[SubQ]) -> (LibCryptReport, Vec<u8>) {
        let mut sbi = SbiWriter::new(Vec::new()).unwrap();
        let report = detect(qs.iter().copied().map(Ok), &mut sbi).unwrap();

        (report, sbi.into_inner().unwrap())
    }

    #[test]
    fn clean_capture() {
        let (report, sbi) = run(&track_q(300));

        assert_eq!(report.sector_count, 300);
        assert!(!report.is_protected());
        assert!(report.unclassified.is_empty());
        assert_eq!(sbi, b"SBI\0");
    }

    #[test]
    fn frame_corruption() {
        let mut qs = track_q(300);

        // 00:01:25 and 00:03:25, frame 25 becomes 24 in both
        let q = &mut qs[100];
        q.set_address([0x00, 0x01, 0x24]);
        q.set_data_address([0x00, 0x03, 0x24]);
        assert!(!q.crc_valid());

        let damaged = *q;
        let (report, sbi) = run(&qs);

        assert_eq!(report.sectors.len(), 1);
        assert!(report.unclassified.is_empty());

        let sector = &report.sectors[0];
        assert_eq!(sector.index, 100);
        assert_eq!(sector.classification, Classification::Frm);
        assert_eq!(sector.msf(), Msf::from_lba(250).unwrap());
        assert_eq!(sector.lba(), 250);

        let mut expected_sbi = b"SBI\0".to_vec();
        expected_sbi.extend_from_slice(&[0x00, 0x03, 0x25, 0x01]);
        expected_sbi.extend_from_slice(damaged.raw());
        assert_eq!(sbi, expected_sbi);

        let line = sector.to_string();
        assert!(line.starts_with("  250\t00:03:25\t41 01 01 00 01 24 00 00 03 24 "));
        assert!(line.contains("\tFRM\t"));
        assert_eq!(
            line.rsplit('\t').next().unwrap(),
            format!("{:04x} {:04x}", sector.xor1(), sector.xor2())
        );
    }

    #[test]
    fn classifications() {
        let expected = track_q(5000)[4000];

        let mut min = expected;
        min.set_address([0x01, 0x53, 0x25]);
        min.set_data_address([0x01, 0x55, 0x25]);
        assert_eq!(classify(&min, &expected), Some(Classification::Min));

        let mut sec = expected;
        sec.set_address([0x00, 0x54, 0x25]);
        sec.set_data_address([0x00, 0x56, 0x25]);
        assert_eq!(classify(&sec, &expected), Some(Classification::Sec));

        // Only one of the two addresses altered
        let mut partial = expected;
        partial.set_address([0x00, 0x53, 0x26]);
        assert_eq!(classify(&partial, &expected), None);

        // Two fields altered
        let mut double = expected;
        double.set_address([0x00, 0x54, 0x26]);
        double.set_data_address([0x00, 0x56, 0x26]);
        assert_eq!(classify(&double, &expected), None);

        assert_eq!(classify(&expected, &expected), None);
    }

    #[test]
    fn unclassified_mismatches() {
        let mut qs = track_q(50);

        // Bad CRC with correct timecodes
        let mut raw = qs[10].to_bytes();
        raw[11] ^= 0xff;
        qs[10] = SubQ::new(&raw);

        qs[20].set_address([0x00, 0x00, 0x21]);

        let (report, sbi) = run(&qs);

        assert!(!report.is_protected());
        assert_eq!(report.unclassified, vec![10, 20]);
        assert_eq!(sbi, b"SBI\0");
    }

    #[test]
    fn mismatch_past_last_msf() {
        // The absolute address of this sector would be past 99:59:74
        let last = Msf::MAX_LBA + 1 - PREGAP_SECTORS;
        let template = SubQ::new(&[0x41, 0x01, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

        let mut frm = expected_q(&template, 100).unwrap();
        frm.set_address([0x00, 0x01, 0x24]);
        frm.set_data_address([0x00, 0x03, 0x24]);

        let garbage = SubQ::new(&[
            0x41, 0x01, 0x01, 0x99, 0x58, 0x00, 0x00, 0x99, 0x59, 0x74, 0x12, 0x34,
        ]);
        assert!(!garbage.crc_valid());

        let frames = (0..=last).map(|i| match i {
            100 => Ok(frm),
            i if i == last => Ok(garbage),
            i => expected_q(&template, i),
        });

        let mut sbi = SbiWriter::new(Vec::new()).unwrap();
        let report = detect(frames, &mut sbi).unwrap();

        assert_eq!(report.sector_count, last + 1);
        assert_eq!(report.sectors.len(), 1);
        assert_eq!(report.sectors[0].index, 100);
        assert_eq!(report.unclassified, vec![last]);
        assert_eq!(sbi.into_inner().unwrap().len(), 4 + SBI_RECORD_SIZE);
    }

    #[test]
    fn failed_scan_writes_no_sbi() {
        let mut qs = track_q(200);
        qs[100].set_address([0x00, 0x01, 0x24]);
        qs[100].set_data_address([0x00, 0x03, 0x24]);

        let dir = tempfile::tempdir().unwrap();
        let sbi_path = dir.path().join("track.sbi");

        let read_error = CdError::IoError(io::Error::new(io::ErrorKind::Other, "read failed"));
        let frames = qs.iter().copied().map(Ok).chain(std::iter::once(Err(read_error)));

        match detect_to_path(frames, &sbi_path) {
            Err(CdError::IoError(_)) => (),
            r => panic!("unexpected result {:?}", r),
        }
        assert!(!sbi_path.exists());

        let report = detect_to_path(qs.iter().copied().map(Ok), &sbi_path).unwrap();
        assert_eq!(report.sectors.len(), 1);
        assert_eq!(std::fs::read(&sbi_path).unwrap().len(), 4 + SBI_RECORD_SIZE);
    }

    #[test]
    fn capture_file() {
        let mut qs = track_q(200);
        qs[150].set_address([0x00, 0x03, 0x00]);
        qs[150].set_data_address([0x00, 0x05, 0x00]);

        let mut capture = Vec::new();
        for q in &qs {
            let mut block = [0u8; SUBCODE_SIZE];
            insert_channel(&mut block, Subchannel::P, &[0xff; 12]);
            insert_channel(&mut block, Subchannel::Q, &q.to_bytes());
            capture.extend_from_slice(&block);
        }

        let dir = tempfile::tempdir().unwrap();
        let sub_path = dir.path().join("track.sub");
        let sbi_path = dir.path().join("track.sbi");
        std::fs::write(&sub_path, &capture).unwrap();

        let report = detect_file(&sub_path, &sbi_path, SubchannelLayout::Interleaved).unwrap();

        assert_eq!(report.sector_count, 200);
        assert_eq!(report.sectors.len(), 1);
        assert_eq!(report.sectors[0].classification, Classification::Sec);
        assert_eq!(std::fs::read(&sbi_path).unwrap().len(), 4 + SBI_RECORD_SIZE);

        std::fs::write(&sub_path, &capture[..capture.len() - 1]).unwrap();
        match detect_file(&sub_path, &sbi_path, SubchannelLayout::Interleaved) {
            Err(CdError::BadSubchannelSize { block: 96, .. }) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }
}
