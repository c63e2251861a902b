//! Bulk sector validation.
//!
//! Sectors are independent so a track is split in contiguous ranges, one
//! per worker thread. Each worker owns its file handle and its statistics,
//! the results are merged once every worker is done.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::thread;

use crate::sector::{Sector, SectorCheck, SectorKind, SECTOR_SIZE};
use crate::{CdError, CdResult};

/// Scan configuration
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ScanOptions {
    /// Number of worker threads, at least one is used
    pub workers: usize,
}

impl Default for ScanOptions {
    fn default() -> ScanOptions {
        ScanOptions {
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

/// Validation statistics over a set of sectors
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorStats {
    /// Sectors scanned
    pub sectors: u64,
    /// Sectors without a valid sync pattern
    pub missing_sync: u64,
    /// Mode 0 sectors
    pub mode0: u64,
    /// Mode 1 sectors
    pub mode1: u64,
    /// Mode 2 Form 1 sectors
    pub mode2_form1: u64,
    /// Mode 2 Form 2 sectors
    pub mode2_form2: u64,
    /// Sectors with an unknown mode byte
    pub unsupported: u64,
    /// ECC mismatches
    pub ecc_errors: u64,
    /// EDC mismatches
    pub edc_errors: u64,
    /// Form 2 sectors without EDC
    pub form2_edc_absent: u64,
    /// Sectors whose sub-header copies differ
    pub sub_header_mismatches: u64,
}

impl SectorStats {
    /// Account for one sector
    pub fn record(&mut self, has_sync: bool, check: &SectorCheck) {
        self.sectors += 1;

        if !has_sync {
            self.missing_sync += 1;
        }

        match check.kind {
            SectorKind::Mode0 => self.mode0 += 1,
            SectorKind::Mode1 => self.mode1 += 1,
            SectorKind::Mode2Form1 => self.mode2_form1 += 1,
            SectorKind::Mode2Form2 => self.mode2_form2 += 1,
            SectorKind::Unsupported => self.unsupported += 1,
        }

        self.ecc_errors += u64::from(check.ecc_error);
        self.edc_errors += u64::from(check.edc_error);
        self.form2_edc_absent += u64::from(check.edc_absent);
        self.sub_header_mismatches += u64::from(check.sub_header_mismatch);
    }

    /// Add the counts of `other` to `self`
    pub fn merge(&mut self, other: &SectorStats) {
        self.sectors += other.sectors;
        self.missing_sync += other.missing_sync;
        self.mode0 += other.mode0;
        self.mode1 += other.mode1;
        self.mode2_form1 += other.mode2_form1;
        self.mode2_form2 += other.mode2_form2;
        self.unsupported += other.unsupported;
        self.ecc_errors += other.ecc_errors;
        self.edc_errors += other.edc_errors;
        self.form2_edc_absent += other.form2_edc_absent;
        self.sub_header_mismatches += other.sub_header_mismatches;
    }
}

impl std::iter::Sum for SectorStats {
    fn sum<I: Iterator<Item = SectorStats>>(iter: I) -> SectorStats {
        iter.fold(SectorStats::default(), |mut acc, s| {
            acc.merge(&s);
            acc
        })
    }
}

/// Validate `count` consecutive sectors read from `reader`
pub fn scan_sectors<R: Read>(mut reader: R, count: u64) -> CdResult<SectorStats> {
    let mut stats = SectorStats::default();
    let mut buf = [0u8; SECTOR_SIZE];

    for _ in 0..count {
        reader.read_exact(&mut buf)?;

        let sector = Sector::new(buf);
        stats.record(sector.has_sync(), &sector.validate());
    }

    Ok(stats)
}

/// Validate every sector of a raw track using `options.workers` threads
pub fn scan_image(path: &Path, options: &ScanOptions) -> CdResult<SectorStats> {
    let size = std::fs::metadata(path)?.len();
    let sector_size = SECTOR_SIZE as u64;

    if size % sector_size != 0 {
        return Err(CdError::NotRawImage { size });
    }

    let total = size / sector_size;
    let workers = options.workers.max(1) as u64;
    let chunk = total.div_ceil(workers).max(1);

    let ranges: Vec<(u64, u64)> = (0..total)
        .step_by(chunk as usize)
        .map(|start| (start, chunk.min(total - start)))
        .collect();

    let results: Vec<CdResult<SectorStats>> = thread::scope(|s| {
        let handles: Vec<_> = ranges
            .iter()
            .map(|&(start, count)| s.spawn(move || scan_range(path, start, count)))
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });

    let stats: SectorStats = results.into_iter().collect::<CdResult<Vec<_>>>()?.into_iter().sum();

    if stats.sub_header_mismatches > 0 {
        log::warn!(
            "{}: {} sectors with mismatched XA sub-header copies",
            path.display(),
            stats.sub_header_mismatches
        );
    }

    log::info!(
        "{}: {} sectors, {} ECC errors, {} EDC errors, {} sub-header mismatches",
        path.display(),
        stats.sectors,
        stats.ecc_errors,
        stats.edc_errors,
        stats.sub_header_mismatches
    );

    Ok(stats)
}

fn scan_range(path: &Path, start: u64, count: u64) -> CdResult<SectorStats> {
    log::debug!("{}: scanning sectors {}..{}", path.display(), start, start + count);

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start * SECTOR_SIZE as u64))?;

    scan_sectors(BufReader::new(file), count)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::msf::Msf;
    use std::io::Write;

    fn track() -> Vec<u8> {
        let mut data = Vec::new();

        for i in 0..10u32 {
            let mut sector = Sector::with_header(Msf::from_lba(150 + i).unwrap(), 2);
            let submode = if i % 3 == 0 { 0x24 } else { 0x08 };

            sector.data_2352_mut()[18] = submode;
            sector.data_2352_mut()[22] = submode;
            sector.data_2352_mut()[100] = i as u8;
            sector.regenerate();

            if i == 4 {
                sector.data_2352_mut()[200] ^= 1;
            }

            data.extend_from_slice(sector.data_2352());
        }

        data
    }

    #[test]
    fn stats() {
        let stats = scan_sectors(&track()[..], 10).unwrap();

        assert_eq!(stats.sectors, 10);
        assert_eq!(stats.mode2_form2, 4);
        assert_eq!(stats.mode2_form1, 6);
        assert_eq!(stats.ecc_errors, 1);
        assert_eq!(stats.edc_errors, 1);
        assert_eq!(stats.missing_sync, 0);
    }

    #[test]
    fn workers_match_single_pass() {
        let data = track();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let single = scan_sectors(&data[..], 10).unwrap();

        for workers in [1, 3, 4, 16] {
            let stats = scan_image(file.path(), &ScanOptions { workers }).unwrap();
            assert_eq!(stats, single, "{} workers", workers);
        }
    }

    #[test]
    fn rejects_truncated_tracks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0; 100]).unwrap();
        file.flush().unwrap();

        match scan_image(file.path(), &ScanOptions::default()) {
            Err(CdError::NotRawImage { size: 100 }) => (),
            r => panic!("unexpected result {:?}", r),
        }
    }
}
