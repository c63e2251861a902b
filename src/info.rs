//! Image level information used in dump submissions

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::ops::ControlFlow;

use chrono::NaiveDateTime;

use crate::browser::ImageBrowser;
use crate::sector::{Sector, SectorKind, SECTOR_SIZE, SYNC_PATTERN};
use crate::{CdError, CdResult};

/// Raw BCD address of the first sector of a track
pub fn start_msf<R: Read + Seek>(reader: &mut R) -> CdResult<[u8; 3]> {
    let mut header = [0u8; 16];

    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut header)?;

    let (sync, address, _mode) = array_refs![&header, 12, 3, 1];

    if *sync != SYNC_PATTERN {
        return Err(CdError::BadSyncPattern);
    }

    Ok(*address)
}

/// Look for the first Mode 2 Form 2 sector among the first `sectors` of a track and return
/// true if it carries an EDC. Mastering tools either fill it for the whole track or leave it
/// zeroed everywhere so a single sector is enough. Stops at the first Mode 1 sector.
pub fn mode2_form2_edc<R: Read + Seek>(reader: &mut R, sectors: u32) -> CdResult<bool> {
    let mut buf = [0u8; SECTOR_SIZE];

    reader.seek(SeekFrom::Start(0))?;

    for _ in 0..sectors {
        reader.read_exact(&mut buf)?;

        let sector = Sector::new(buf);

        match sector.kind() {
            SectorKind::Mode1 => break,
            SectorKind::Mode2Form2 => return Ok(!sector.validate().edc_absent),
            _ => (),
        }
    }

    Ok(false)
}

/// Newest of the volume creation date and the recording dates of every file. Returns `None`
/// if none of them is valid.
pub fn newest_date<R: Read + Seek>(
    browser: &mut ImageBrowser<R>,
) -> CdResult<Option<NaiveDateTime>> {
    let mut newest = browser.pvd().volume_creation_date_time.to_naive();

    browser.iterate(|_, _, entry| {
        if let Some(date) = entry.date_time() {
            newest = newest.max(Some(date));
        }

        Ok(ControlFlow::Continue(()))
    })?;

    Ok(newest)
}

/// Location of a file within the track
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileExtent {
    /// Full path of the file
    pub path: String,
    /// First sector
    pub offset: u32,
    /// Number of sectors
    pub sector_count: u32,
}

impl FileExtent {
    /// Offset of the first sector in the raw track file
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.offset) * SECTOR_SIZE as u64
    }

    /// Size of the extent in the raw track file
    pub fn byte_size(&self) -> u64 {
        u64::from(self.sector_count) * SECTOR_SIZE as u64
    }
}

impl fmt::Display for FileExtent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}, sector offset: {}, sector size: {} [0x{:x}, {}]",
            self.path,
            self.offset,
            self.sector_count,
            self.byte_offset(),
            self.byte_size()
        )
    }
}

/// List every file with its extent, in traversal order
pub fn file_extents<R: Read + Seek>(browser: &mut ImageBrowser<R>) -> CdResult<Vec<FileExtent>> {
    let mut extents = Vec::new();

    browser.iterate(|_, path, entry| {
        extents.push(FileExtent {
            path: path.to_string(),
            offset: entry.offset(),
            sector_count: entry.sector_count(),
        });

        Ok(ControlFlow::Continue(()))
    })?;

    Ok(extents)
}

#[test]
fn extent_display() {
    let e = FileExtent {
        path: "SYSTEM.CNF".to_string(),
        offset: 23,
        sector_count: 1,
    };

    assert_eq!(
        e.to_string(),
        "SYSTEM.CNF, sector offset: 23, sector size: 1 [0xd350, 2352]"
    );
}
