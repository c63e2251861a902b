//! Inspection and validation of raw CD-ROM dumps.
//!
//! Works on raw 2352 byte/sector data tracks as produced by disc
//! preservation tools: sector level EDC/ECC validation, ISO 9660
//! filesystem browsing and LibCrypt detection from subchannel captures.

#![warn(missing_docs)]

#[macro_use]
extern crate arrayref;
extern crate thiserror;

pub use bcd::Bcd;
pub use browser::{BrowserOptions, Entry, ImageBrowser};
pub use libcrypt::{Classification, LibCryptReport, LibCryptSector};
pub use msf::Msf;
pub use scan::{ScanOptions, SectorStats};
pub use sector::{Sector, SectorCheck, SectorKind};
pub use subchannel::{SubQ, SubchannelLayout};

use std::io;
use thiserror::Error;

pub mod bcd;
pub mod browser;
pub mod ecc;
pub mod edc;
pub mod info;
pub mod iso9660;
pub mod libcrypt;
pub mod msf;
pub mod psx;
pub mod scan;
pub mod sector;
pub mod subchannel;


/// How to react to structural anomalies in real world dumps
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum Policy {
    /// Recover when possible and log a warning
    #[default]
    Lenient,
    /// Return an error
    Strict,
}

/// Error type for image operations.
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum CdError {
    #[error("Generic I/O error")]
    IoError(#[from] io::Error),
    #[error("Image size ({size} bytes) is not a multiple of the raw sector size")]
    NotRawImage { size: u64 },
    #[error("Image is too small ({size} bytes) to contain a system area")]
    ImageTooSmall { size: u64 },
    #[error("Primary volume descriptor not found")]
    NoVolumeDescriptor,
    #[error("Corrupt directory record at offset {offset}")]
    CorruptDirectoryRecord { offset: usize },
    #[error("Subchannel file is incomplete ({size} bytes, expected a multiple of {block})")]
    BadSubchannelSize { size: u64, block: u64 },
    #[error(
        "The sync pattern at the start of a CD-ROM sector (0x00, 0xff * 10, 0x00) was invalid"
    )]
    BadSyncPattern,
    #[error("Attempted to parse invalid BCD data")]
    BadBcd,
    #[error("Invalid MSF")]
    InvalidMsf,
}

/// Convenience type alias for a `Result<R, CdError>`
pub type CdResult<R> = std::result::Result<R, CdError>;

#[test]
fn cderror_display() {
    // Make sure that CdError implements Display. This should be true if we set an
    // `#[error("...")]` for every variant
    println!("{}", CdError::NoVolumeDescriptor);

    let e = CdError::BadSubchannelSize {
        size: 97,
        block: 96,
    };
    assert_eq!(
        e.to_string(),
        "Subchannel file is incomplete (97 bytes, expected a multiple of 96)"
    );
}
