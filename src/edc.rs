//! CD-ROM Error Detection Code.
//!
//! The EDC is a reflected 32bit CRC with the polynomial
//! `(x^16 + x^15 + x^2 + 1) * (x^16 + x^2 + x + 1)`, no initial value and
//! no final XOR. It is stored little-endian right after the area it
//! protects.

use crc::{Crc, CRC_32_CD_ROM_EDC};

/// The lookup table is computed at compile time
const EDC: Crc<u32> = Crc::<u32>::new(&CRC_32_CD_ROM_EDC);

/// Compute the EDC of `data`
pub fn compute(data: &[u8]) -> u32 {
    EDC.checksum(data)
}

#[test]
fn check_value() {
    assert_eq!(compute(b"123456789"), 0x6ec2_edc4);
    assert_eq!(compute(&[0; 2056]), 0);
}
