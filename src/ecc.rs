//! CD-ROM Error Correction Code.
//!
//! Mode 1 and Mode 2 Form 1 sectors carry a cross-interleaved Reed-Solomon
//! product code over GF(2^8) (primitive polynomial `x^8 + x^4 + x^3 + x^2 + 1`)
//! described in Annex A of ECMA-130:
//!
//! * P parity: 86 RS(26, 24) codewords taken column-wise from the 2064 byte
//!   block starting at the sector header. Each codeword yields two parity
//!   bytes, 172 bytes total.
//! * Q parity: 52 RS(45, 43) codewords taken diagonally from the same block
//!   *plus* the P parity. 104 bytes total.
//!
//! For Mode 2 Form 1 the header bytes are taken as zero so that the sector
//! address can change without invalidating the ECC.

use std::sync::OnceLock;

/// Size of the P parity
pub const P_PARITY_SIZE: usize = 172;
/// Size of the Q parity
pub const Q_PARITY_SIZE: usize = 104;
/// Size of the whole ECC field
pub const ECC_SIZE: usize = P_PARITY_SIZE + Q_PARITY_SIZE;

/// Offset of the protected block within a raw sector (right after the sync pattern)
const BLOCK_OFFSET: usize = 12;
/// Header + user data + EDC + intermediate/subheader
const BLOCK_SIZE: usize = 2064;

/// Generated or stored ECC of a sector
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Ecc {
    /// P parity
    pub p_parity: [u8; P_PARITY_SIZE],
    /// Q parity
    pub q_parity: [u8; Q_PARITY_SIZE],
}

impl Ecc {
    /// Split the raw 276 byte ECC field of a sector
    pub fn from_raw(raw: &[u8; ECC_SIZE]) -> Ecc {
        let (p_parity, q_parity) = array_refs![raw, P_PARITY_SIZE, Q_PARITY_SIZE];

        Ecc {
            p_parity: *p_parity,
            q_parity: *q_parity,
        }
    }

    /// Return the ECC in its on-disc layout
    pub fn to_raw(&self) -> [u8; ECC_SIZE] {
        let mut raw = [0; ECC_SIZE];

        {
            let (p, q) = mut_array_refs![&mut raw, P_PARITY_SIZE, Q_PARITY_SIZE];
            *p = self.p_parity;
            *q = self.q_parity;
        }

        raw
    }
}

/// GF(2^8) lookup tables: `forward[i] = i * a` and `backward[i ^ forward[i]] = i`, in other
/// words `backward[x] = x / (a + 1)`.
struct Tables {
    forward: [u8; 256],
    backward: [u8; 256],
}

impl Tables {
    fn new() -> Tables {
        let mut forward = [0; 256];
        let mut backward = [0; 256];

        for i in 0..256usize {
            let j = (i << 1) ^ if i & 0x80 != 0 { 0x11d } else { 0 };

            forward[i] = j as u8;
            backward[i ^ j] = i as u8;
        }

        Tables { forward, backward }
    }
}

static TABLES: OnceLock<Tables> = OnceLock::new();

fn tables() -> &'static Tables {
    TABLES.get_or_init(Tables::new)
}

/// Compute the ECC of a raw sector. `zero_address` must be set for Mode 2 Form 1 sectors.
///
/// Only bytes 12 to 2076 of `sector` are used, the existing ECC field is ignored.
pub fn generate(sector: &[u8; 2352], zero_address: bool) -> Ecc {
    let mut block = [0u8; BLOCK_SIZE + ECC_SIZE];

    block[..BLOCK_SIZE].copy_from_slice(&sector[BLOCK_OFFSET..BLOCK_OFFSET + BLOCK_SIZE]);

    if zero_address {
        block[..4].fill(0);
    }

    {
        let (data, parity) = block.split_at_mut(BLOCK_SIZE);
        compute_block(data, &mut parity[..P_PARITY_SIZE], 86, 24, 2, 86);
    }

    {
        let (data, parity) = block.split_at_mut(BLOCK_SIZE + P_PARITY_SIZE);
        compute_block(data, parity, 52, 43, 86, 88);
    }

    Ecc::from_raw(array_ref![block, BLOCK_SIZE, ECC_SIZE])
}

/// Compute `major_count` RS codewords of `minor_count` data symbols each. Codeword `major`
/// starts at `(major / 2) * major_mult + (major % 2)` and advances by `minor_inc`, wrapping
/// around the end of `data`. Its two parity symbols go to `parity[major]` and
/// `parity[major + major_count]`.
fn compute_block(
    data: &[u8],
    parity: &mut [u8],
    major_count: usize,
    minor_count: usize,
    major_mult: usize,
    minor_inc: usize,
) {
    let tables = tables();
    let size = major_count * minor_count;

    debug_assert_eq!(data.len(), size);
    debug_assert_eq!(parity.len(), major_count * 2);

    for major in 0..major_count {
        let mut index = (major >> 1) * major_mult + (major & 1);
        let mut ecc_a = 0u8;
        let mut ecc_b = 0u8;

        for _ in 0..minor_count {
            let b = data[index];

            index += minor_inc;
            if index >= size {
                index -= size;
            }

            ecc_a ^= b;
            ecc_b ^= b;
            ecc_a = tables.forward[ecc_a as usize];
        }

        ecc_a = tables.backward[(tables.forward[ecc_a as usize] ^ ecc_b) as usize];

        parity[major] = ecc_a;
        parity[major + major_count] = ecc_a ^ ecc_b;
    }
}
