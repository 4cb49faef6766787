//! CRC computation for E2E protection.
//!
//! Three algorithms, all MSB-first with no reflection and no final xor:
//! SAE-J1850 CRC-8 (poly 0x1D, init 0xFF), CCITT CRC-16 (poly 0x1021,
//! init 0xFFFF) and IEEE 802.3 CRC-32 (poly 0x04C11DB7, init 0xFFFFFFFF).
//! Note the CRC-16 is the init-0xFFFF/no-xor variant, not the bit-reflected
//! X.25 one with final xor.

use crc::{Algorithm, Crc, CRC_16_IBM_3740, CRC_32_MPEG_2};

/// SAE-J1850 without the catalog's final xor. The empty-input value is the
/// init value 0xFF.
const CRC_8_SAE_J1850_PLAIN: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x1D,
    init: 0xFF,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0xB4,
    residue: 0x00,
};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SAE_J1850_PLAIN);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Compute the SAE-J1850 CRC-8 over `data`.
pub fn crc8_sae_j1850(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// Compute the CCITT CRC-16 (init 0xFFFF, no final xor) over `data`.
pub fn crc16_ccitt_x25(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Compute the IEEE 802.3 CRC-32 (MSB-first, no reflection) over `data`.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Dispatch on `crc_type`: 0 = CRC-8, 1 = CRC-16, 2 = CRC-32.
///
/// Returns 0 for out-of-range slices or an unknown `crc_type`. Callers
/// mask the result to the width implied by `crc_type` before comparing.
pub fn crc(data: &[u8], offset: usize, length: usize, crc_type: u8) -> u32 {
    let end = match offset.checked_add(length) {
        Some(end) if end <= data.len() => end,
        _ => return 0,
    };
    let slice = &data[offset..end];

    match crc_type {
        0 => u32::from(crc8_sae_j1850(slice)),
        1 => u32::from(crc16_ccitt_x25(slice)),
        2 => crc32(slice),
        _ => 0,
    }
}
