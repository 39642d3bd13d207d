/*
    fluxrescue
    https://github.com/dbalsom/fluxrescue

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! The `util` module provides various utility functions.

use crate::io::{Seek, SeekFrom};

/// The initial seed value for CRC-CCITT and related checksums.
pub const CRC_CCITT_INITIAL: u16 = 0xFFFF;

pub(crate) fn get_length<T: Seek>(source: &mut T) -> Result<u64, crate::io::Error> {
    let length = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(0))?;
    Ok(length)
}

/// Calculate a 16-bit checksum over a byte slice.
/// Note: previously attributed to CRC-CCITT.
/// See: https://reveng.sourceforge.io/crc-catalogue/16.htm
pub fn crc_ibm_3740(data: &[u8], start: Option<u16>) -> u16 {
    const POLY: u16 = 0x1021; // Polynomial x^16 + x^12 + x^5 + 1
    let mut crc: u16 = start.unwrap_or(CRC_CCITT_INITIAL);

    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ POLY;
            }
            else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Calculate a 16-bit checksum one byte at a time.
/// Note: previously attributed to CRC-CCITT.
/// See: https://reveng.sourceforge.io/crc-catalogue/16.htm
pub fn crc_ibm_3740_byte(byte: u8, crc: u16) -> u16 {
    const POLY: u16 = 0x1021; // Polynomial x^16 + x^12 + x^5 + 1
    let mut crc = crc;

    crc ^= (byte as u16) << 8;
    for _ in 0..8 {
        if (crc & 0x8000) != 0 {
            crc = (crc << 1) ^ POLY;
        }
        else {
            crc <<= 1;
        }
    }
    crc
}

/// Reverse the bits of a byte. HFE images store track data LSB-first.
pub(crate) const fn reverse_bits(mut byte: u8) -> u8 {
    byte = (byte >> 4) | (byte << 4);
    byte = ((byte & 0x33) << 2) | ((byte & 0xCC) >> 2);
    byte = ((byte & 0x55) << 1) | ((byte & 0xAA) >> 1);
    byte
}

pub(crate) const fn generate_reverse_table() -> [u8; 256] {
    let mut table = [0; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = reverse_bits(i as u8);
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference bit-at-a-time implementation, MSB-first, poly 0x1021, init 0xFFFF.
    fn crc_reference(data: &[u8]) -> u16 {
        let mut crc: u16 = 0xFFFF;
        for &byte in data {
            for bit in (0..8).rev() {
                let in_bit = (byte >> bit) & 1 != 0;
                let top_bit = crc & 0x8000 != 0;
                crc <<= 1;
                if top_bit != in_bit {
                    crc ^= 0x1021;
                }
            }
        }
        crc
    }

    #[test]
    fn crc_matches_check_value() {
        // The catalogued check value for CRC-16/IBM-3740 over "123456789".
        assert_eq!(crc_ibm_3740(b"123456789", None), 0x29B1);
    }

    #[test]
    fn crc_matches_reference_for_random_payloads() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(0x1021);
        for _ in 0..100 {
            let payload: Vec<u8> = (0..512).map(|_| rng.gen()).collect();
            assert_eq!(crc_ibm_3740(&payload, None), crc_reference(&payload));
        }
    }

    #[test]
    fn crc_byte_wise_agrees_with_buffer() {
        let data = b"fluxrescue";
        let mut crc = CRC_CCITT_INITIAL;
        for &b in data.iter() {
            crc = crc_ibm_3740_byte(b, crc);
        }
        assert_eq!(crc, crc_ibm_3740(data, None));
    }

    #[test]
    fn reverse_table_is_involution() {
        let table = generate_reverse_table();
        for i in 0..256 {
            assert_eq!(table[table[i] as usize] as usize, i);
        }
    }
}
