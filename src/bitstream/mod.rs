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

    src/bitstream/mod.rs

    BitStream: a packed raw-cell bit sequence with an optional parallel
    confidence vector, plus the MFM/FM interleave and marker-scan primitives
    the codecs are built on.
*/

use bit_vec::BitVec;

/// Raw bits per MFM-encoded data byte (8 data bits, each with a clock cell).
pub const MFM_BYTE_LEN: usize = 16;
/// Raw bits of an encoded address-mark sequence (4 bytes).
pub const MFM_MARKER_LEN: usize = 64;

/// A packed bit sequence produced by the PLL, with an optional confidence value in [0, 1] per
/// bit for weak-bit tracking. Length is known exactly.
#[derive(Clone, Debug, Default)]
pub struct BitStream {
    bits: BitVec,
    confidence: Option<Vec<f32>>,
}

impl BitStream {
    pub fn new(with_confidence: bool) -> BitStream {
        BitStream::with_capacity(0, with_confidence)
    }

    pub fn with_capacity(capacity: usize, with_confidence: bool) -> BitStream {
        BitStream {
            bits: BitVec::with_capacity(capacity),
            confidence: with_confidence.then(|| Vec::with_capacity(capacity)),
        }
    }

    pub fn from_bitvec(bits: BitVec) -> BitStream {
        BitStream { bits, confidence: None }
    }

    /// Unpack MSB-first bytes into a bitstream.
    pub fn from_bytes(bytes: &[u8]) -> BitStream {
        BitStream {
            bits: BitVec::from_bytes(bytes),
            confidence: None,
        }
    }

    pub fn push(&mut self, bit: bool, confidence: f32) {
        self.bits.push(bit);
        if let Some(conf) = self.confidence.as_mut() {
            conf.push(confidence);
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index)
    }

    pub fn confidence_at(&self, index: usize) -> f32 {
        self.confidence
            .as_ref()
            .and_then(|c| c.get(index).copied())
            .unwrap_or(1.0)
    }

    pub fn bits(&self) -> &BitVec {
        &self.bits
    }

    pub fn confidence(&self) -> Option<&[f32]> {
        self.confidence.as_deref()
    }

    pub fn iter_bits(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter()
    }

    /// Pack the bits MSB-first into bytes, zero-padding the final partial byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.to_bytes()
    }
}

/// MFM-encode a run of data bytes onto a raw bitstream. A clock bit is inserted between
/// consecutive data bits only when both neighbors are zero. `last_data_bit` carries the trailing
/// data bit across calls so gap/sync/data boundaries encode correctly.
pub fn encode_mfm(data: &[u8], raw: &mut BitVec, last_data_bit: &mut bool) {
    for &byte in data {
        for bit_idx in (0..8).rev() {
            let data_bit = (byte >> bit_idx) & 1 != 0;
            let clock_bit = !*last_data_bit && !data_bit;
            raw.push(clock_bit);
            raw.push(data_bit);
            *last_data_bit = data_bit;
        }
    }
}

/// FM-encode a run of data bytes onto a raw bitstream: a set clock cell before every data bit.
pub fn encode_fm(data: &[u8], raw: &mut BitVec) {
    for &byte in data {
        for bit_idx in (0..8).rev() {
            raw.push(true);
            raw.push((byte >> bit_idx) & 1 != 0);
        }
    }
}

/// Read one data byte from a raw MFM/FM stream at `offset`. The stream interleaves
/// [clock][data] cells, so data bits live at odd offsets from the field start. Returns `None`
/// if the stream ends first.
pub fn read_data_byte(stream: &BitStream, offset: usize) -> Option<u8> {
    let mut byte = 0u8;
    for i in 0..8 {
        let bit = stream.get(offset + i * 2 + 1)?;
        byte = (byte << 1) | bit as u8;
    }
    Some(byte)
}

/// Read `buf.len()` data bytes from a raw stream at `offset`. Returns the number of whole bytes
/// read before the stream ended.
pub fn read_data_buf(stream: &BitStream, offset: usize, buf: &mut [u8]) -> usize {
    for (i, slot) in buf.iter_mut().enumerate() {
        match read_data_byte(stream, offset + i * MFM_BYTE_LEN) {
            Some(b) => *slot = b,
            None => return i,
        }
    }
    buf.len()
}

/// Mean confidence over the data cells of a byte run, for weak-bit scoring.
pub fn data_confidence(stream: &BitStream, offset: usize, byte_len: usize) -> f32 {
    if stream.confidence().is_none() || byte_len == 0 {
        return 1.0;
    }
    let mut sum = 0.0f32;
    let mut n = 0u32;
    for i in 0..byte_len * 8 {
        let idx = offset + i * 2 + 1;
        if idx < stream.len() {
            sum += stream.confidence_at(idx);
            n += 1;
        }
    }
    if n == 0 {
        1.0
    }
    else {
        sum / n as f32
    }
}

/// Per-bit confidence of the data cells of a byte run, in bit order.
pub fn data_bit_confidence(stream: &BitStream, offset: usize, byte_len: usize) -> Vec<f32> {
    (0..byte_len * 8)
        .map(|i| stream.confidence_at(offset + i * 2 + 1))
        .collect()
}

/// Scan for a 64-bit raw marker pattern under `mask`, starting at bit `start`. Returns the bit
/// offset of the first bit of the marker.
pub fn find_marker(stream: &BitStream, marker: u64, mask: u64, start: usize) -> Option<usize> {
    let mut shift_reg: u64 = 0;
    let mut shifted: usize = 0;

    for i in start..stream.len() {
        shift_reg = (shift_reg << 1) | stream.get(i)? as u64;
        shifted += 1;
        if shifted >= 64 && (shift_reg & mask) == marker {
            return Some(i + 1 - 64);
        }
    }
    None
}

/// Read `n <= 64` raw bits MSB-first. Returns `None` if the stream ends first.
pub fn read_raw_bits(stream: &BitStream, offset: usize, n: usize) -> Option<u64> {
    let mut value = 0u64;
    for i in 0..n {
        value = (value << 1) | stream.get(offset + i)? as u64;
    }
    Some(value)
}

/// Read one raw byte (8 cells) MSB-first.
pub fn read_raw_byte(stream: &BitStream, offset: usize) -> Option<u8> {
    read_raw_bits(stream, offset, 8).map(|v| v as u8)
}

/// Scan for a 16-bit raw pattern (FM markers are one byte long). Returns the bit offset of the
/// first bit of the pattern.
pub fn find_marker_u16(stream: &BitStream, marker: u16, start: usize) -> Option<usize> {
    let mut shift_reg: u16 = 0;
    let mut shifted: usize = 0;

    for i in start..stream.len() {
        shift_reg = (shift_reg << 1) | stream.get(i)? as u16;
        shifted += 1;
        if shifted >= 16 && shift_reg == marker {
            return Some(i + 1 - 16);
        }
    }
    None
}

/// Overwrite 64 raw bits at `offset` with a marker pattern. Used by track writers to stamp
/// missing-clock address marks over the regularly-encoded stream.
pub fn write_marker(raw: &mut BitVec, marker: u64, offset: usize) {
    for i in 0..64 {
        let bit = (marker >> (63 - i)) & 1 != 0;
        if offset + i < raw.len() {
            raw.set(offset + i, bit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mfm_clock_rule() {
        // 0x00 encodes with a clock bit between every pair of zero data bits.
        let mut raw = BitVec::new();
        let mut last = false;
        encode_mfm(&[0x00], &mut raw, &mut last);
        // First clock depends on the (false) preceding bit: C=1. Pattern: 10 10 10 ...
        let expected: Vec<bool> = (0..16).map(|i| i % 2 == 0).collect();
        let got: Vec<bool> = raw.iter().collect();
        assert_eq!(got, expected);

        // 0xFF encodes with no clock bits: 01 01 01 ...
        let mut raw = BitVec::new();
        let mut last = false;
        encode_mfm(&[0xFF], &mut raw, &mut last);
        let expected: Vec<bool> = (0..16).map(|i| i % 2 == 1).collect();
        let got: Vec<bool> = raw.iter().collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn mfm_round_trip() {
        let data: Vec<u8> = (0..=255).collect();
        let mut raw = BitVec::new();
        let mut last = false;
        encode_mfm(&data, &mut raw, &mut last);

        let stream = BitStream::from_bitvec(raw);
        let mut decoded = vec![0u8; data.len()];
        assert_eq!(read_data_buf(&stream, 0, &mut decoded), data.len());
        assert_eq!(decoded, data);
    }

    #[test]
    fn fm_round_trip() {
        let data = [0xFE, 0x00, 0x55, 0xAA];
        let mut raw = BitVec::new();
        encode_fm(&data, &mut raw);

        let stream = BitStream::from_bitvec(raw);
        let mut decoded = [0u8; 4];
        assert_eq!(read_data_buf(&stream, 0, &mut decoded), 4);
        assert_eq!(decoded, data);
    }

    #[test]
    fn marker_scan_finds_pattern() {
        // 0x4E gap bytes, then a raw marker, then more gap.
        let mut raw = BitVec::new();
        let mut last = false;
        encode_mfm(&[0x4E; 8], &mut raw, &mut last);
        let marker_offset = raw.len();
        // A1 A1 A1 FE with missing clocks.
        let marker: u64 = 0x4489_4489_4489_5554;
        for i in 0..64 {
            raw.push((marker >> (63 - i)) & 1 != 0);
        }
        let mut last = true;
        encode_mfm(&[0x4E; 8], &mut raw, &mut last);

        let stream = BitStream::from_bitvec(raw);
        assert_eq!(
            find_marker(&stream, marker, u64::MAX, 0),
            Some(marker_offset)
        );
    }

    #[test]
    fn mfm_never_emits_adjacent_ones() {
        let data: Vec<u8> = (0..=255).collect();
        let mut raw = BitVec::new();
        let mut last = false;
        encode_mfm(&data, &mut raw, &mut last);
        let bits: Vec<bool> = raw.iter().collect();
        for pair in bits.windows(2) {
            assert!(!(pair[0] && pair[1]));
        }
    }
}
