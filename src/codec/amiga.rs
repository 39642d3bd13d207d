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

    src/codec/amiga.rs

    The Amiga trackdisk MFM codec. Amiga tracks are one continuous chain of
    sectors behind 0x4489 0x4489 sync words; every field stores its odd bits
    first and its even bits second, and integrity is a 32-bit XOR fold of the
    raw longs after masking clock cells.
*/

use bit_vec::BitVec;

use crate::{
    bitstream::{read_raw_byte, BitStream},
    codec::{DecodedSector, DecodedTrack, TrackCodec, TrackSectorData},
    types::{
        chs::{DiskCh, DiskChs},
        enums::TrackEncoding,
        geometry::DiskGeometry,
    },
    CodecError,
};

pub const AMIGA_SYNC_WORD: u16 = 0x4489;
pub const AMIGA_SECTOR_SIZE: usize = 512;
pub const AMIGA_LABEL_SIZE: usize = 16;
pub const AMIGA_FORMAT_BYTE: u8 = 0xFF;

pub const AMIGA_DD_SPT: usize = 11;
/// HD tracks carry 22 sectors in one continuous chain.
pub const AMIGA_HD_SPT: usize = 22;

const DATA_CELL_MASK: u8 = 0x55;

// Raw cell counts of the per-sector fields, in stream order.
const SYNC_CELLS: usize = 32;
const INFO_CELLS: usize = 64;
const LABEL_CELLS: usize = AMIGA_LABEL_SIZE * 16;
const SUM_CELLS: usize = 64;
const DATA_CELLS: usize = AMIGA_SECTOR_SIZE * 16;

/// Split a byte run into its odd-bits-first raw form: for every byte, the odd data cells
/// (bits 7, 5, 3, 1) of the whole block come first, then the even cells (bits 6, 4, 2, 0).
/// Returned as data-cell sequences without clocks.
fn split_odd_even(data: &[u8]) -> (Vec<bool>, Vec<bool>) {
    let mut odd = Vec::with_capacity(data.len() * 4);
    let mut even = Vec::with_capacity(data.len() * 4);
    for &byte in data {
        for i in [7, 5, 3, 1] {
            odd.push((byte >> i) & 1 != 0);
        }
        for i in [6, 4, 2, 0] {
            even.push((byte >> i) & 1 != 0);
        }
    }
    (odd, even)
}

/// Recombine odd-first/even-second raw bytes into data bytes:
/// `out = ((odd & 0x55) << 1) | (even & 0x55)`.
fn combine_odd_even(odd_raw: &[u8], even_raw: &[u8], out: &mut [u8]) {
    for (i, out_byte) in out.iter_mut().enumerate() {
        let odd_byte = odd_raw[i] & DATA_CELL_MASK;
        let even_byte = even_raw[i] & DATA_CELL_MASK;
        *out_byte = (odd_byte << 1) | even_byte;
    }
}

/// Interleave clock cells into a data-cell sequence. A clock is set only between two zero data
/// cells, continuing from `last` across field boundaries.
fn encode_cells(cells: &[bool], raw: &mut BitVec, last: &mut bool) {
    for &cell in cells {
        raw.push(!*last && !cell);
        raw.push(cell);
        *last = cell;
    }
}

/// XOR-fold raw bytes into a u32 after masking clock cells. The fold operates on the raw
/// odd/even form, so it is computable from either the stream or the pre-split data.
fn checksum_raw(raw_bytes: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    for chunk in raw_bytes.chunks(4) {
        let mut long = [0u8; 4];
        long[..chunk.len()].copy_from_slice(chunk);
        sum ^= u32::from_be_bytes(long) & 0x5555_5555;
    }
    sum
}

/// Collect the raw bytes of a cell region from the stream.
fn read_raw_region(stream: &BitStream, offset: usize, cells: usize) -> Option<Vec<u8>> {
    let mut bytes = Vec::with_capacity(cells / 8);
    for i in (0..cells).step_by(8) {
        bytes.push(read_raw_byte(stream, offset + i)?);
    }
    Some(bytes)
}

fn find_sync(stream: &BitStream, start: usize) -> Option<usize> {
    let pattern: u32 = ((AMIGA_SYNC_WORD as u32) << 16) | AMIGA_SYNC_WORD as u32;
    let mut shift_reg: u32 = 0;
    let mut shifted = 0usize;
    for i in start..stream.len() {
        shift_reg = (shift_reg << 1) | stream.get(i)? as u32;
        shifted += 1;
        if shifted >= 32 && shift_reg == pattern {
            return Some(i + 1 - 32);
        }
    }
    None
}

/// Mean confidence over a cell region's data cells.
fn region_confidence(stream: &BitStream, offset: usize, cells: usize) -> f32 {
    if stream.confidence().is_none() || cells == 0 {
        return 1.0;
    }
    let mut sum = 0.0f32;
    let mut n = 0u32;
    for i in (1..cells).step_by(2) {
        if offset + i < stream.len() {
            sum += stream.confidence_at(offset + i);
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

pub struct AmigaCodec;

impl TrackCodec for AmigaCodec {
    fn encoding(&self) -> TrackEncoding {
        TrackEncoding::AmigaMfm
    }

    fn decode_track(
        &self,
        stream: &BitStream,
        _geometry: &DiskGeometry,
        ch: DiskCh,
    ) -> Result<DecodedTrack, CodecError> {
        let mut track = DecodedTrack::default();
        let mut cursor = 0usize;

        while let Some(sync_offset) = find_sync(stream, cursor) {
            track.markers_found += 1;
            let info_offset = sync_offset + SYNC_CELLS;

            let Some(info_raw) = read_raw_region(stream, info_offset, INFO_CELLS) else {
                break;
            };
            let mut info = [0u8; 4];
            combine_odd_even(&info_raw[..4], &info_raw[4..], &mut info);

            let (format, track_byte, sector_byte) = (info[0], info[1], info[2]);
            if format != AMIGA_FORMAT_BYTE {
                log::trace!(
                    "AmigaCodec::decode_track(): {} unknown format byte {:02X} at {}",
                    ch,
                    format,
                    sync_offset
                );
                cursor = sync_offset + SYNC_CELLS;
                continue;
            }

            // The info block addresses the track as cylinder * 2 + head.
            let chs = DiskChs::new((track_byte / 2) as u16, track_byte & 1, sector_byte.wrapping_add(1));

            let label_offset = info_offset + INFO_CELLS;
            let hsum_offset = label_offset + LABEL_CELLS;
            let dsum_offset = hsum_offset + SUM_CELLS;
            let data_offset = dsum_offset + SUM_CELLS;

            let regions = (
                read_raw_region(stream, label_offset, LABEL_CELLS),
                read_raw_region(stream, hsum_offset, SUM_CELLS),
                read_raw_region(stream, dsum_offset, SUM_CELLS),
                read_raw_region(stream, data_offset, DATA_CELLS),
            );
            let (Some(label_raw), Some(hsum_raw), Some(dsum_raw), Some(data_raw)) = regions else {
                log::trace!("AmigaCodec::decode_track(): {} truncated sector at {}", ch, sync_offset);
                break;
            };

            // The header checksum covers the info and label raw longs.
            let mut header_region = info_raw.clone();
            header_region.extend_from_slice(&label_raw);
            let header_sum_calculated = checksum_raw(&header_region);

            let mut hsum = [0u8; 4];
            combine_odd_even(&hsum_raw[..4], &hsum_raw[4..], &mut hsum);
            let header_crc_ok = u32::from_be_bytes(hsum) == header_sum_calculated;

            let mut dsum = [0u8; 4];
            combine_odd_even(&dsum_raw[..4], &dsum_raw[4..], &mut dsum);
            let data_sum_calculated = checksum_raw(&data_raw);
            let data_crc_ok = u32::from_be_bytes(dsum) == data_sum_calculated;

            let mut payload = vec![0u8; AMIGA_SECTOR_SIZE];
            combine_odd_even(
                &data_raw[..AMIGA_SECTOR_SIZE],
                &data_raw[AMIGA_SECTOR_SIZE..],
                &mut payload,
            );

            track.sectors.push(DecodedSector {
                chs,
                size_code: 2,
                payload,
                stored_crc: dsum.to_vec(),
                header_crc_ok,
                data_crc_ok: Some(data_crc_ok),
                deleted: false,
                confidence: region_confidence(stream, data_offset, DATA_CELLS),
                bit_confidence: stream
                    .confidence()
                    .map(|_| split_field_bit_confidence(stream, data_offset, dsum_offset)),
                data_mark_offset: Some(sync_offset),
            });

            cursor = data_offset + DATA_CELLS;
        }

        if track.markers_found == 0 {
            log::debug!("AmigaCodec::decode_track(): {} no sync words in revolution", ch);
            return Err(CodecError::NoAddressMarks);
        }

        Ok(track)
    }

    fn encode_track(
        &self,
        sectors: &[TrackSectorData],
        geometry: &DiskGeometry,
        ch: DiskCh,
    ) -> Result<BitVec, CodecError> {
        let bitcell_ct = crate::codec::track_raw_cells(geometry);
        let mut raw = BitVec::with_capacity(bitcell_ct);
        let mut last = false;

        // Track lead-in: MFM zeros (0xAAAA pattern).
        encode_cells(&vec![false; 16 * 8], &mut raw, &mut last);

        for (i, sector) in sectors.iter().enumerate() {
            if sector.data.len() != AMIGA_SECTOR_SIZE {
                log::error!(
                    "AmigaCodec::encode_track(): {} sector {} data length {} != 512",
                    ch,
                    sector.chs,
                    sector.data.len()
                );
                return Err(CodecError::ParameterError);
            }

            // Two zero bytes of gap, then the sync words written raw.
            encode_cells(&vec![false; 16], &mut raw, &mut last);
            for word in [AMIGA_SYNC_WORD, AMIGA_SYNC_WORD] {
                for bit in (0..16).rev() {
                    raw.push((word >> bit) & 1 != 0);
                }
            }
            last = true; // 0x4489 ends in a set data cell

            let track_byte = (sector.chs.c() as u8) * 2 + sector.chs.h();
            let sectors_to_gap = (sectors.len() - i) as u8;
            let info = [AMIGA_FORMAT_BYTE, track_byte, sector.chs.s() - 1, sectors_to_gap];
            let label = [0u8; AMIGA_LABEL_SIZE];

            // Checksums fold the raw odd/even longs with clocks masked, which reduces to a fold
            // over the split data cells. Build the raw regions first to reuse the same fold.
            let info_raw = raw_form(&info);
            let label_raw = raw_form(&label);
            let data_raw = raw_form(&sector.data);

            let mut header_region = info_raw.clone();
            header_region.extend_from_slice(&label_raw);
            let header_sum = checksum_raw(&header_region);
            let data_sum = checksum_raw(&data_raw);

            for field in [
                &info[..],
                &label[..],
                &header_sum.to_be_bytes()[..],
                &data_sum.to_be_bytes()[..],
                &sector.data[..],
            ] {
                let (odd, even) = split_odd_even(field);
                encode_cells(&odd, &mut raw, &mut last);
                encode_cells(&even, &mut raw, &mut last);
            }
        }

        // Fill the track gap with MFM zeros.
        while raw.len() + 2 <= bitcell_ct {
            encode_cells(&[false], &mut raw, &mut last);
        }
        if raw.len() > bitcell_ct {
            log::warn!(
                "AmigaCodec::encode_track(): {} sector chain passed the index. Truncating to {} cells",
                ch,
                bitcell_ct
            );
            raw.truncate(bitcell_ct);
        }

        Ok(raw)
    }
}

/// Per-bit confidence over payload + data checksum, reordered from the on-disk odd/even split
/// into payload bit order so multi-capture voting can index it by data bit position.
fn split_field_bit_confidence(stream: &BitStream, data_offset: usize, dsum_offset: usize) -> Vec<f32> {
    let mut conf = Vec::with_capacity((AMIGA_SECTOR_SIZE + 4) * 8);
    let half = DATA_CELLS / 2;
    for byte in 0..AMIGA_SECTOR_SIZE {
        for j in (0..8).rev() {
            // Odd data bits (7, 5, 3, 1) live in the first half of the region, even bits in
            // the second, four cells per byte in each half.
            let cell = if j % 2 == 1 {
                byte * 4 + (7 - j) / 2
            }
            else {
                half / 2 + byte * 4 + (6 - j) / 2
            };
            conf.push(stream.confidence_at(data_offset + cell * 2 + 1));
        }
    }
    let sum_half = SUM_CELLS / 2;
    for byte in 0..4 {
        for j in (0..8).rev() {
            let cell = if j % 2 == 1 {
                byte * 4 + (7 - j) / 2
            }
            else {
                sum_half / 2 + byte * 4 + (6 - j) / 2
            };
            conf.push(stream.confidence_at(dsum_offset + cell * 2 + 1));
        }
    }
    conf
}

/// The data checksum a payload would carry on disk.
pub fn data_checksum(payload: &[u8]) -> u32 {
    checksum_raw(&raw_form(payload))
}

/// The raw (clocked, odd-first) byte form of a field, as it appears on disk.
fn raw_form(data: &[u8]) -> Vec<u8> {
    let (odd, even) = split_odd_even(data);
    let mut raw = BitVec::with_capacity(data.len() * 16);
    // Clock context does not matter for the checksum fold; clocks are masked out.
    let mut last = false;
    encode_cells(&odd, &mut raw, &mut last);
    encode_cells(&even, &mut raw, &mut last);
    raw.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_even_split_round_trips() {
        let data: Vec<u8> = (0..=255).collect();
        let (odd, even) = split_odd_even(&data);

        // Pack cell sequences into raw bytes the way the disk stores them (clocks zeroed).
        let pack = |cells: &[bool]| -> Vec<u8> {
            let mut raw = BitVec::new();
            for &c in cells {
                raw.push(false);
                raw.push(c);
            }
            raw.to_bytes()
        };

        let mut out = vec![0u8; data.len()];
        combine_odd_even(&pack(&odd), &pack(&even), &mut out);
        assert_eq!(out, data);
    }

    fn amiga_track(geometry: &DiskGeometry, ch: DiskCh) -> Vec<TrackSectorData> {
        (1..=geometry.sectors_per_track())
            .map(|s| TrackSectorData {
                chs: DiskChs::new(ch.c(), ch.h(), s),
                size_code: 2,
                data: (0..512).map(|i| (i as u8).wrapping_add(s)).collect(),
                deleted: false,
            })
            .collect()
    }

    #[test]
    fn dd_track_round_trips() {
        let geometry = DiskGeometry::amiga_880k();
        let ch = DiskCh::new(40, 1);
        let sectors = amiga_track(&geometry, ch);

        let raw = AmigaCodec.encode_track(&sectors, &geometry, ch).unwrap();
        let stream = BitStream::from_bitvec(raw);
        let track = AmigaCodec.decode_track(&stream, &geometry, ch).unwrap();

        assert_eq!(track.sectors.len(), AMIGA_DD_SPT);
        for (decoded, original) in track.sectors.iter().zip(sectors.iter()) {
            assert_eq!(decoded.chs, original.chs);
            assert!(decoded.header_crc_ok);
            assert_eq!(decoded.data_crc_ok, Some(true));
            assert_eq!(decoded.payload, original.data);
        }
    }

    #[test]
    fn hd_track_holds_22_sectors() {
        let geometry = DiskGeometry::amiga_1760k();
        let ch = DiskCh::new(0, 0);
        let sectors = amiga_track(&geometry, ch);
        assert_eq!(sectors.len(), AMIGA_HD_SPT);

        let raw = AmigaCodec.encode_track(&sectors, &geometry, ch).unwrap();
        let stream = BitStream::from_bitvec(raw);
        let track = AmigaCodec.decode_track(&stream, &geometry, ch).unwrap();
        assert_eq!(track.sectors.len(), AMIGA_HD_SPT);
        assert!(track.sectors.iter().all(|s| s.data_crc_ok == Some(true)));
    }

    #[test]
    fn corrupt_data_cell_fails_data_checksum() {
        let geometry = DiskGeometry::amiga_880k();
        let ch = DiskCh::new(0, 0);
        let sectors = amiga_track(&geometry, ch);

        let mut raw = AmigaCodec.encode_track(&sectors, &geometry, ch).unwrap();
        let stream = BitStream::from_bitvec(raw.clone());
        let track = AmigaCodec.decode_track(&stream, &geometry, ch).unwrap();

        // Flip a data cell in sector 5's payload region.
        let sync = track.sectors[4].data_mark_offset.unwrap();
        let data_offset = sync + SYNC_CELLS + INFO_CELLS + LABEL_CELLS + SUM_CELLS + SUM_CELLS;
        let bit = data_offset + 333;
        raw.set(bit, !raw.get(bit).unwrap());

        let stream = BitStream::from_bitvec(raw);
        let track = AmigaCodec.decode_track(&stream, &geometry, ch).unwrap();
        assert_eq!(track.sectors[4].data_crc_ok, Some(false));
        assert!(track.sectors[4].header_crc_ok);
        assert_eq!(track.sectors[5].data_crc_ok, Some(true));
    }
}
