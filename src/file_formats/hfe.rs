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

    src/file_formats/hfe.rs

    Reader and writer for the HxC HFE v1 bitstream image format. Track data
    lives in 512-byte blocks that alternate 256 bytes of side 0 with 256 bytes
    of side 1; bits are stored LSB-first within each byte.
*/

use binrw::{binrw, BinRead, BinWrite};
use bit_vec::BitVec;

use crate::{
    io::{Read, ReadSeek, ReadWriteSeek, Seek, SeekFrom, Write},
    types::enums::TrackEncoding,
    util::generate_reverse_table,
    ImageError,
};

pub const HFE_SIGNATURE: &[u8; 8] = b"HXCPICFE";
pub const HFE_BLOCK_SIZE: usize = 512;
pub const HFE_HALF_BLOCK: usize = 256;

// Track encoding codes.
pub const HFE_ENC_FM: u8 = 0x00;
pub const HFE_ENC_MFM: u8 = 0x02;
pub const HFE_ENC_AMIGA_MFM: u8 = 0x04;

const REVERSE_TABLE: [u8; 256] = generate_reverse_table();

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct HfeFileHeader {
    signature: [u8; 8],
    format_revision: u8,
    number_of_tracks: u8,
    number_of_sides: u8,
    track_encoding: u8,
    bit_rate: u16,
    rpm: u16,
    interface_mode: u8,
    reserved: u8,
    track_list_offset: u16,
    write_allowed: u8,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct HfeTrackIndexEntry {
    /// Offset of the track data in 512-byte blocks.
    offset: u16,
    /// Significant length of the interleaved track data in bytes.
    len: u16,
}

pub fn encoding_code(encoding: TrackEncoding) -> Option<u8> {
    match encoding {
        TrackEncoding::Fm => Some(HFE_ENC_FM),
        TrackEncoding::Mfm => Some(HFE_ENC_MFM),
        TrackEncoding::AmigaMfm => Some(HFE_ENC_AMIGA_MFM),
        TrackEncoding::Gcr => None,
    }
}

pub fn encoding_from_code(code: u8) -> Option<TrackEncoding> {
    match code {
        HFE_ENC_FM => Some(TrackEncoding::Fm),
        HFE_ENC_MFM => Some(TrackEncoding::Mfm),
        HFE_ENC_AMIGA_MFM => Some(TrackEncoding::AmigaMfm),
        _ => None,
    }
}

/// An HFE v1 image: one raw bitstream per (cylinder, side).
pub struct HfeImage {
    pub encoding: TrackEncoding,
    pub bit_rate_kbps: u16,
    pub rpm: u16,
    pub sides: u8,
    /// Indexed by cylinder; `[side0, side1]`.
    pub tracks: Vec<[Option<BitVec>; 2]>,
}

impl HfeImage {
    pub fn new(encoding: TrackEncoding, bit_rate_kbps: u16, rpm: u16, sides: u8) -> HfeImage {
        HfeImage {
            encoding,
            bit_rate_kbps,
            rpm,
            sides,
            tracks: Vec::new(),
        }
    }

    pub fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        if image.seek(SeekFrom::Start(0)).is_err() {
            return false;
        }
        let mut magic = [0u8; 8];
        match image.read_exact(&mut magic) {
            Ok(()) => &magic == HFE_SIGNATURE,
            Err(_) => false,
        }
    }

    pub fn read<RS: ReadSeek>(image: &mut RS) -> Result<HfeImage, ImageError> {
        image.seek(SeekFrom::Start(0))?;
        let header = HfeFileHeader::read(image)?;
        if &header.signature != HFE_SIGNATURE {
            return Err(ImageError::UnknownFormat);
        }
        log::trace!(
            "HfeImage::read(): rev {} tracks {} sides {} encoding {:02X} {}kbps",
            header.format_revision,
            header.number_of_tracks,
            header.number_of_sides,
            header.track_encoding,
            header.bit_rate
        );

        let encoding = encoding_from_code(header.track_encoding).ok_or_else(|| {
            log::error!("HfeImage::read(): unknown track encoding {:02X}", header.track_encoding);
            ImageError::FormatParseError
        })?;

        let lut_offset = header.track_list_offset as u64 * HFE_BLOCK_SIZE as u64;
        image.seek(SeekFrom::Start(lut_offset))?;
        let mut entries = Vec::with_capacity(header.number_of_tracks as usize);
        for _ in 0..header.number_of_tracks {
            entries.push(HfeTrackIndexEntry::read(image)?);
        }

        let mut tracks = Vec::with_capacity(entries.len());
        for (cylinder, entry) in entries.iter().enumerate() {
            let data_offset = entry.offset as u64 * HFE_BLOCK_SIZE as u64;
            let stored = (entry.len as usize).div_ceil(HFE_BLOCK_SIZE) * HFE_BLOCK_SIZE;

            image.seek(SeekFrom::Start(data_offset))?;
            let mut raw = vec![0u8; stored];
            image.read_exact(&mut raw)?;

            // De-interleave the alternating 256-byte half blocks.
            let side_len = entry.len as usize / 2;
            let mut side_bytes = [Vec::with_capacity(side_len), Vec::with_capacity(side_len)];
            for (block_index, block) in raw.chunks(HFE_BLOCK_SIZE).enumerate() {
                let base = block_index * HFE_HALF_BLOCK;
                for side in 0..2 {
                    let lo = base.min(side_len);
                    let hi = (base + HFE_HALF_BLOCK).min(side_len);
                    if hi > lo {
                        let chunk = &block[side * HFE_HALF_BLOCK..side * HFE_HALF_BLOCK + (hi - lo)];
                        side_bytes[side].extend(chunk.iter().map(|&b| REVERSE_TABLE[b as usize]));
                    }
                }
            }

            let side1 = (header.number_of_sides > 1).then(|| BitVec::from_bytes(&side_bytes[1]));
            tracks.push([Some(BitVec::from_bytes(&side_bytes[0])), side1]);
            log::trace!(
                "HfeImage::read(): cylinder {} side bytes {}",
                cylinder,
                side_len
            );
        }

        Ok(HfeImage {
            encoding,
            bit_rate_kbps: header.bit_rate,
            rpm: header.rpm,
            sides: header.number_of_sides,
            tracks,
        })
    }

    pub fn write<RWS: ReadWriteSeek>(&self, output: &mut RWS) -> Result<(), ImageError> {
        let code = encoding_code(self.encoding).ok_or(ImageError::ParameterError)?;
        if self.tracks.is_empty() {
            return Err(ImageError::ParameterError);
        }

        // Both sides of a cylinder must pack to the same whole-byte length.
        let mut side_byte_lens = Vec::with_capacity(self.tracks.len());
        for (cylinder, sides) in self.tracks.iter().enumerate() {
            let len0 = sides[0].as_ref().map(|b| b.len()).unwrap_or(0);
            let len1 = sides[1].as_ref().map(|b| b.len()).unwrap_or(len0);
            if len0 % 8 != 0 || len1 % 8 != 0 || (sides[1].is_some() && len0 != len1) {
                log::error!(
                    "HfeImage::write(): cylinder {} has unaligned or mismatched side lengths {}/{}",
                    cylinder,
                    len0,
                    len1
                );
                return Err(ImageError::ParameterError);
            }
            side_byte_lens.push(len0 / 8);
        }

        // Header block, LUT block, then track data blocks.
        let lut_block = 1u16;
        let lut_blocks = (self.tracks.len() * 4).div_ceil(HFE_BLOCK_SIZE) as u16;
        let mut next_block = 1 + lut_blocks;

        let mut entries = Vec::with_capacity(self.tracks.len());
        for &side_bytes in &side_byte_lens {
            let len = (side_bytes * 2) as u16;
            let blocks = (side_bytes * 2).div_ceil(HFE_BLOCK_SIZE) as u16;
            entries.push(HfeTrackIndexEntry {
                offset: next_block,
                len,
            });
            next_block += blocks;
        }

        output.seek(SeekFrom::Start(0))?;
        HfeFileHeader {
            signature: *HFE_SIGNATURE,
            format_revision: 0,
            number_of_tracks: self.tracks.len() as u8,
            number_of_sides: self.sides,
            track_encoding: code,
            bit_rate: self.bit_rate_kbps,
            rpm: self.rpm,
            interface_mode: 0x07, // generic Shugart
            reserved: 0,
            track_list_offset: lut_block,
            write_allowed: 0xFF,
        }
        .write(output)?;

        // Pad the header block, write the LUT, pad it out.
        pad_to(output, HFE_BLOCK_SIZE as u64)?;
        for entry in &entries {
            entry.write(output)?;
        }
        pad_to(output, (1 + lut_blocks) as u64 * HFE_BLOCK_SIZE as u64)?;

        for (sides, &side_bytes) in self.tracks.iter().zip(side_byte_lens.iter()) {
            let side0 = pack_lsb_first(sides[0].as_ref(), side_bytes);
            let side1 = pack_lsb_first(sides[1].as_ref(), side_bytes);

            let blocks = (side_bytes * 2).div_ceil(HFE_BLOCK_SIZE);
            for block in 0..blocks {
                let base = block * HFE_HALF_BLOCK;
                for side in [&side0, &side1] {
                    let mut half = [0u8; HFE_HALF_BLOCK];
                    if base < side.len() {
                        let n = (side.len() - base).min(HFE_HALF_BLOCK);
                        half[..n].copy_from_slice(&side[base..base + n]);
                    }
                    output.write_all(&half)?;
                }
            }
        }
        Ok(())
    }
}

fn pack_lsb_first(bits: Option<&BitVec>, side_bytes: usize) -> Vec<u8> {
    match bits {
        Some(bits) => bits.to_bytes().iter().map(|&b| REVERSE_TABLE[b as usize]).collect(),
        None => vec![0u8; side_bytes],
    }
}

fn pad_to<RWS: ReadWriteSeek>(output: &mut RWS, position: u64) -> Result<(), ImageError> {
    let current = output.stream_position()?;
    if current < position {
        output.write_all(&vec![0u8; (position - current) as usize])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Cursor;

    fn track_bits(seed: u8, bytes: usize) -> BitVec {
        let data: Vec<u8> = (0..bytes).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
        BitVec::from_bytes(&data)
    }

    #[test]
    fn double_sided_round_trip_preserves_bits() {
        let mut image = HfeImage::new(TrackEncoding::Mfm, 250, 300, 2);
        for c in 0..10u8 {
            image
                .tracks
                .push([Some(track_bits(c, 6250)), Some(track_bits(c ^ 0xFF, 6250))]);
        }

        let mut file = Cursor::new(Vec::new());
        image.write(&mut file).unwrap();

        let parsed = HfeImage::read(&mut file).unwrap();
        assert_eq!(parsed.encoding, TrackEncoding::Mfm);
        assert_eq!(parsed.bit_rate_kbps, 250);
        assert_eq!(parsed.tracks.len(), 10);
        for (a, b) in parsed.tracks.iter().zip(image.tracks.iter()) {
            assert_eq!(a[0], b[0]);
            assert_eq!(a[1], b[1]);
        }
    }

    #[test]
    fn single_sided_round_trip() {
        let mut image = HfeImage::new(TrackEncoding::Fm, 125, 300, 1);
        for c in 0..5u8 {
            image.tracks.push([Some(track_bits(c, 3125)), None]);
        }

        let mut file = Cursor::new(Vec::new());
        image.write(&mut file).unwrap();
        let parsed = HfeImage::read(&mut file).unwrap();
        assert_eq!(parsed.encoding, TrackEncoding::Fm);
        for (a, b) in parsed.tracks.iter().zip(image.tracks.iter()) {
            assert_eq!(a[0], b[0]);
            assert!(a[1].is_none());
        }
    }

    #[test]
    fn lsb_bit_order_on_disk() {
        let mut image = HfeImage::new(TrackEncoding::Mfm, 250, 300, 1);
        // A single 0x80 byte (MSB set) must land as 0x01 on disk.
        image.tracks.push([Some(BitVec::from_bytes(&[0x80; 256])), None]);

        let mut file = Cursor::new(Vec::new());
        image.write(&mut file).unwrap();
        let bytes = file.into_inner();
        // Track data begins at block 2 (header, LUT).
        assert_eq!(bytes[2 * HFE_BLOCK_SIZE], 0x01);
    }

    #[test]
    fn spec_encoding_codes() {
        assert_eq!(encoding_code(TrackEncoding::Mfm), Some(0x02));
        assert_eq!(encoding_code(TrackEncoding::Fm), Some(0x00));
        assert_eq!(encoding_code(TrackEncoding::AmigaMfm), Some(0x04));
        assert_eq!(encoding_code(TrackEncoding::Gcr), None);
    }
}
