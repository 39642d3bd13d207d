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

    src/file_formats/scp.rs

    Reader and writer for the SuperCardPro flux image format. SCP stores raw
    flux tick counts in 25ns units per revolution, with an offset table of
    single-sided track indices and a sum-of-bytes checksum over everything
    past the header.
*/

use binrw::{binrw, BinRead, BinWrite};
use bitflags::bitflags;

use crate::{
    flux::capture::FluxCapture,
    io::{Cursor, ReadSeek, ReadWriteSeek, Seek, SeekFrom, Write},
    ImageError,
};

pub const SCP_TRACK_COUNT: usize = 168;
pub const MAX_TRACK_NUMBER: usize = SCP_TRACK_COUNT - 1;
/// 25ns base capture resolution; `resolution` in the header scales it.
pub const BASE_CAPTURE_RES_NS: u64 = 25;
/// File offset of the first byte covered by the checksum.
pub const CHECKSUM_START: u64 = 0x10;
pub const SCP_MAX_REVOLUTIONS: usize = 5;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ScpFlags: u8 {
        const INDEX_ALIGNED = 0b0000_0001;
        const TPI_96        = 0b0000_0010;
        const RPM_360       = 0b0000_0100;
        const NORMALIZED    = 0b0000_1000;
        const READ_ONLY     = 0b0001_0000;
        const FOOTER        = 0b0010_0000;
        const EXTENDED_MODE = 0b0100_0000;
        const NON_SCP       = 0b1000_0000;
    }
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct ScpFileHeader {
    pub id: [u8; 3],
    pub version: u8,
    pub disk_type: u8,
    pub revolutions: u8,
    pub start_track: u8,
    pub end_track: u8,
    pub flags: u8,
    pub bit_cell_width: u8,
    pub heads: u8,
    pub resolution: u8,
    pub checksum: u32,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct ScpTrackHeader {
    pub id: [u8; 3],
    pub track_number: u8,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct ScpTrackRevolution {
    /// Duration of this revolution in capture ticks.
    pub index_time: u32,
    /// Number of 16-bit flux words for this revolution, extensions included.
    pub length: u32,
    /// Offset of the revolution's flux data from the start of the track block.
    pub data_offset: u32,
}

/// An SCP image: header parameters plus one optional capture per single-sided track index
/// (`cylinder * heads + head`).
pub struct ScpImage {
    pub version: u8,
    pub disk_type: u8,
    pub flags: ScpFlags,
    /// 0 = both sides, 1 = side 0 only, 2 = side 1 only.
    pub heads: u8,
    /// Capture resolution selector: tick width is `25ns * (resolution + 1)`.
    pub resolution: u8,
    /// Engine-side tick rate captures are converted to and from.
    pub sample_hz: u32,
    pub tracks: Vec<Option<FluxCapture>>,
}

impl ScpImage {
    pub fn new(sample_hz: u32) -> ScpImage {
        ScpImage {
            version: 0x22,
            disk_type: 0x33, // PC 1.44M
            flags: ScpFlags::INDEX_ALIGNED | ScpFlags::TPI_96,
            heads: 0,
            resolution: 0,
            sample_hz,
            tracks: (0..SCP_TRACK_COUNT).map(|_| None).collect(),
        }
    }

    fn tick_ns(&self) -> u64 {
        BASE_CAPTURE_RES_NS * (self.resolution as u64 + 1)
    }

    pub fn detect<RS: ReadSeek>(image: &mut RS) -> bool {
        if image.seek(SeekFrom::Start(0)).is_err() {
            return false;
        }
        match ScpFileHeader::read(image) {
            Ok(header) => &header.id == b"SCP",
            Err(_) => false,
        }
    }

    /// Parse an SCP image, converting flux words to engine ticks at `sample_hz`.
    pub fn read<RS: ReadSeek>(image: &mut RS, sample_hz: u32) -> Result<ScpImage, ImageError> {
        image.seek(SeekFrom::Start(0))?;
        let header = ScpFileHeader::read(image)?;
        if &header.id != b"SCP" {
            return Err(ImageError::UnknownFormat);
        }
        log::trace!(
            "ScpImage::read(): version {:X} type {:02X} revolutions {} tracks {}-{}",
            header.version,
            header.disk_type,
            header.revolutions,
            header.start_track,
            header.end_track
        );

        if header.revolutions == 0 || header.revolutions as usize > SCP_MAX_REVOLUTIONS {
            log::error!("ScpImage::read(): bad revolution count {}", header.revolutions);
            return Err(ImageError::FormatParseError);
        }
        if header.bit_cell_width != 0 {
            log::error!("ScpImage::read(): non-standard bit cell width not supported");
            return Err(ImageError::FormatParseError);
        }

        let mut track_offsets = [0u32; SCP_TRACK_COUNT];
        for offset in track_offsets.iter_mut() {
            *offset = u32::read_le(image)?;
        }

        // Verify the sum-of-bytes checksum over everything after the header field.
        if header.checksum != 0 {
            let computed = checksum_from(image)?;
            if computed != header.checksum {
                log::error!(
                    "ScpImage::read(): checksum mismatch: stored {:08X} computed {:08X}",
                    header.checksum,
                    computed
                );
                return Err(ImageError::ImageCorruptError);
            }
        }

        let mut scp = ScpImage {
            version: header.version,
            disk_type: header.disk_type,
            flags: ScpFlags::from_bits_retain(header.flags),
            heads: header.heads,
            resolution: header.resolution,
            sample_hz,
            tracks: (0..SCP_TRACK_COUNT).map(|_| None).collect(),
        };
        let tick_ns = scp.tick_ns();

        for (track_number, &block_offset) in track_offsets.iter().enumerate() {
            if block_offset == 0 {
                continue;
            }

            image.seek(SeekFrom::Start(block_offset as u64))?;
            let track_header = ScpTrackHeader::read(image)?;
            if &track_header.id != b"TRK" {
                log::error!(
                    "ScpImage::read(): expected TRK signature at {:08X}, got {:?}",
                    block_offset,
                    track_header.id
                );
                return Err(ImageError::FormatParseError);
            }

            let mut revolutions = Vec::with_capacity(header.revolutions as usize);
            for _ in 0..header.revolutions {
                revolutions.push(ScpTrackRevolution::read(image)?);
            }

            let mut intervals: Vec<u32> = Vec::new();
            let mut index_positions = vec![0usize];
            for rev in &revolutions {
                image.seek(SeekFrom::Start(block_offset as u64 + rev.data_offset as u64))?;
                let mut words_left = rev.length;
                while words_left > 0 {
                    let word = u16::read_le(image)?;
                    words_left -= 1;
                    let scp_ticks = if word == 0 {
                        // Zero escapes to a 32-bit extension for fluxes past 65535 ticks.
                        if words_left < 2 {
                            return Err(ImageError::FormatParseError);
                        }
                        words_left -= 2;
                        u32::read_le(image)? as u64
                    }
                    else {
                        word as u64
                    };
                    intervals.push(engine_ticks(scp_ticks, tick_ns, sample_hz));
                }
                index_positions.push(intervals.len());
            }

            let capture = FluxCapture::from_intervals(sample_hz, intervals, index_positions)
                .map_err(|e| {
                    log::error!("ScpImage::read(): track {} invalid flux: {}", track_number, e);
                    ImageError::ImageCorruptError
                })?;
            scp.tracks[track_number] = Some(capture);
        }

        Ok(scp)
    }

    /// Serialize the image. All present tracks must agree on revolution count, 1 to 5.
    pub fn write<RWS: ReadWriteSeek>(&self, output: &mut RWS) -> Result<(), ImageError> {
        let revolutions = match self
            .tracks
            .iter()
            .flatten()
            .map(|capture| capture.revolutions())
            .max()
        {
            Some(n) => n,
            None => {
                log::error!("ScpImage::write(): no tracks to write");
                return Err(ImageError::ParameterError);
            }
        };
        if !(1..=SCP_MAX_REVOLUTIONS).contains(&revolutions) {
            log::error!("ScpImage::write(): unsupported revolution count {}", revolutions);
            return Err(ImageError::ParameterError);
        }
        if self
            .tracks
            .iter()
            .flatten()
            .any(|capture| capture.revolutions() != revolutions)
        {
            log::error!("ScpImage::write(): tracks disagree on revolution count");
            return Err(ImageError::ParameterError);
        }

        let start_track = self.tracks.iter().position(Option::is_some).unwrap_or(0);
        let end_track = self.tracks.iter().rposition(Option::is_some).unwrap_or(0);
        let tick_ns = self.tick_ns();

        // Build the body (offset table + track blocks) in memory so the checksum can cover it.
        let table_len = (SCP_TRACK_COUNT * 4) as u64;
        let data_base = CHECKSUM_START + table_len;

        let mut offsets = [0u32; SCP_TRACK_COUNT];
        let mut track_data: Vec<u8> = Vec::new();

        for (track_number, slot) in self.tracks.iter().enumerate() {
            let Some(capture) = slot else {
                continue;
            };
            let block_start = data_base + track_data.len() as u64;
            offsets[track_number] = block_start as u32;

            let mut block = Cursor::new(Vec::new());
            ScpTrackHeader {
                id: *b"TRK",
                track_number: track_number as u8,
            }
            .write(&mut block)?;

            // Revolution headers are rewritten once the flux data layout is known.
            let rev_header_pos = block.position();
            for _ in 0..revolutions {
                ScpTrackRevolution {
                    index_time: 0,
                    length: 0,
                    data_offset: 0,
                }
                .write(&mut block)?;
            }

            let mut rev_headers = Vec::with_capacity(revolutions);
            for rev_index in 0..revolutions {
                let rev = capture.revolution(rev_index).map_err(|_| ImageError::ParameterError)?;
                let data_offset = block.position() as u32;
                let mut index_time: u64 = 0;
                let mut words: u32 = 0;

                for &interval in rev.intervals() {
                    let scp_ticks = scp_ticks(interval, self.sample_hz, tick_ns);
                    index_time += scp_ticks;
                    if scp_ticks < 0x1_0000 {
                        (scp_ticks as u16).write_le(&mut block)?;
                        words += 1;
                    }
                    else {
                        0u16.write_le(&mut block)?;
                        (scp_ticks as u32).write_le(&mut block)?;
                        words += 3;
                    }
                }

                rev_headers.push(ScpTrackRevolution {
                    index_time: index_time as u32,
                    length: words,
                    data_offset,
                });
            }

            block.seek(SeekFrom::Start(rev_header_pos))?;
            for header in &rev_headers {
                header.write(&mut block)?;
            }
            track_data.extend_from_slice(&block.into_inner());
        }

        let mut body: Vec<u8> = Vec::with_capacity(table_len as usize + track_data.len());
        for offset in offsets {
            body.extend_from_slice(&offset.to_le_bytes());
        }
        body.extend_from_slice(&track_data);

        let checksum = body.iter().fold(0u32, |sum, &b| sum.wrapping_add(b as u32));

        output.seek(SeekFrom::Start(0))?;
        ScpFileHeader {
            id: *b"SCP",
            version: self.version,
            disk_type: self.disk_type,
            revolutions: revolutions as u8,
            start_track: start_track as u8,
            end_track: end_track as u8,
            flags: self.flags.bits(),
            bit_cell_width: 0,
            heads: self.heads,
            resolution: self.resolution,
            checksum,
        }
        .write(output)?;
        output.write_all(&body)?;
        Ok(())
    }
}

/// Convert an engine tick count to capture ticks, rounding to the encoded resolution.
fn scp_ticks(interval: u32, sample_hz: u32, tick_ns: u64) -> u64 {
    let ns = interval as f64 * 1.0e9 / sample_hz as f64;
    ((ns / tick_ns as f64).round() as u64).max(1)
}

/// Convert capture ticks back to engine ticks.
fn engine_ticks(scp_ticks: u64, tick_ns: u64, sample_hz: u32) -> u32 {
    let ns = (scp_ticks * tick_ns) as f64;
    (ns * sample_hz as f64 / 1.0e9).round().max(1.0) as u32
}

/// Sum of all bytes from CHECKSUM_START to the end of the stream.
fn checksum_from<RS: ReadSeek>(image: &mut RS) -> Result<u32, ImageError> {
    let pos = image.stream_position()?;
    image.seek(SeekFrom::Start(CHECKSUM_START))?;
    let mut sum = 0u32;
    let mut buf = [0u8; 4096];
    loop {
        let n = image.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for &b in &buf[..n] {
            sum = sum.wrapping_add(b as u32);
        }
    }
    image.seek(SeekFrom::Start(pos))?;
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_SAMPLE_HZ;

    #[test]
    fn tick_conversion_is_exact_for_multiples() {
        // 288 ticks @72MHz is 4000ns = 160 ticks @25ns.
        assert_eq!(scp_ticks(288, DEFAULT_SAMPLE_HZ, 25), 160);
        assert_eq!(engine_ticks(160, 25, DEFAULT_SAMPLE_HZ), 288);
    }

    #[test]
    fn single_track_round_trip() {
        let pattern = [288u32, 432, 576, 288, 288];
        let mut intervals = Vec::new();
        for _ in 0..2000 {
            intervals.extend_from_slice(&pattern);
        }
        let len = intervals.len();
        let capture =
            FluxCapture::from_intervals(DEFAULT_SAMPLE_HZ, intervals, vec![0, len / 2, len]).unwrap();

        let mut scp = ScpImage::new(DEFAULT_SAMPLE_HZ);
        scp.tracks[0] = Some(capture.clone());

        let mut file = Cursor::new(Vec::new());
        scp.write(&mut file).unwrap();

        let parsed = ScpImage::read(&mut file, DEFAULT_SAMPLE_HZ).unwrap();
        assert_eq!(parsed.tracks[0].as_ref().unwrap(), &capture);
    }

    #[test]
    fn checksum_matches_independent_sum() {
        let capture =
            FluxCapture::from_intervals(DEFAULT_SAMPLE_HZ, vec![288; 100], vec![0, 100]).unwrap();
        let mut scp = ScpImage::new(DEFAULT_SAMPLE_HZ);
        scp.tracks[4] = Some(capture);

        let mut file = Cursor::new(Vec::new());
        scp.write(&mut file).unwrap();
        let bytes = file.into_inner();

        let stored = u32::from_le_bytes([bytes[0x0C], bytes[0x0D], bytes[0x0E], bytes[0x0F]]);
        let computed: u32 = bytes[0x10..]
            .iter()
            .fold(0u32, |sum, &b| sum.wrapping_add(b as u32));
        assert_eq!(stored, computed);
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let capture =
            FluxCapture::from_intervals(DEFAULT_SAMPLE_HZ, vec![288; 100], vec![0, 100]).unwrap();
        let mut scp = ScpImage::new(DEFAULT_SAMPLE_HZ);
        scp.tracks[0] = Some(capture);

        let mut file = Cursor::new(Vec::new());
        scp.write(&mut file).unwrap();
        let mut bytes = file.into_inner();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let mut corrupt = Cursor::new(bytes);
        assert!(matches!(
            ScpImage::read(&mut corrupt, DEFAULT_SAMPLE_HZ),
            Err(ImageError::ImageCorruptError)
        ));
    }

    #[test]
    fn long_flux_uses_extension_words() {
        // 117990 engine ticks @72MHz is 65550 capture ticks, past the 16-bit range, and an
        // exact multiple of the resolution ratio so the round trip stays bit-for-bit.
        let intervals = vec![117_990u32, 288, 288];
        let capture = FluxCapture::from_intervals(DEFAULT_SAMPLE_HZ, intervals, vec![0, 3]).unwrap();
        let mut scp = ScpImage::new(DEFAULT_SAMPLE_HZ);
        scp.tracks[0] = Some(capture.clone());

        let mut file = Cursor::new(Vec::new());
        scp.write(&mut file).unwrap();
        let parsed = ScpImage::read(&mut file, DEFAULT_SAMPLE_HZ).unwrap();
        assert_eq!(parsed.tracks[0].as_ref().unwrap(), &capture);
    }

    #[test]
    fn detect_rejects_other_files() {
        let mut not_scp = Cursor::new(b"HXCPICFE................".to_vec());
        assert!(!ScpImage::detect(&mut not_scp));
    }
}
