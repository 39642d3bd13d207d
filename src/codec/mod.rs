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

    src/codec/mod.rs

    The TrackCodec trait and per-encoding dispatch. A codec parses a raw
    bitstream into sectors with integrity results, and builds full raw tracks
    from sector data for writing.
*/

pub mod amiga;
pub mod fm;
pub mod gcr;
pub mod ibm;

use bit_vec::BitVec;

use crate::{
    bitstream::BitStream,
    flux::{analyzer, capture::FluxCapture},
    types::{
        chs::{DiskCh, DiskChs},
        enums::TrackEncoding,
        geometry::DiskGeometry,
    },
    CodecError,
};

/// One sector parsed out of a track bitstream, with everything recovery needs to re-examine it.
#[derive(Clone, Debug)]
pub struct DecodedSector {
    pub chs: DiskChs,
    pub size_code: u8,
    pub payload: Vec<u8>,
    /// The CRC or checksum bytes recorded on disk after the payload.
    pub stored_crc: Vec<u8>,
    pub header_crc_ok: bool,
    /// `None` when the header had no matching data field.
    pub data_crc_ok: Option<bool>,
    pub deleted: bool,
    /// Mean PLL confidence over the data field's cells.
    pub confidence: f32,
    /// Per-bit confidence over payload + stored CRC, when the source stream carried one.
    pub bit_confidence: Option<Vec<f32>>,
    /// Raw bit offset of the data mark, for bit-slip re-extraction.
    pub data_mark_offset: Option<usize>,
}

impl DecodedSector {
    pub fn is_good(&self) -> bool {
        self.header_crc_ok && self.data_crc_ok == Some(true)
    }
}

/// The product of decoding one revolution.
#[derive(Clone, Debug, Default)]
pub struct DecodedTrack {
    pub sectors: Vec<DecodedSector>,
    pub markers_found: usize,
}

/// Sector content handed to a track writer.
#[derive(Clone, Debug)]
pub struct TrackSectorData {
    pub chs: DiskChs,
    pub size_code: u8,
    pub data: Vec<u8>,
    pub deleted: bool,
}

/// A track-level codec for one encoding family.
///
/// Data-level faults never abort a decode: a missing sync, bad header CRC or data CRC mismatch
/// records the sector with the appropriate flags and scanning continues. Only the complete
/// absence of any recognizable address mark in a revolution yields [`CodecError::NoAddressMarks`].
pub trait TrackCodec: Send + Sync {
    fn encoding(&self) -> TrackEncoding;

    /// Parse one revolution's raw bitstream into sectors.
    fn decode_track(&self, stream: &BitStream, geometry: &DiskGeometry, ch: DiskCh)
        -> Result<DecodedTrack, CodecError>;

    /// Build a complete raw track, gaps and marks included, ready for flux synthesis.
    fn encode_track(&self, sectors: &[TrackSectorData], geometry: &DiskGeometry, ch: DiskCh)
        -> Result<BitVec, CodecError>;
}

/// Resolve the codec for an encoding. GCR is detection-only; its codec refuses decode/encode.
pub fn codec_for(encoding: TrackEncoding) -> &'static dyn TrackCodec {
    match encoding {
        TrackEncoding::Mfm => &ibm::IbmCodec,
        TrackEncoding::Fm => &fm::FmCodec,
        TrackEncoding::AmigaMfm => &amiga::AmigaCodec,
        TrackEncoding::Gcr => &gcr::GcrCodec,
    }
}

/// Detect the encoding of a capture from its interval peak structure.
/// Returns the encoding and a confidence in [0, 1].
pub fn detect(capture: &FluxCapture) -> (Option<TrackEncoding>, f64) {
    let analysis = analyzer::analyze_capture(capture);
    (analysis.encoding, analysis.encoding_confidence)
}

/// Verify a reconstructed payload against its stored CRC bytes, per encoding. Used by
/// multi-capture voting and bit-slip, which rebuild payloads outside a normal decode.
pub fn verify_payload_crc(
    encoding: TrackEncoding,
    payload: &[u8],
    stored_crc: &[u8],
    deleted: bool,
) -> bool {
    use crate::util::crc_ibm_3740;
    match encoding {
        TrackEncoding::Mfm => {
            if stored_crc.len() != 2 {
                return false;
            }
            let mark: &[u8] = if deleted {
                &ibm::DDAM_MARKER_BYTES
            }
            else {
                &ibm::DAM_MARKER_BYTES
            };
            let crc = crc_ibm_3740(payload, Some(crc_ibm_3740(mark, None)));
            crc == u16::from_be_bytes([stored_crc[0], stored_crc[1]])
        }
        TrackEncoding::Fm => {
            if stored_crc.len() != 2 {
                return false;
            }
            let mark = if deleted { 0xF8 } else { 0xFB };
            let crc = crc_ibm_3740(payload, Some(crc_ibm_3740(&[mark], None)));
            crc == u16::from_be_bytes([stored_crc[0], stored_crc[1]])
        }
        TrackEncoding::AmigaMfm => {
            if stored_crc.len() != 4 {
                return false;
            }
            amiga::data_checksum(payload)
                == u32::from_be_bytes([stored_crc[0], stored_crc[1], stored_crc[2], stored_crc[3]])
        }
        TrackEncoding::Gcr => false,
    }
}

/// Re-extract a sector's data field with the read window slipped by `slip` raw cells around
/// the data mark, and re-check the CRC. Returns the payload when the slipped read verifies.
/// Only the mark-based encodings support slip re-extraction.
pub fn reextract_with_slip(
    encoding: TrackEncoding,
    stream: &BitStream,
    sector: &DecodedSector,
    slip: i32,
) -> Option<Vec<u8>> {
    use crate::{bitstream::read_data_buf, types::chs::n_to_bytes};

    let mark = sector.data_mark_offset?;
    let marker_len: i64 = match encoding {
        TrackEncoding::Mfm => 64,
        TrackEncoding::Fm => 16,
        _ => return None,
    };
    let base = mark as i64 + marker_len + slip as i64;
    if base < 0 {
        return None;
    }

    let size = n_to_bytes(sector.size_code);
    let mut buf = vec![0u8; size + 2];
    if read_data_buf(stream, base as usize, &mut buf) < buf.len() {
        return None;
    }
    let payload = buf[..size].to_vec();
    if verify_payload_crc(encoding, &payload, &buf[size..], sector.deleted) {
        Some(payload)
    }
    else {
        None
    }
}

/// The number of raw cells on one track at the given geometry's data rate and rotation speed.
pub fn track_raw_cells(geometry: &DiskGeometry) -> usize {
    let data_bits_per_sec = u32::from(geometry.data_rate()) as f64;
    let rev_secs = geometry.rpm().revolution_secs();
    // Two raw cells per data bit for MFM/FM families.
    (data_bits_per_sec * rev_secs * 2.0).round() as usize
}
