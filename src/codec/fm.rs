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

    src/codec/fm.rs

    The FM track codec, as used by 8" diskettes and the BBC Micro DFS:
    a set clock cell before every data bit, address marks formed by clock
    violations against the 0xC7 clock pattern.
*/

use bit_vec::BitVec;

use crate::{
    bitstream::{
        data_bit_confidence,
        data_confidence,
        encode_fm,
        find_marker_u16,
        read_data_buf,
        BitStream,
        MFM_BYTE_LEN,
    },
    codec::{track_raw_cells, DecodedSector, DecodedTrack, TrackCodec, TrackSectorData},
    types::{
        chs::{n_to_bytes, DiskCh, DiskChs},
        enums::TrackEncoding,
        geometry::DiskGeometry,
    },
    util::crc_ibm_3740,
    CodecError,
};

pub const FM_GAP_BYTE: u8 = 0xFF;
pub const FM_SYNC_BYTE: u8 = 0x00;

pub const FM_GAP1: usize = 16;
pub const FM_GAP2: usize = 11;
pub const FM_GAP3: usize = 16;
pub const FM_SYNC_LEN: usize = 6;

// FM marks carry the 0xC7 clock pattern: FE/FB/F8 interleaved with clocks 1100_0111.
pub const IDAM_MARKER_FM: u16 = 0xF57E;
pub const DAM_MARKER_FM: u16 = 0xF56F;
pub const DDAM_MARKER_FM: u16 = 0xF56A;

const IDAM_BYTE: u8 = 0xFE;
const DAM_BYTE: u8 = 0xFB;
const DDAM_BYTE: u8 = 0xF8;

struct PendingHeader {
    chs: DiskChs,
    size_code: u8,
    header_crc_ok: bool,
}

pub struct FmCodec;

impl TrackCodec for FmCodec {
    fn encoding(&self) -> TrackEncoding {
        TrackEncoding::Fm
    }

    fn decode_track(
        &self,
        stream: &BitStream,
        _geometry: &DiskGeometry,
        ch: DiskCh,
    ) -> Result<DecodedTrack, CodecError> {
        let mut track = DecodedTrack::default();
        let mut pending: Option<PendingHeader> = None;
        let mut cursor = 0usize;

        loop {
            // The three marks share a 0xF5 clock-violation prefix; take whichever comes first.
            let next = [IDAM_MARKER_FM, DAM_MARKER_FM, DDAM_MARKER_FM]
                .iter()
                .filter_map(|&m| find_marker_u16(stream, m, cursor).map(|off| (off, m)))
                .min_by_key(|&(off, _)| off);

            let (offset, mark) = match next {
                Some(hit) => hit,
                None => break,
            };

            match mark {
                IDAM_MARKER_FM => {
                    track.markers_found += 1;
                    if let Some(p) = pending.take() {
                        log::trace!("FmCodec::decode_track(): ID {} had no data field", p.chs);
                        track.sectors.push(headerless(p));
                    }

                    let mut id_buf = [0u8; 6];
                    if read_data_buf(stream, offset + 16, &mut id_buf) < 6 {
                        break;
                    }
                    let (c, h, r, n) = (id_buf[0], id_buf[1], id_buf[2], id_buf[3]);
                    let stored = u16::from_be_bytes([id_buf[4], id_buf[5]]);

                    // FM CRC scope is the mark byte plus the ID; there is no A1 sync run.
                    let crc = crc_ibm_3740(&[IDAM_BYTE, c, h, r, n], None);
                    let header_crc_ok = crc == stored;

                    pending = Some(PendingHeader {
                        chs: DiskChs::new(c as u16, h, r),
                        size_code: n,
                        header_crc_ok,
                    });
                    cursor = offset + 16 + 6 * MFM_BYTE_LEN;
                }
                _ => {
                    track.markers_found += 1;
                    let deleted = mark == DDAM_MARKER_FM;

                    match pending.take() {
                        Some(p) => {
                            let size = n_to_bytes(p.size_code);
                            let data_offset = offset + 16;
                            let mut buf = vec![0u8; size + 2];
                            let read = read_data_buf(stream, data_offset, &mut buf);
                            let truncated = read < buf.len();

                            let data_crc_ok = if truncated {
                                false
                            }
                            else {
                                let mark_byte = if deleted { DDAM_BYTE } else { DAM_BYTE };
                                let mut crc = crc_ibm_3740(&[mark_byte], None);
                                crc = crc_ibm_3740(&buf[..size], Some(crc));
                                crc == u16::from_be_bytes([buf[size], buf[size + 1]])
                            };

                            track.sectors.push(DecodedSector {
                                chs: p.chs,
                                size_code: p.size_code,
                                payload: buf[..size.min(read)].to_vec(),
                                stored_crc: if truncated { Vec::new() } else { buf[size..].to_vec() },
                                header_crc_ok: p.header_crc_ok,
                                data_crc_ok: Some(data_crc_ok),
                                deleted,
                                confidence: data_confidence(stream, data_offset, size + 2),
                                bit_confidence: stream
                                    .confidence()
                                    .map(|_| data_bit_confidence(stream, data_offset, size + 2)),
                                data_mark_offset: Some(offset),
                            });
                            cursor = offset + 16 + (size + 2) * MFM_BYTE_LEN;
                        }
                        None => {
                            log::trace!("FmCodec::decode_track(): {} orphan data mark at {}", ch, offset);
                            cursor = offset + 16;
                        }
                    }
                }
            }
        }

        if let Some(p) = pending.take() {
            track.sectors.push(headerless(p));
        }

        if track.markers_found == 0 {
            log::debug!("FmCodec::decode_track(): {} no address marks in revolution", ch);
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
        let bitcell_ct = track_raw_cells(geometry);
        let mut raw = BitVec::with_capacity(bitcell_ct);

        let push_mark = |raw: &mut BitVec, mark: u16| {
            for bit in (0..16).rev() {
                raw.push((mark >> bit) & 1 != 0);
            }
        };

        encode_fm(&[FM_GAP_BYTE; FM_GAP1], &mut raw);

        for sector in sectors {
            if sector.data.len() != n_to_bytes(sector.size_code) {
                log::error!(
                    "FmCodec::encode_track(): {} sector {} data length {} does not match size code {}",
                    ch,
                    sector.chs,
                    sector.data.len(),
                    sector.size_code
                );
                return Err(CodecError::ParameterError);
            }

            encode_fm(&[FM_SYNC_BYTE; FM_SYNC_LEN], &mut raw);
            push_mark(&mut raw, IDAM_MARKER_FM);
            let id = [sector.chs.c() as u8, sector.chs.h(), sector.chs.s(), sector.size_code];
            encode_fm(&id, &mut raw);
            let mut crc = crc_ibm_3740(&[IDAM_BYTE], None);
            crc = crc_ibm_3740(&id, Some(crc));
            encode_fm(&crc.to_be_bytes(), &mut raw);

            encode_fm(&[FM_GAP_BYTE; FM_GAP2], &mut raw);
            encode_fm(&[FM_SYNC_BYTE; FM_SYNC_LEN], &mut raw);

            let (mark_raw, mark_byte) = if sector.deleted {
                (DDAM_MARKER_FM, DDAM_BYTE)
            }
            else {
                (DAM_MARKER_FM, DAM_BYTE)
            };
            push_mark(&mut raw, mark_raw);
            encode_fm(&sector.data, &mut raw);
            let mut crc = crc_ibm_3740(&[mark_byte], None);
            crc = crc_ibm_3740(&sector.data, Some(crc));
            encode_fm(&crc.to_be_bytes(), &mut raw);

            encode_fm(&[FM_GAP_BYTE; FM_GAP3], &mut raw);
        }

        // Fill the remainder of the track with gap bytes.
        while raw.len() + MFM_BYTE_LEN <= bitcell_ct {
            encode_fm(&[FM_GAP_BYTE], &mut raw);
        }
        if raw.len() > bitcell_ct {
            log::warn!(
                "FmCodec::encode_track(): {} format passed the index. Truncating to {} cells",
                ch,
                bitcell_ct
            );
            raw.truncate(bitcell_ct);
        }

        Ok(raw)
    }
}

fn headerless(p: PendingHeader) -> DecodedSector {
    DecodedSector {
        chs: p.chs,
        size_code: p.size_code,
        payload: Vec::new(),
        stored_crc: Vec::new(),
        header_crc_ok: p.header_crc_ok,
        data_crc_ok: None,
        deleted: false,
        confidence: 0.0,
        bit_confidence: None,
        data_mark_offset: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_mark(mark: u8) -> u16 {
        const MARK_CLOCK: u8 = 0xC7;
        let mut raw = 0u16;
        for bit in (0..8).rev() {
            raw = (raw << 1) | ((MARK_CLOCK >> bit) & 1) as u16;
            raw = (raw << 1) | ((mark >> bit) & 1) as u16;
        }
        raw
    }

    #[test]
    fn mark_encoding_matches_constants() {
        assert_eq!(encode_mark(IDAM_BYTE), IDAM_MARKER_FM);
        assert_eq!(encode_mark(DAM_BYTE), DAM_MARKER_FM);
        assert_eq!(encode_mark(DDAM_BYTE), DDAM_MARKER_FM);
    }

    fn bbc_track(geometry: &DiskGeometry, ch: DiskCh) -> Vec<TrackSectorData> {
        (1..=geometry.sectors_per_track())
            .map(|s| TrackSectorData {
                chs: DiskChs::new(ch.c(), ch.h(), s),
                size_code: 1,
                data: vec![s.wrapping_add(0x30); 256],
                deleted: false,
            })
            .collect()
    }

    #[test]
    fn encode_decode_round_trip() {
        let geometry = DiskGeometry::bbc_200k();
        let ch = DiskCh::new(10, 0);
        let sectors = bbc_track(&geometry, ch);

        let raw = FmCodec.encode_track(&sectors, &geometry, ch).unwrap();
        let stream = BitStream::from_bitvec(raw);
        let track = FmCodec.decode_track(&stream, &geometry, ch).unwrap();

        assert_eq!(track.sectors.len(), 10);
        for (decoded, original) in track.sectors.iter().zip(sectors.iter()) {
            assert_eq!(decoded.chs, original.chs);
            assert!(decoded.header_crc_ok);
            assert_eq!(decoded.data_crc_ok, Some(true));
            assert_eq!(decoded.payload, original.data);
        }
    }

    #[test]
    fn empty_track_is_markerless() {
        let geometry = DiskGeometry::bbc_200k();
        let raw = FmCodec.encode_track(&[], &geometry, DiskCh::new(0, 0)).unwrap();
        let stream = BitStream::from_bitvec(raw);
        assert!(matches!(
            FmCodec.decode_track(&stream, &geometry, DiskCh::new(0, 0)),
            Err(CodecError::NoAddressMarks)
        ));
    }
}
