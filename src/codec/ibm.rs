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

    src/codec/ibm.rs

    The IBM System-34 MFM track codec, as used by PCs and compatibles.
    Address marks are three A1 bytes with missing-clock violations followed by
    an FE (ID) or FB/F8 (data / deleted data) mark byte.
*/

use bit_vec::BitVec;

use crate::{
    bitstream::{
        data_bit_confidence,
        data_confidence,
        encode_mfm,
        find_marker,
        read_data_buf,
        read_raw_bits,
        write_marker,
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

pub const GAP_BYTE: u8 = 0x4E;
pub const SYNC_BYTE: u8 = 0x00;

pub const IBM_GAP4A: usize = 80;
pub const IBM_GAP1: usize = 50;
pub const IBM_GAP2: usize = 22;
pub const SYNC_LEN: usize = 12;

// Pre-encoded raw markers for IAM, IDAM, DAM and DDAM.
pub const IAM_MARKER: u64 = 0x5224_5224_5224_5552;
pub const IDAM_MARKER: u64 = 0x4489_4489_4489_5554;
pub const DAM_MARKER: u64 = 0x4489_4489_4489_5545;
pub const DDAM_MARKER: u64 = 0x4489_4489_4489_554A;
pub const ANY_MARKER: u64 = 0x4489_4489_4489_0000;
pub const MARKER_MASK: u64 = 0xFFFF_FFFF_FFFF_0000;

pub const IAM_MARKER_BYTES: [u8; 4] = [0xC2, 0xC2, 0xC2, 0xFC];
pub const IDAM_MARKER_BYTES: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xFE];
pub const DAM_MARKER_BYTES: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xFB];
pub const DDAM_MARKER_BYTES: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xF8];

const IDAM_WORD: u16 = 0x5554;
const DAM_WORD: u16 = 0x5545;
const DDAM_WORD: u16 = 0x554A;

/// Default GAP3 length by sectors-per-track. 84 bytes for the 1.44M HD layout.
pub fn gap3_default(geometry: &DiskGeometry) -> usize {
    match (geometry.sectors_per_track(), geometry.sector_size()) {
        (18, 512) => 84,
        (15, 512) => 84,
        (9, 512) => 80,
        (8, 512) => 80,
        _ => 54,
    }
}

struct PendingHeader {
    chs: DiskChs,
    size_code: u8,
    header_crc_ok: bool,
}

fn flush_headerless(track: &mut DecodedTrack, pending: Option<PendingHeader>) {
    if let Some(p) = pending {
        log::trace!("IbmCodec::decode_track(): ID {} had no data field", p.chs);
        track.sectors.push(DecodedSector {
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
        });
    }
}

pub struct IbmCodec;

impl TrackCodec for IbmCodec {
    fn encoding(&self) -> TrackEncoding {
        TrackEncoding::Mfm
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

        while let Some(offset) = find_marker(stream, ANY_MARKER, MARKER_MASK, cursor) {
            let mark_word = match read_raw_bits(stream, offset + 48, 16) {
                Some(w) => w as u16,
                None => break,
            };

            match mark_word {
                IDAM_WORD => {
                    track.markers_found += 1;
                    flush_headerless(&mut track, pending.take());

                    let mut id_buf = [0u8; 6];
                    if read_data_buf(stream, offset + 64, &mut id_buf) < 6 {
                        break;
                    }
                    let (c, h, r, n) = (id_buf[0], id_buf[1], id_buf[2], id_buf[3]);
                    let stored = u16::from_be_bytes([id_buf[4], id_buf[5]]);

                    let mut crc_buf = IDAM_MARKER_BYTES.to_vec();
                    crc_buf.extend_from_slice(&[c, h, r, n]);
                    let header_crc_ok = crc_ibm_3740(&crc_buf, None) == stored;

                    if !header_crc_ok {
                        log::trace!(
                            "IbmCodec::decode_track(): {} bad header CRC for ID [c:{} h:{} s:{}]",
                            ch,
                            c,
                            h,
                            r
                        );
                    }

                    pending = Some(PendingHeader {
                        chs: DiskChs::new(c as u16, h, r),
                        size_code: n,
                        header_crc_ok,
                    });
                    cursor = offset + 64 + 6 * MFM_BYTE_LEN;
                }
                DAM_WORD | DDAM_WORD => {
                    track.markers_found += 1;
                    let deleted = mark_word == DDAM_WORD;

                    match pending.take() {
                        Some(p) => {
                            let size = n_to_bytes(p.size_code);
                            let data_offset = offset + 64;
                            let mut buf = vec![0u8; size + 2];
                            let read = read_data_buf(stream, data_offset, &mut buf);
                            let truncated = read < buf.len();

                            let payload = buf[..size.min(read)].to_vec();
                            let stored_crc = if truncated {
                                Vec::new()
                            }
                            else {
                                buf[size..].to_vec()
                            };

                            let data_crc_ok = if truncated {
                                false
                            }
                            else {
                                let mark = if deleted { &DDAM_MARKER_BYTES } else { &DAM_MARKER_BYTES };
                                let mut crc = crc_ibm_3740(mark, None);
                                crc = crc_ibm_3740(&buf[..size], Some(crc));
                                crc == u16::from_be_bytes([buf[size], buf[size + 1]])
                            };

                            track.sectors.push(DecodedSector {
                                chs: p.chs,
                                size_code: p.size_code,
                                payload,
                                stored_crc,
                                header_crc_ok: p.header_crc_ok,
                                data_crc_ok: Some(data_crc_ok),
                                deleted,
                                confidence: data_confidence(stream, data_offset, size + 2),
                                bit_confidence: stream
                                    .confidence()
                                    .map(|_| data_bit_confidence(stream, data_offset, size + 2)),
                                data_mark_offset: Some(offset),
                            });
                            cursor = offset + 64 + (size + 2) * MFM_BYTE_LEN;
                        }
                        None => {
                            // A data mark with no preceding ID. Step past it and keep scanning.
                            log::trace!("IbmCodec::decode_track(): {} orphan data mark at {}", ch, offset);
                            cursor = offset + 64;
                        }
                    }
                }
                _ => {
                    // A1-sync run with an unknown mark byte; resume after the sync.
                    cursor = offset + 2;
                }
            }
        }

        flush_headerless(&mut track, pending.take());

        if track.markers_found == 0 {
            log::debug!("IbmCodec::decode_track(): {} no address marks in revolution", ch);
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
        let track_byte_ct = bitcell_ct / MFM_BYTE_LEN;
        let gap3 = gap3_default(geometry);

        let mut track_bytes: Vec<u8> = Vec::with_capacity(track_byte_ct);
        let mut markers: Vec<(u64, usize)> = Vec::new();

        // GAP4a, sync, IAM, GAP1.
        track_bytes.extend_from_slice(&[GAP_BYTE; IBM_GAP4A]);
        track_bytes.extend_from_slice(&[SYNC_BYTE; SYNC_LEN]);
        markers.push((IAM_MARKER, track_bytes.len()));
        track_bytes.extend_from_slice(&IAM_MARKER_BYTES);
        track_bytes.extend_from_slice(&[GAP_BYTE; IBM_GAP1]);

        for sector in sectors {
            if sector.data.len() != n_to_bytes(sector.size_code) {
                log::error!(
                    "IbmCodec::encode_track(): {} sector {} data length {} does not match size code {}",
                    ch,
                    sector.chs,
                    sector.data.len(),
                    sector.size_code
                );
                return Err(CodecError::ParameterError);
            }

            // Sync, IDAM, ID, CRC.
            track_bytes.extend_from_slice(&[SYNC_BYTE; SYNC_LEN]);
            markers.push((IDAM_MARKER, track_bytes.len()));
            let idam_crc_offset = track_bytes.len();
            track_bytes.extend_from_slice(&IDAM_MARKER_BYTES);
            track_bytes.push(sector.chs.c() as u8);
            track_bytes.push(sector.chs.h());
            track_bytes.push(sector.chs.s());
            track_bytes.push(sector.size_code);
            let crc16 = crc_ibm_3740(&track_bytes[idam_crc_offset..], None);
            track_bytes.extend_from_slice(&crc16.to_be_bytes());

            // GAP2, sync, DAM, data, CRC, GAP3.
            track_bytes.extend_from_slice(&[GAP_BYTE; IBM_GAP2]);
            track_bytes.extend_from_slice(&[SYNC_BYTE; SYNC_LEN]);
            let (marker, marker_bytes) = if sector.deleted {
                (DDAM_MARKER, &DDAM_MARKER_BYTES)
            }
            else {
                (DAM_MARKER, &DAM_MARKER_BYTES)
            };
            markers.push((marker, track_bytes.len()));
            let dam_crc_offset = track_bytes.len();
            track_bytes.extend_from_slice(marker_bytes);
            track_bytes.extend_from_slice(&sector.data);
            let crc16 = crc_ibm_3740(&track_bytes[dam_crc_offset..], None);
            track_bytes.extend_from_slice(&crc16.to_be_bytes());

            track_bytes.extend_from_slice(&vec![GAP_BYTE; gap3]);
        }

        // Fill the rest of the track with GAP4b.
        if track_bytes.len() < track_byte_ct {
            track_bytes.extend_from_slice(&vec![GAP_BYTE; track_byte_ct - track_bytes.len()]);
        }
        if track_bytes.len() > track_byte_ct {
            log::warn!(
                "IbmCodec::encode_track(): {} format passed the index. Truncating to {} bytes",
                ch,
                track_byte_ct
            );
            track_bytes.truncate(track_byte_ct);
        }

        // Encode the whole track, then stamp the missing-clock markers over the stream.
        let mut raw = BitVec::with_capacity(track_bytes.len() * MFM_BYTE_LEN);
        let mut last_bit = false;
        encode_mfm(&track_bytes, &mut raw, &mut last_bit);

        for (marker, byte_offset) in markers {
            write_marker(&mut raw, marker, byte_offset * MFM_BYTE_LEN);
        }

        log::trace!(
            "IbmCodec::encode_track(): {} encoded {} sectors into {} raw cells",
            ch,
            sectors.len(),
            raw.len()
        );

        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitStream;

    fn track_data(geometry: &DiskGeometry, ch: DiskCh) -> Vec<TrackSectorData> {
        (1..=geometry.sectors_per_track())
            .map(|s| TrackSectorData {
                chs: DiskChs::new(ch.c(), ch.h(), s),
                size_code: 2,
                data: vec![s.wrapping_mul(17); 512],
                deleted: false,
            })
            .collect()
    }

    #[test]
    fn encode_decode_round_trip() {
        let geometry = DiskGeometry::pc_1440k();
        let ch = DiskCh::new(0, 0);
        let sectors = track_data(&geometry, ch);

        let raw = IbmCodec.encode_track(&sectors, &geometry, ch).unwrap();
        let stream = BitStream::from_bitvec(raw);
        let track = IbmCodec.decode_track(&stream, &geometry, ch).unwrap();

        assert_eq!(track.sectors.len(), 18);
        for (decoded, original) in track.sectors.iter().zip(sectors.iter()) {
            assert_eq!(decoded.chs, original.chs);
            assert!(decoded.header_crc_ok);
            assert_eq!(decoded.data_crc_ok, Some(true));
            assert_eq!(decoded.payload, original.data);
            assert!(!decoded.deleted);
        }
    }

    #[test]
    fn deleted_data_mark_round_trips() {
        let geometry = DiskGeometry::pc_1440k();
        let ch = DiskCh::new(3, 1);
        let mut sectors = track_data(&geometry, ch);
        sectors[4].deleted = true;

        let raw = IbmCodec.encode_track(&sectors, &geometry, ch).unwrap();
        let stream = BitStream::from_bitvec(raw);
        let track = IbmCodec.decode_track(&stream, &geometry, ch).unwrap();

        assert!(track.sectors[4].deleted);
        assert_eq!(track.sectors[4].data_crc_ok, Some(true));
        assert!(!track.sectors[3].deleted);
    }

    #[test]
    fn corrupt_payload_fails_data_crc_only() {
        let geometry = DiskGeometry::pc_1440k();
        let ch = DiskCh::new(0, 0);
        let sectors = track_data(&geometry, ch);

        let mut raw = IbmCodec.encode_track(&sectors, &geometry, ch).unwrap();

        // Find sector 9's data field and flip one payload data bit.
        let stream = BitStream::from_bitvec(raw.clone());
        let track = IbmCodec.decode_track(&stream, &geometry, ch).unwrap();
        let mark = track.sectors[8].data_mark_offset.unwrap();
        let bit = mark + 64 + 100 * MFM_BYTE_LEN + 1;
        raw.set(bit, !raw.get(bit).unwrap());

        let stream = BitStream::from_bitvec(raw);
        let track = IbmCodec.decode_track(&stream, &geometry, ch).unwrap();

        assert_eq!(track.sectors[8].data_crc_ok, Some(false));
        assert!(track.sectors[8].header_crc_ok);
        for (i, sector) in track.sectors.iter().enumerate() {
            if i != 8 {
                assert_eq!(sector.data_crc_ok, Some(true));
            }
        }
    }

    #[test]
    fn bare_gap_track_has_no_address_marks() {
        let stream = BitStream::from_bytes(&{
            let mut raw = BitVec::new();
            let mut last = false;
            encode_mfm(&[GAP_BYTE; 6250], &mut raw, &mut last);
            raw.to_bytes()
        });
        let geometry = DiskGeometry::pc_1440k();
        assert!(matches!(
            IbmCodec.decode_track(&stream, &geometry, DiskCh::new(0, 0)),
            Err(CodecError::NoAddressMarks)
        ));
    }

    #[test]
    fn track_fits_raw_cell_budget() {
        let geometry = DiskGeometry::pc_1440k();
        let ch = DiskCh::new(0, 0);
        let raw = IbmCodec.encode_track(&track_data(&geometry, ch), &geometry, ch).unwrap();
        assert_eq!(raw.len(), track_raw_cells(&geometry) / MFM_BYTE_LEN * MFM_BYTE_LEN);
    }
}
