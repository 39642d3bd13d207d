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

    tests/images.rs

    Image format round trips at the integration level: SCP byte-exactness,
    IMG size law, and the codec round trip through a full sector table.
*/

mod common;

use std::io::Cursor;

use fluxrescue::{
    bitstream::BitStream,
    file_formats::{
        img::{FillPolicy, RawImage},
        scp::ScpImage,
    },
    flux::capture::FluxCapture,
    scan::decode_stream_into_table,
    types::{chs::DiskCh, enums::SectorStatus},
    DiskGeometry,
    SectorTable,
    DEFAULT_SAMPLE_HZ,
};

use crate::common::{compute_slice_hash, index_payload, init, track_raw};

/// The flux capture from the SCP scenario: the five-interval pattern repeated out to 100_000
/// intervals, two revolutions split at 50_000.
fn scenario_capture() -> FluxCapture {
    let pattern = [288u32, 432, 576, 288, 288];
    let mut intervals = Vec::with_capacity(100_000);
    for _ in 0..20_000 {
        intervals.extend_from_slice(&pattern);
    }
    FluxCapture::from_intervals(DEFAULT_SAMPLE_HZ, intervals, vec![0, 50_000, 100_000]).unwrap()
}

#[test]
fn scp_round_trip_is_exact() {
    init();
    let capture = scenario_capture();

    let mut scp = ScpImage::new(DEFAULT_SAMPLE_HZ);
    scp.tracks[0] = Some(capture.clone());

    let mut file = Cursor::new(Vec::new());
    scp.write(&mut file).unwrap();

    let parsed = ScpImage::read(&mut file, DEFAULT_SAMPLE_HZ).unwrap();
    assert_eq!(parsed.tracks[0].as_ref().unwrap(), &capture);
}

#[test]
fn scp_header_checksum_matches_sum_of_bytes() {
    init();
    let mut scp = ScpImage::new(DEFAULT_SAMPLE_HZ);
    scp.tracks[0] = Some(scenario_capture());

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
fn scp_serialization_is_deterministic() {
    init();
    let build = || {
        let mut scp = ScpImage::new(DEFAULT_SAMPLE_HZ);
        scp.tracks[3] = Some(scenario_capture());
        let mut file = Cursor::new(Vec::new());
        scp.write(&mut file).unwrap();
        file.into_inner()
    };
    assert_eq!(compute_slice_hash(&build()), compute_slice_hash(&build()));
}

#[test]
fn img_length_is_total_sectors_times_size() {
    init();
    let geometry = DiskGeometry::pc_1440k();
    let mut table = SectorTable::new(geometry);
    for lin in 0..geometry.total_sectors() {
        table.with_sector_mut(lin, |s| {
            s.status = SectorStatus::Good;
            s.payload = Some(index_payload(512));
        });
    }

    let mut out = Cursor::new(Vec::new());
    RawImage::save_image(&table, None, &mut out).unwrap();
    assert_eq!(out.into_inner().len(), geometry.total_sectors() * geometry.sector_size());
}

/// Codec round trip through a whole table: every encoded track decodes back to an identical
/// set of Good sectors.
#[test]
fn encode_decode_round_trips_full_table() {
    init();
    let geometry = DiskGeometry::pc_720k();

    let mut reference = SectorTable::new(geometry);
    for lin in 0..geometry.total_sectors() {
        reference.with_sector_mut(lin, |s| {
            s.status = SectorStatus::Good;
            s.payload = Some((0..512).map(|i| ((i + lin) % 256) as u8).collect());
        });
    }

    let mut decoded = SectorTable::new(geometry);
    for c in 0..geometry.cylinders() {
        for h in 0..geometry.heads() {
            let ch = DiskCh::new(c, h);
            let raw = track_raw(&geometry, ch, |chs| {
                let lin = reference.linear(chs).unwrap();
                reference.sector(lin).unwrap().payload.clone().unwrap()
            });
            let stream = BitStream::from_bitvec(raw);
            decode_stream_into_table(&mut decoded, &stream, geometry.encoding(), geometry, ch);
        }
    }

    assert_eq!(decoded.good_count(), geometry.total_sectors());
    for (a, b) in decoded.iter().zip(reference.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.status, SectorStatus::Good);
        assert_eq!(a.payload, b.payload);
    }

    // And the serialized images are byte-identical.
    let mut img_a = Cursor::new(Vec::new());
    let mut img_b = Cursor::new(Vec::new());
    RawImage::save_image(&decoded, Some(FillPolicy::Zero), &mut img_a).unwrap();
    RawImage::save_image(&reference, Some(FillPolicy::Zero), &mut img_b).unwrap();
    assert_eq!(img_a.into_inner(), img_b.into_inner());
}

/// Amiga tables survive the same round trip, including the 22-sector HD chain.
#[test]
fn amiga_hd_table_round_trips() {
    init();
    let geometry = DiskGeometry::amiga_1760k();

    let mut decoded = SectorTable::new(geometry);
    for c in 0..2 {
        for h in 0..geometry.heads() {
            let ch = DiskCh::new(c, h);
            let raw = track_raw(&geometry, ch, |chs| {
                (0..512).map(|i| (i as u8).wrapping_add(chs.s())).collect()
            });
            let stream = BitStream::from_bitvec(raw);
            let merged = decode_stream_into_table(&mut decoded, &stream, geometry.encoding(), geometry, ch);
            assert_eq!(merged, 22);
        }
    }
}
