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

use std::fs::File;

use anyhow::{anyhow, Context, Result};
use fluxrescue::{
    codec::{codec_for, TrackSectorData},
    file_formats::{hfe::HfeImage, scp::ScpImage, ImageFormat},
    flux::synth,
    types::chs::{bytes_to_n, DiskCh, DiskChs},
    DiskGeometry,
    SectorTable,
};

use crate::args::EncodeParams;

pub fn run(params: &EncodeParams) -> Result<i32> {
    let mut input =
        File::open(&params.in_file).with_context(|| format!("opening {}", params.in_file.display()))?;
    let table = fluxrescue::file_formats::img::RawImage::load_image(&mut input)?;
    let geometry = *table.geometry();

    let format = ImageFormat::from_extension(&params.out)
        .ok_or_else(|| anyhow!("cannot infer output format from {}", params.out.display()))?;

    match format {
        ImageFormat::Scp => encode_scp(&table, geometry, params),
        ImageFormat::Hfe => encode_hfe(&table, geometry, params),
        ImageFormat::Img => Err(anyhow!("encode produces flux or bitstream images, not IMG")),
    }
}

fn track_sectors(table: &SectorTable, geometry: &DiskGeometry, ch: DiskCh) -> Result<Vec<TrackSectorData>> {
    (1..=geometry.sectors_per_track())
        .map(|s| {
            let chs = DiskChs::new(ch.c(), ch.h(), s);
            let lin = table.linear(chs).expect("in-geometry address");
            let sector = table.sector(lin).expect("dense table");
            let data = sector
                .payload
                .clone()
                .ok_or_else(|| anyhow!("sector {} has no payload", chs))?;
            Ok(TrackSectorData {
                chs,
                size_code: bytes_to_n(geometry.sector_size()),
                data,
                deleted: false,
            })
        })
        .collect()
}

fn encode_scp(table: &SectorTable, geometry: DiskGeometry, params: &EncodeParams) -> Result<i32> {
    let codec = codec_for(geometry.encoding());
    let cell_secs = geometry.encoding().cell_period(geometry.bit_cell_secs());
    let mut scp = ScpImage::new(fluxrescue::DEFAULT_SAMPLE_HZ);

    for c in 0..geometry.cylinders() {
        for h in 0..geometry.heads() {
            let ch = DiskCh::new(c, h);
            let sectors = track_sectors(table, &geometry, ch)?;
            let raw = codec
                .encode_track(&sectors, &geometry, ch)
                .map_err(|e| anyhow!("encoding {}: {}", ch, e))?;
            let capture = synth::capture_from_bits(
                &raw,
                cell_secs,
                fluxrescue::DEFAULT_SAMPLE_HZ,
                params.revolutions.clamp(1, 5) as usize,
            )?;
            scp.tracks[ch.track_index(geometry.heads())] = Some(capture);
        }
    }

    let mut out = File::create(&params.out).with_context(|| format!("creating {}", params.out.display()))?;
    scp.write(&mut out)?;
    println!("encoded {} tracks to {}", geometry.total_tracks(), params.out.display());
    Ok(0)
}

fn encode_hfe(table: &SectorTable, geometry: DiskGeometry, params: &EncodeParams) -> Result<i32> {
    let codec = codec_for(geometry.encoding());
    let bit_rate = (u32::from(geometry.data_rate()) / 1000) as u16;
    let rpm = f64::from(geometry.rpm()) as u16;
    let mut hfe = HfeImage::new(geometry.encoding(), bit_rate, rpm, geometry.heads());

    for c in 0..geometry.cylinders() {
        let mut sides = [None, None];
        for h in 0..geometry.heads() {
            let ch = DiskCh::new(c, h);
            let sectors = track_sectors(table, &geometry, ch)?;
            let raw = codec
                .encode_track(&sectors, &geometry, ch)
                .map_err(|e| anyhow!("encoding {}: {}", ch, e))?;
            sides[h as usize] = Some(raw);
        }
        hfe.tracks.push(sides);
    }

    let mut out = File::create(&params.out).with_context(|| format!("creating {}", params.out.display()))?;
    hfe.write(&mut out)?;
    println!("encoded {} cylinders to {}", geometry.cylinders(), params.out.display());
    Ok(0)
}
