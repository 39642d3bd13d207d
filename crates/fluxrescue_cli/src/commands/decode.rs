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
    bitstream::BitStream,
    file_formats::{
        hfe::HfeImage,
        img::{FillPolicy, RawImage},
        scp::ScpImage,
        ImageFormat,
    },
    scan::{decode_into_table, decode_stream_into_table},
    types::chs::DiskCh,
    SectorTable,
};

use crate::{args::DecodeParams, util};

pub fn run(params: &DecodeParams) -> Result<i32> {
    let geometry = util::resolve_geometry(&params.geometry)?;
    let mut input =
        File::open(&params.in_file).with_context(|| format!("opening {}", params.in_file.display()))?;

    let format = ImageFormat::from_extension(&params.in_file)
        .unwrap_or_else(|| ImageFormat::detect(&mut input));

    let mut table = SectorTable::new(geometry);
    let encoding = params.encoding.map(|e| e.0);

    match format {
        ImageFormat::Scp => {
            let scp = ScpImage::read(&mut input, fluxrescue::DEFAULT_SAMPLE_HZ)?;
            let encoding = encoding.unwrap_or_else(|| geometry.encoding());
            for (track_number, slot) in scp.tracks.iter().enumerate() {
                if track_number >= geometry.total_tracks() {
                    break;
                }
                let Some(capture) = slot else {
                    continue;
                };
                let ch = track_ch(track_number, geometry.heads());
                decode_into_table(&mut table, capture, encoding, geometry, ch, 0, None);
            }
        }
        ImageFormat::Hfe => {
            let hfe = HfeImage::read(&mut input)?;
            let encoding = encoding.unwrap_or(hfe.encoding);
            for (c, sides) in hfe.tracks.iter().enumerate() {
                if c >= geometry.cylinders() as usize {
                    break;
                }
                for h in 0..geometry.heads() {
                    let Some(bits) = &sides[h as usize] else {
                        continue;
                    };
                    let ch = DiskCh::new(c as u16, h);
                    let stream = BitStream::from_bitvec(bits.clone());
                    decode_stream_into_table(&mut table, &stream, encoding, geometry, ch);
                }
            }
        }
        ImageFormat::Img => {
            return Err(anyhow!("decode consumes flux or bitstream images, not IMG"));
        }
    }

    println!(
        "decode: {} good, {} bad, {} missing",
        table.good_count(),
        table.bad_count(),
        table.count(fluxrescue::SectorStatus::Missing)
    );

    let mut out = File::create(&params.out).with_context(|| format!("creating {}", params.out.display()))?;
    RawImage::save_image(&table, Some(FillPolicy::E5), &mut out)?;

    Ok(if table.bad_count() == 0 && table.count(fluxrescue::SectorStatus::Unread) == 0 {
        0
    }
    else {
        2
    })
}

fn track_ch(track_number: usize, heads: u8) -> DiskCh {
    DiskCh::new(
        (track_number / heads as usize) as u16,
        (track_number % heads as usize) as u8,
    )
}
