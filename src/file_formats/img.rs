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

    src/file_formats/img.rs

    Raw sector images (IMG/IMA and kin): sectors concatenated in linear
    address order with no header. Geometry is inferred from the file length
    against the table of known sizes; unknown sizes are an error, never a
    guess.
*/

use crate::{
    io::{Read, ReadSeek, ReadWriteSeek, Write},
    sector_map::SectorTable,
    types::{enums::SectorStatus, geometry::DiskGeometry},
    util::get_length,
    ImageError,
};

/// What to write for sectors that carry no payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FillPolicy {
    Zero,
    /// The classic DOS format filler.
    E5,
    Custom(u8),
}

impl FillPolicy {
    pub fn byte(&self) -> u8 {
        match self {
            FillPolicy::Zero => 0x00,
            FillPolicy::E5 => 0xE5,
            FillPolicy::Custom(b) => *b,
        }
    }
}

pub struct RawImage;

impl RawImage {
    /// Load a raw sector image into a fully-Good sector table, inferring the geometry from the
    /// file length.
    pub fn load_image<RS: ReadSeek>(image: &mut RS) -> Result<SectorTable, ImageError> {
        let length = get_length(image)? as usize;
        let geometry = DiskGeometry::from_image_size(length)?;
        log::debug!("RawImage::load_image(): {} bytes -> {}", length, geometry);

        let mut table = SectorTable::new(geometry);
        let mut buf = vec![0u8; geometry.sector_size()];
        for lin in 0..geometry.total_sectors() {
            image.read_exact(&mut buf)?;
            table.with_sector_mut(lin, |s| {
                s.status = SectorStatus::Good;
                s.payload = Some(buf.clone());
                s.header_crc_ok = Some(true);
                s.data_crc_ok = Some(true);
                s.quality = 1.0;
            });
        }
        Ok(table)
    }

    /// Serialize a sector table in linear order. Sectors without a payload take the fill
    /// policy's byte; with no policy the write fails with `MissingSectors`.
    pub fn save_image<RWS: ReadWriteSeek>(
        table: &SectorTable,
        fill: Option<FillPolicy>,
        output: &mut RWS,
    ) -> Result<(), ImageError> {
        let sector_size = table.geometry().sector_size();

        for sector in table.iter() {
            match (&sector.payload, fill) {
                (Some(payload), _) if payload.len() == sector_size => {
                    output.write_all(payload)?;
                }
                (Some(payload), fill) => {
                    // Short payloads are padded out with the fill byte (or zero).
                    let fill_byte = fill.map(|f| f.byte()).unwrap_or(0);
                    output.write_all(payload)?;
                    output.write_all(&vec![fill_byte; sector_size - payload.len().min(sector_size)])?;
                }
                (None, Some(fill)) => {
                    output.write_all(&vec![fill.byte(); sector_size])?;
                }
                (None, None) => {
                    log::error!(
                        "RawImage::save_image(): sector {} has no payload and no fill policy",
                        sector.id
                    );
                    return Err(ImageError::MissingSectors);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io::Cursor, types::chs::DiskChs};

    fn good_table(geometry: DiskGeometry) -> SectorTable {
        let mut table = SectorTable::new(geometry);
        for lin in 0..geometry.total_sectors() {
            table.with_sector_mut(lin, |s| {
                s.status = SectorStatus::Good;
                s.payload = Some(vec![(lin % 256) as u8; geometry.sector_size()]);
            });
        }
        table
    }

    #[test]
    fn image_size_law() {
        let table = good_table(DiskGeometry::pc_1440k());
        let mut out = Cursor::new(Vec::new());
        RawImage::save_image(&table, None, &mut out).unwrap();
        assert_eq!(out.into_inner().len(), 2880 * 512);
    }

    #[test]
    fn round_trip_is_byte_exact() {
        let table = good_table(DiskGeometry::pc_360k());
        let mut out = Cursor::new(Vec::new());
        RawImage::save_image(&table, None, &mut out).unwrap();

        let mut input = Cursor::new(out.into_inner());
        let loaded = RawImage::load_image(&mut input).unwrap();

        assert_eq!(loaded.geometry(), table.geometry());
        for (a, b) in loaded.iter().zip(table.iter()) {
            assert_eq!(a.payload, b.payload);
            assert_eq!(a.status, SectorStatus::Good);
        }
    }

    #[test]
    fn missing_sector_without_fill_fails() {
        let geometry = DiskGeometry::pc_360k();
        let mut table = good_table(geometry);
        let lin = table.linear(DiskChs::new(20, 0, 3)).unwrap();
        table.with_sector_mut(lin, |s| {
            s.status = SectorStatus::Bad;
            s.payload = None;
        });

        let mut out = Cursor::new(Vec::new());
        assert!(matches!(
            RawImage::save_image(&table, None, &mut out),
            Err(ImageError::MissingSectors)
        ));

        // With a fill policy the hole is papered over.
        let mut out = Cursor::new(Vec::new());
        RawImage::save_image(&table, Some(FillPolicy::E5), &mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes.len(), geometry.total_bytes());
        assert_eq!(bytes[lin * 512], 0xE5);
    }

    #[test]
    fn unknown_length_is_rejected() {
        let mut input = Cursor::new(vec![0u8; 1000]);
        assert!(matches!(
            RawImage::load_image(&mut input),
            Err(ImageError::UnknownGeometry)
        ));
    }
}
