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

    src/types/geometry.rs

    Validated disk geometry, the standard format presets, and raw-image size
    inference.
*/

use std::fmt::{self, Display, Formatter};

use crate::{
    types::enums::{DataRate, DiskRpm, TrackEncoding},
    ImageError,
    MAXIMUM_SECTOR_SIZE,
};

/// Physical geometry of a disk, immutable for the lifetime of a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DiskGeometry {
    cylinders: u16,
    heads: u8,
    sectors_per_track: u8,
    sector_size: usize,
    rpm: DiskRpm,
    data_rate: DataRate,
    encoding: TrackEncoding,
}

impl Display for DiskGeometry {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{}c {}h {}s {}b {} {} {}",
            self.cylinders, self.heads, self.sectors_per_track, self.sector_size, self.rpm, self.data_rate, self.encoding
        )
    }
}

impl DiskGeometry {
    pub fn new(
        cylinders: u16,
        heads: u8,
        sectors_per_track: u8,
        sector_size: usize,
        rpm: DiskRpm,
        data_rate: DataRate,
        encoding: TrackEncoding,
    ) -> Result<DiskGeometry, ImageError> {
        if cylinders == 0 || cylinders > 255 {
            log::error!("DiskGeometry::new(): Invalid cylinder count: {}", cylinders);
            return Err(ImageError::ParameterError);
        }
        if heads == 0 || heads > 2 {
            log::error!("DiskGeometry::new(): Invalid head count: {}", heads);
            return Err(ImageError::ParameterError);
        }
        if sectors_per_track == 0 || sectors_per_track > 36 {
            log::error!("DiskGeometry::new(): Invalid sectors per track: {}", sectors_per_track);
            return Err(ImageError::ParameterError);
        }
        if !sector_size.is_power_of_two() || !(128..=MAXIMUM_SECTOR_SIZE).contains(&sector_size) {
            log::error!("DiskGeometry::new(): Invalid sector size: {}", sector_size);
            return Err(ImageError::ParameterError);
        }

        Ok(DiskGeometry {
            cylinders,
            heads,
            sectors_per_track,
            sector_size,
            rpm,
            data_rate,
            encoding,
        })
    }

    pub fn cylinders(&self) -> u16 {
        self.cylinders
    }
    pub fn heads(&self) -> u8 {
        self.heads
    }
    pub fn sectors_per_track(&self) -> u8 {
        self.sectors_per_track
    }
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }
    pub fn rpm(&self) -> DiskRpm {
        self.rpm
    }
    pub fn data_rate(&self) -> DataRate {
        self.data_rate
    }
    pub fn encoding(&self) -> TrackEncoding {
        self.encoding
    }

    pub fn total_sectors(&self) -> usize {
        self.cylinders as usize * self.heads as usize * self.sectors_per_track as usize
    }

    pub fn total_tracks(&self) -> usize {
        self.cylinders as usize * self.heads as usize
    }

    pub fn total_bytes(&self) -> usize {
        self.total_sectors() * self.sector_size
    }

    /// The nominal data bit-cell time in seconds for this geometry's data rate.
    pub fn bit_cell_secs(&self) -> f64 {
        self.data_rate.bit_cell_secs()
    }

    /// 160K 5.25" single sided DD
    pub fn pc_160k() -> DiskGeometry {
        DiskGeometry {
            cylinders: 40,
            heads: 1,
            sectors_per_track: 8,
            sector_size: 512,
            rpm: DiskRpm::Rpm300,
            data_rate: DataRate::Rate250Kbps,
            encoding: TrackEncoding::Mfm,
        }
    }

    /// 360K 5.25" double sided DD
    pub fn pc_360k() -> DiskGeometry {
        DiskGeometry {
            cylinders: 40,
            heads: 2,
            sectors_per_track: 9,
            sector_size: 512,
            rpm: DiskRpm::Rpm300,
            data_rate: DataRate::Rate250Kbps,
            encoding: TrackEncoding::Mfm,
        }
    }

    /// 720K 3.5" double sided DD
    pub fn pc_720k() -> DiskGeometry {
        DiskGeometry {
            cylinders: 80,
            heads: 2,
            sectors_per_track: 9,
            sector_size: 512,
            rpm: DiskRpm::Rpm300,
            data_rate: DataRate::Rate250Kbps,
            encoding: TrackEncoding::Mfm,
        }
    }

    /// 1.2M 5.25" double sided HD
    pub fn pc_1200k() -> DiskGeometry {
        DiskGeometry {
            cylinders: 80,
            heads: 2,
            sectors_per_track: 15,
            sector_size: 512,
            rpm: DiskRpm::Rpm360,
            data_rate: DataRate::Rate500Kbps,
            encoding: TrackEncoding::Mfm,
        }
    }

    /// 1.44M 3.5" double sided HD
    pub fn pc_1440k() -> DiskGeometry {
        DiskGeometry {
            cylinders: 80,
            heads: 2,
            sectors_per_track: 18,
            sector_size: 512,
            rpm: DiskRpm::Rpm300,
            data_rate: DataRate::Rate500Kbps,
            encoding: TrackEncoding::Mfm,
        }
    }

    /// 880K 3.5" Amiga trackdisk DD
    pub fn amiga_880k() -> DiskGeometry {
        DiskGeometry {
            cylinders: 80,
            heads: 2,
            sectors_per_track: 11,
            sector_size: 512,
            rpm: DiskRpm::Rpm300,
            data_rate: DataRate::Rate250Kbps,
            encoding: TrackEncoding::AmigaMfm,
        }
    }

    /// 1.76M 3.5" Amiga trackdisk HD. 22 sectors in one continuous chain per track.
    pub fn amiga_1760k() -> DiskGeometry {
        DiskGeometry {
            cylinders: 80,
            heads: 2,
            sectors_per_track: 22,
            sector_size: 512,
            rpm: DiskRpm::Rpm300,
            data_rate: DataRate::Rate500Kbps,
            encoding: TrackEncoding::AmigaMfm,
        }
    }

    /// 200K BBC Micro DFS, FM single sided
    pub fn bbc_200k() -> DiskGeometry {
        DiskGeometry {
            cylinders: 80,
            heads: 1,
            sectors_per_track: 10,
            sector_size: 256,
            rpm: DiskRpm::Rpm300,
            data_rate: DataRate::Rate125Kbps,
            encoding: TrackEncoding::Fm,
        }
    }

    /// Resolve a named geometry preset, as accepted by the CLI.
    pub fn from_preset(name: &str) -> Option<DiskGeometry> {
        match name {
            "pc160k" | "160k" => Some(DiskGeometry::pc_160k()),
            "pc360k" | "360k" => Some(DiskGeometry::pc_360k()),
            "pc720k" | "720k" => Some(DiskGeometry::pc_720k()),
            "pc1200k" | "1200k" | "1.2m" => Some(DiskGeometry::pc_1200k()),
            "pc1440k" | "1440k" | "1.44m" => Some(DiskGeometry::pc_1440k()),
            "amiga880k" | "880k" => Some(DiskGeometry::amiga_880k()),
            "amiga1760k" | "1760k" => Some(DiskGeometry::amiga_1760k()),
            "bbc200k" | "200k" => Some(DiskGeometry::bbc_200k()),
            _ => None,
        }
    }

    /// Infer a geometry from a raw sector image length. Unknown sizes are an error; we never
    /// guess a default geometry.
    pub fn from_image_size(size: usize) -> Result<DiskGeometry, ImageError> {
        match size {
            163_840 => Ok(DiskGeometry::pc_160k()),
            368_640 => Ok(DiskGeometry::pc_360k()),
            737_280 => Ok(DiskGeometry::pc_720k()),
            1_228_800 => Ok(DiskGeometry::pc_1200k()),
            1_474_560 => Ok(DiskGeometry::pc_1440k()),
            901_120 => Ok(DiskGeometry::amiga_880k()),
            1_802_240 => Ok(DiskGeometry::amiga_1760k()),
            204_800 => Ok(DiskGeometry::bbc_200k()),
            _ => {
                log::error!("DiskGeometry::from_image_size(): No known geometry of {} bytes", size);
                Err(ImageError::UnknownGeometry)
            }
        }
    }
}
