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

    src/types/enums.rs

    Closed tagged unions for encodings, data rates, sector status, scan and
    recovery modes.
*/

use std::fmt::{self, Display, Formatter};
use std::ops::RangeInclusive;

use strum::{EnumIter, IntoStaticStr};

/// The base bitcell encoding method of the data on a track.
/// Note that some disks may mix encodings between tracks.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum TrackEncoding {
    #[doc = "Frequency Modulation encoding. Used by older 8&quot; diskettes and the BBC Micro DFS."]
    Fm,
    #[default]
    #[doc = "Modified Frequency Modulation encoding. Used by almost all 5.25&quot; and 3.5&quot; diskettes."]
    Mfm,
    #[doc = "Amiga trackdisk MFM. Standard MFM cells with odd/even bit-split sector layout."]
    AmigaMfm,
    #[doc = "Group Code Recording encoding. Used by Apple and Macintosh diskettes."]
    Gcr,
}

impl Display for TrackEncoding {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TrackEncoding::Fm => write!(f, "FM"),
            TrackEncoding::Mfm => write!(f, "MFM"),
            TrackEncoding::AmigaMfm => write!(f, "Amiga MFM"),
            TrackEncoding::Gcr => write!(f, "GCR"),
        }
    }
}

impl TrackEncoding {
    /// The valid flux-interval length in cells for this encoding. The PLL clamps its cell count
    /// estimate to this range and counts violations toward decode abort.
    pub fn cell_range(&self) -> RangeInclusive<u32> {
        match self {
            TrackEncoding::Mfm | TrackEncoding::AmigaMfm => 2..=4,
            TrackEncoding::Fm => 1..=2,
            TrackEncoding::Gcr => 1..=8,
        }
    }

    /// The PLL cell clock period for a given data bit-cell time. MFM and FM interleave a clock
    /// bit with every data bit, so the cell clock runs at twice the data rate. GCR records data
    /// bits directly.
    pub fn cell_period(&self, bit_cell_secs: f64) -> f64 {
        match self {
            TrackEncoding::Mfm | TrackEncoding::AmigaMfm | TrackEncoding::Fm => bit_cell_secs / 2.0,
            TrackEncoding::Gcr => bit_cell_secs,
        }
    }
}

/// The data rate of a track in kbps.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataRate {
    Rate125Kbps,
    #[default]
    Rate250Kbps,
    Rate500Kbps,
    Rate1000Kbps,
}

impl From<DataRate> for u32 {
    fn from(rate: DataRate) -> Self {
        match rate {
            DataRate::Rate125Kbps => 125_000,
            DataRate::Rate250Kbps => 250_000,
            DataRate::Rate500Kbps => 500_000,
            DataRate::Rate1000Kbps => 1_000_000,
        }
    }
}

impl TryFrom<u32> for DataRate {
    type Error = ();

    fn try_from(kbps: u32) -> Result<Self, Self::Error> {
        match kbps {
            125 => Ok(DataRate::Rate125Kbps),
            250 => Ok(DataRate::Rate250Kbps),
            500 => Ok(DataRate::Rate500Kbps),
            1000 => Ok(DataRate::Rate1000Kbps),
            _ => Err(()),
        }
    }
}

impl Display for DataRate {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}kbps", u32::from(*self) / 1000)
    }
}

impl DataRate {
    /// The nominal data bit-cell time in seconds. An MFM data bit occupies two raw cells, so a
    /// 500kbps HD track has a 2µs bit cell over 1µs raw cells.
    pub fn bit_cell_secs(&self) -> f64 {
        1.0 / u32::from(*self) as f64
    }
}

/// Nominal rotation rate of the drive spindle.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DiskRpm {
    #[default]
    Rpm300,
    Rpm360,
}

impl From<DiskRpm> for f64 {
    fn from(rpm: DiskRpm) -> Self {
        match rpm {
            DiskRpm::Rpm300 => 300.0,
            DiskRpm::Rpm360 => 360.0,
        }
    }
}

impl Display for DiskRpm {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:.0} RPM", f64::from(*self))
    }
}

impl DiskRpm {
    /// Time for one full revolution in seconds.
    pub fn revolution_secs(&self) -> f64 {
        60.0 / f64::from(*self)
    }
}

/// The status of a single sector in the sector table. A sector is born `Unread` and is only
/// mutated by the scan orchestrator and the recovery controller.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum SectorStatus {
    #[default]
    Unread,
    Good,
    Weak,
    Bad,
    Missing,
    NoAddress,
    HeaderCrc,
    Deleted,
    Recovered,
}

impl Display for SectorStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s: &'static str = self.into();
        write!(f, "{}", s)
    }
}

impl SectorStatus {
    /// Rank statuses from worst to best for the scan merge rule: a decode replaces the stored
    /// sector when the stored status is worse (lower rank) than the new one.
    pub fn rank(&self) -> u8 {
        match self {
            SectorStatus::Unread => 0,
            SectorStatus::Missing => 1,
            SectorStatus::NoAddress => 2,
            SectorStatus::HeaderCrc => 3,
            SectorStatus::Bad => 4,
            SectorStatus::Deleted => 5,
            SectorStatus::Weak => 6,
            SectorStatus::Recovered => 7,
            SectorStatus::Good => 8,
        }
    }

    /// True if this status carries a data-CRC-valid payload.
    pub fn is_readable(&self) -> bool {
        matches!(self, SectorStatus::Good | SectorStatus::Recovered | SectorStatus::Deleted)
    }

    /// True if the sector still needs recovery attention.
    pub fn is_bad(&self) -> bool {
        matches!(
            self,
            SectorStatus::Bad | SectorStatus::Missing | SectorStatus::NoAddress | SectorStatus::HeaderCrc
        )
    }
}

/// Which strategy produced a recovered sector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum RecoveryMethod {
    Direct,
    MultiCaptureVote,
    PllTuning,
    BitSlip,
    FormatRefresh,
}

impl Display for RecoveryMethod {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s: &'static str = self.into();
        write!(f, "{}", s)
    }
}

/// Full-disk scan modes. Revolutions and coverage per mode are fixed by the orchestrator.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum ScanMode {
    #[doc = "Sample five cylinders across the disk, one revolution each."]
    Quick,
    #[default]
    #[doc = "All tracks, two revolutions."]
    Standard,
    #[doc = "All tracks, three revolutions; merge prefers the better of two decodes."]
    Thorough,
    #[doc = "All tracks, five revolutions; flux is retained for every track."]
    Forensic,
}

impl ScanMode {
    pub fn revolutions(&self) -> u8 {
        match self {
            ScanMode::Quick => 1,
            ScanMode::Standard => 2,
            ScanMode::Thorough => 3,
            ScanMode::Forensic => 5,
        }
    }

    pub fn retains_flux(&self) -> bool {
        matches!(self, ScanMode::Forensic)
    }
}

/// Aggressiveness of a recovery job. The level gates which strategies are attempted.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum RecoveryLevel {
    #[default]
    Standard,
    Aggressive,
    Forensic,
}

/// Letter grade assigned to a track from its analyzer quality score.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrackGrade {
    A,
    B,
    C,
    D,
    F,
}

impl Display for TrackGrade {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TrackGrade::A => write!(f, "A"),
            TrackGrade::B => write!(f, "B"),
            TrackGrade::C => write!(f, "C"),
            TrackGrade::D => write!(f, "D"),
            TrackGrade::F => write!(f, "F"),
        }
    }
}

impl TrackGrade {
    pub fn from_score(score: f64) -> TrackGrade {
        match score {
            s if s >= 90.0 => TrackGrade::A,
            s if s >= 75.0 => TrackGrade::B,
            s if s >= 60.0 => TrackGrade::C,
            s if s >= 40.0 => TrackGrade::D,
            _ => TrackGrade::F,
        }
    }
}

/// Error categories enumerated by disk reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum ErrorCategory {
    Crc,
    Missing,
    Weak,
    NoAddress,
    HeaderCrc,
    Deleted,
}

impl ErrorCategory {
    /// Categorize a sector status, if it represents an error condition.
    pub fn from_status(status: SectorStatus) -> Option<ErrorCategory> {
        match status {
            SectorStatus::Bad => Some(ErrorCategory::Crc),
            SectorStatus::Missing | SectorStatus::Unread => Some(ErrorCategory::Missing),
            SectorStatus::Weak => Some(ErrorCategory::Weak),
            SectorStatus::NoAddress => Some(ErrorCategory::NoAddress),
            SectorStatus::HeaderCrc => Some(ErrorCategory::HeaderCrc),
            SectorStatus::Deleted => Some(ErrorCategory::Deleted),
            SectorStatus::Good | SectorStatus::Recovered => None,
        }
    }
}
