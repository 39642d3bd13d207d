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

//! # fluxrescue
//!
//! fluxrescue is a Rust library for reading, analyzing and recovering floppy disk media at the
//! flux (raw magnetic transition) level, via a flux-capable USB controller.
//!
//! The library ingests raw flux transition streams and produces decoded logical sectors with
//! quality metrics, encodes sector images back into flux streams suitable for writing, applies
//! iterative multi-strategy recovery to extract data from damaged media, and persists flux
//! captures and sector images to standard on-disk formats (IMG, SCP, HFE).
//!
//! The hardware transport is abstracted behind the [`controller::FloppyController`] trait; the
//! library ships an in-memory implementation backed by synthesized or captured flux which serves
//! as both the test double and the headless driver for the CLI.
//!
//! A full-disk read is performed by [`scan::ScanOrchestrator`]; damaged media is worked over by
//! [`recovery::RecoveryController`], which re-invokes the decode pipeline with tuned parameters
//! until the bad-sector count converges.

pub mod bitstream;
pub mod codec;
pub mod controller;
pub mod events;
pub mod file_formats;
pub mod flux;
mod io;
pub mod quality;
pub mod recovery;
pub mod scan;
pub mod sector_map;
pub mod types;
pub mod util;

use std::fmt::{Display, Formatter};

use thiserror::Error;

pub use crate::{
    sector_map::{Sector, SectorTable},
    types::{
        chs::{DiskCh, DiskChs},
        enums::{DataRate, DiskRpm, RecoveryMethod, ScanMode, SectorStatus, TrackEncoding},
        geometry::DiskGeometry,
    },
};

pub const MAXIMUM_SECTOR_SIZE: usize = 8192;
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// Default flux sampling frequency: 72 MHz, ~13.9ns per tick.
pub const DEFAULT_SAMPLE_HZ: u32 = 72_000_000;

/// The most revolutions a single capture may hold.
pub const MAXIMUM_REVOLUTIONS: usize = 10;

#[derive(Debug, Error)]
pub enum FluxError {
    #[error("The flux capture is invalid: {0}")]
    InvalidFlux(String),
    #[error("The requested revolution is out of range")]
    OutOfRange,
    #[error("The PLL could not maintain lock on the flux stream")]
    DecodeAbort,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("No address marks were found in the revolution")]
    NoAddressMarks,
    #[error("The requested operation is not supported for this encoding")]
    UnsupportedEncoding,
    #[error("An invalid function parameter was supplied")]
    ParameterError,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("The drive could not confirm the requested track position")]
    SeekError,
    #[error("A hardware operation exceeded its time bound")]
    TransportTimeout,
    #[error("The controller transport was lost")]
    TransportLost,
    #[error("The medium is write protected")]
    WriteProtected,
    #[error("The write operation failed")]
    WriteError,
    #[error("The spindle motor did not reach steady state")]
    MotorTimeout,
    #[error("The controller handle is not open")]
    NotOpen,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("An IO error occurred reading or writing the image: {0}")]
    IoError(String),
    #[error("Unknown image file format")]
    UnknownFormat,
    #[error("The image format parser encountered an error")]
    FormatParseError,
    #[error("The image format parser determined the image was corrupt")]
    ImageCorruptError,
    #[error("The image length does not match any known disk geometry")]
    UnknownGeometry,
    #[error("The sector table contains unread sectors and no fill policy was provided")]
    MissingSectors,
    #[error("An invalid function parameter was supplied")]
    ParameterError,
}

impl From<io::Error> for ImageError {
    fn from(err: io::Error) -> Self {
        ImageError::IoError(err.to_string())
    }
}

impl From<binrw::Error> for ImageError {
    fn from(err: binrw::Error) -> Self {
        ImageError::IoError(err.to_string())
    }
}

/// Errors surfaced by the scan and recovery orchestrators. Data-level faults never appear here;
/// they become per-sector status in the [`SectorTable`].
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Controller fault: {0}")]
    Controller(#[from] ControllerError),
    #[error("Flux fault: {0}")]
    Flux(#[from] FluxError),
    #[error("Codec fault: {0}")]
    Codec(#[from] CodecError),
    #[error("An invalid function parameter was supplied")]
    ParameterError,
}

/// Overall disposition of a scan or recovery job. Jobs always return a structured result; there
/// are no silent drops.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum JobStatus {
    #[default]
    Ok,
    Partial,
    Failed,
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Ok => write!(f, "ok"),
            JobStatus::Partial => write!(f, "partial"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct JobStatistics {
    pub tracks_visited: u32,
    pub sectors_good: usize,
    pub sectors_bad: usize,
    pub sectors_weak: usize,
    pub passes: u32,
}

#[derive(Clone, Debug, Default)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub reason: Option<String>,
    pub statistics: JobStatistics,
}

impl JobOutcome {
    pub fn ok(statistics: JobStatistics) -> Self {
        JobOutcome {
            status: JobStatus::Ok,
            reason: None,
            statistics,
        }
    }

    pub fn partial(reason: impl Into<String>, statistics: JobStatistics) -> Self {
        JobOutcome {
            status: JobStatus::Partial,
            reason: Some(reason.into()),
            statistics,
        }
    }

    pub fn failed(reason: impl Into<String>, statistics: JobStatistics) -> Self {
        JobOutcome {
            status: JobStatus::Failed,
            reason: Some(reason.into()),
            statistics,
        }
    }
}
