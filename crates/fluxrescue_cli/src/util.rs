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

use std::{fs::File, path::Path};

use anyhow::{anyhow, Context, Result};
use fluxrescue::{
    controller::MemoryController,
    file_formats::scp::ScpImage,
    DiskGeometry,
};

pub fn resolve_geometry(preset: &str) -> Result<DiskGeometry> {
    DiskGeometry::from_preset(preset).ok_or_else(|| anyhow!("unknown geometry preset '{}'", preset))
}

/// Build the headless drive: a memory controller loaded from an SCP capture file. Each present
/// track contributes its first revolution as the medium's content.
pub fn drive_from_scp(path: &Path, geometry: DiskGeometry) -> Result<MemoryController> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let scp = ScpImage::read(&mut file, fluxrescue::DEFAULT_SAMPLE_HZ)
        .with_context(|| format!("parsing {}", path.display()))?;

    let mut drive = MemoryController::blank(geometry);
    for (track_number, slot) in scp.tracks.iter().enumerate() {
        if track_number >= geometry.total_tracks() {
            break;
        }
        if let Some(capture) = slot {
            let rev = capture
                .revolution(0)
                .map_err(|e| anyhow!("track {}: {}", track_number, e))?;
            drive.set_track_intervals(track_number, Some(rev.intervals().to_vec()));
        }
    }
    Ok(drive)
}

/// Exit code mapping shared by scan and recover: 0 on success, 2 on partial results, 3 on
/// transport failure.
pub fn exit_code(outcome: &fluxrescue::JobOutcome) -> i32 {
    use fluxrescue::JobStatus;
    match outcome.status {
        JobStatus::Ok => 0,
        JobStatus::Partial => 2,
        JobStatus::Failed => 3,
    }
}
