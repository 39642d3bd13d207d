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

    tests/common/mod.rs

    Common support routines for tests: synthetic disks, flux corruption
    helpers and the read-schedule controller used by the convergence
    scenarios.
*/

// Not every test binary exercises every helper.
#![allow(dead_code)]

use bit_vec::BitVec;
use hex::encode;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

use fluxrescue::{
    bitstream::BitStream,
    codec::{codec_for, TrackSectorData},
    controller::{FloppyController, MemoryController},
    flux::{capture::FluxCapture, synth},
    types::chs::{bytes_to_n, DiskCh, DiskChs},
    ControllerError,
    DiskGeometry,
    DEFAULT_SAMPLE_HZ,
};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[allow(dead_code)]
pub fn compute_slice_hash(slice: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(slice);
    let result = hasher.finalize();

    encode(result)
}

/// The standard test payload: byte i of every sector is `i mod 256`.
pub fn index_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// A healthy, perfectly-timed disk of the given geometry.
#[allow(dead_code)]
pub fn healthy_disk(geometry: DiskGeometry) -> MemoryController {
    MemoryController::with_sector_data(geometry, |_| index_payload(geometry.sector_size())).unwrap()
}

/// Encode one track's raw cells from payloads.
pub fn track_raw(geometry: &DiskGeometry, ch: DiskCh, payload: impl Fn(DiskChs) -> Vec<u8>) -> BitVec {
    let sectors: Vec<TrackSectorData> = (1..=geometry.sectors_per_track())
        .map(|s| {
            let chs = DiskChs::new(ch.c(), ch.h(), s);
            TrackSectorData {
                chs,
                size_code: bytes_to_n(geometry.sector_size()),
                data: payload(chs),
                deleted: false,
            }
        })
        .collect();
    codec_for(geometry.encoding())
        .encode_track(&sectors, geometry, ch)
        .unwrap()
}

/// The raw bit offsets of every sector's data mark on a track, in sector-id order.
pub fn data_mark_offsets(geometry: &DiskGeometry, raw: &BitVec) -> Vec<(DiskChs, usize)> {
    let stream = BitStream::from_bitvec(raw.clone());
    let track = codec_for(geometry.encoding())
        .decode_track(&stream, geometry, DiskCh::new(0, 0))
        .unwrap();
    track
        .sectors
        .iter()
        .map(|s| (s.chs, s.data_mark_offset.unwrap()))
        .collect()
}

/// Flip one raw data cell inside a sector's payload so its data CRC fails.
pub fn corrupt_sector_payload(raw: &mut BitVec, data_mark_offset: usize) {
    // 64 marker cells, then 50 bytes into the payload, on a data cell.
    let bit = data_mark_offset + 64 + 50 * 16 + 1;
    let old = raw.get(bit).unwrap();
    raw.set(bit, !old);
}

/// A controller whose damaged sectors heal on a fixed read schedule: sector flux reads back
/// corrupt until the track has been captured `heal_at_read` times. Deterministic by
/// construction, which makes per-pass recovery counts exact.
pub struct ScheduledHealController {
    geometry: DiskGeometry,
    tracks: Vec<BitVec>,
    /// Per track: (data mark offset, heal_at_read) for each damaged sector.
    damage: HashMap<usize, Vec<(usize, u32)>>,
    read_counts: Vec<u32>,
    position: Option<DiskCh>,
}

impl ScheduledHealController {
    pub fn new(geometry: DiskGeometry) -> ScheduledHealController {
        let mut tracks = Vec::with_capacity(geometry.total_tracks());
        for c in 0..geometry.cylinders() {
            for h in 0..geometry.heads() {
                tracks.push(track_raw(&geometry, DiskCh::new(c, h), |_| {
                    index_payload(geometry.sector_size())
                }));
            }
        }
        ScheduledHealController {
            geometry,
            tracks,
            damage: HashMap::new(),
            read_counts: vec![0; geometry.total_tracks()],
            position: None,
        }
    }

    pub fn geometry(&self) -> DiskGeometry {
        self.geometry
    }

    /// Mark a sector as damaged until the containing track's `heal_at_read`-th capture.
    /// Sectors that should never heal use `u32::MAX`.
    pub fn damage_sector(&mut self, chs: DiskChs, heal_at_read: u32) {
        let index = chs.ch().track_index(self.geometry.heads());
        let offsets = data_mark_offsets(&self.geometry, &self.tracks[index]);
        let mark = offsets
            .iter()
            .find(|(id, _)| *id == chs)
            .map(|(_, mark)| *mark)
            .expect("damaged sector exists on track");
        self.damage.entry(index).or_default().push((mark, heal_at_read));
    }
}

impl FloppyController for ScheduledHealController {
    fn seek(&mut self, ch: DiskCh) -> Result<(), ControllerError> {
        if ch.c() >= self.geometry.cylinders() || ch.h() >= self.geometry.heads() {
            return Err(ControllerError::SeekError);
        }
        self.position = Some(ch);
        Ok(())
    }

    fn set_motor(&mut self, _on: bool) -> Result<(), ControllerError> {
        Ok(())
    }

    fn read_flux(&mut self, revolutions: u8) -> Result<FluxCapture, ControllerError> {
        let ch = self.position.ok_or(ControllerError::SeekError)?;
        let index = ch.track_index(self.geometry.heads());
        self.read_counts[index] += 1;
        let read = self.read_counts[index];

        let mut raw = self.tracks[index].clone();
        if let Some(damage) = self.damage.get(&index) {
            for &(mark, heal_at) in damage {
                if read < heal_at {
                    corrupt_sector_payload(&mut raw, mark);
                }
            }
        }

        let cell_secs = self.geometry.encoding().cell_period(self.geometry.bit_cell_secs());
        synth::capture_from_bits(&raw, cell_secs, DEFAULT_SAMPLE_HZ, revolutions.max(1) as usize)
            .map_err(|_| ControllerError::TransportLost)
    }

    fn write_flux(&mut self, _capture: &FluxCapture) -> Result<(), ControllerError> {
        Err(ControllerError::WriteProtected)
    }

    fn erase_track(&mut self) -> Result<(), ControllerError> {
        Err(ControllerError::WriteProtected)
    }

    fn measure_rpm(&mut self) -> Result<f64, ControllerError> {
        Ok(f64::from(self.geometry.rpm()))
    }

    fn close(&mut self) {}
}
