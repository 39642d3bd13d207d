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

    src/controller/memory.rs

    An in-memory controller backed by one revolution of flux per track. It
    serves as the deterministic test double for the orchestrators and as the
    headless driver behind the CLI: tracks can be synthesized from sector
    data, loaded from captures, jittered with a seeded noise model, and made
    to fail on cue.
*/

use std::collections::HashMap;

use rand::{rngs::StdRng, SeedableRng};

use crate::{
    codec::{codec_for, TrackSectorData},
    controller::{ControllerConfig, FloppyController},
    flux::{capture::FluxCapture, synth},
    types::{
        chs::{bytes_to_n, DiskCh, DiskChs},
        geometry::DiskGeometry,
    },
    ControllerError,
    DEFAULT_SAMPLE_HZ,
};

/// Interval train an erased or unformatted track produces: steady ~14µs transitions that no
/// encoding's PLL can hold lock on.
const BLANK_TRACK_INTERVAL: u32 = 1000;

#[derive(Default)]
struct FaultPlan {
    seek_failures: HashMap<(u16, u8), u32>,
    read_timeouts: u32,
    write_errors: u32,
    transport_lost_after_reads: Option<u32>,
}

/// A memory-backed drive. One stored interval train per track index; reads repeat it per
/// revolution, with fresh jitter per revolution when a noise model is installed.
pub struct MemoryController {
    config: ControllerConfig,
    geometry: DiskGeometry,
    sample_hz: u32,
    tracks: Vec<Option<Vec<u32>>>,
    position: Option<DiskCh>,
    motor_on: bool,
    open: bool,
    write_protected: bool,
    noise: Option<(f64, StdRng)>,
    faults: FaultPlan,
    write_count: u32,
    read_count: u32,
}

impl MemoryController {
    /// Open a handle on a blank (unformatted) disk. Opening is idempotent in the sense the
    /// controller contract requires: a fresh handle on the same backing state.
    pub fn open(config: ControllerConfig, geometry: DiskGeometry) -> MemoryController {
        let sample_hz = config.sample_hz;
        MemoryController {
            config,
            geometry,
            sample_hz,
            tracks: vec![None; geometry.total_tracks()],
            position: None,
            motor_on: false,
            open: true,
            write_protected: false,
            noise: None,
            faults: FaultPlan::default(),
            write_count: 0,
            read_count: 0,
        }
    }

    /// A blank disk behind a default-configured handle.
    pub fn blank(geometry: DiskGeometry) -> MemoryController {
        MemoryController::open(ControllerConfig::default(), geometry)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Build a formatted disk whose sector payloads come from `payload_fn`. Tracks are encoded
    /// with the geometry's codec and synthesized at the geometry's nominal bit cell.
    pub fn with_sector_data(
        geometry: DiskGeometry,
        payload_fn: impl Fn(DiskChs) -> Vec<u8>,
    ) -> Result<MemoryController, ControllerError> {
        let mut controller = MemoryController::blank(geometry);
        let codec = codec_for(geometry.encoding());
        let size_code = bytes_to_n(geometry.sector_size());

        for c in 0..geometry.cylinders() {
            for h in 0..geometry.heads() {
                let ch = DiskCh::new(c, h);
                let sectors: Vec<TrackSectorData> = (1..=geometry.sectors_per_track())
                    .map(|s| {
                        let chs = DiskChs::new(c, h, s);
                        TrackSectorData {
                            chs,
                            size_code,
                            data: payload_fn(chs),
                            deleted: false,
                        }
                    })
                    .collect();

                let raw = codec.encode_track(&sectors, &geometry, ch).map_err(|e| {
                    log::error!("MemoryController::with_sector_data(): encode failed: {}", e);
                    ControllerError::WriteError
                })?;
                let intervals =
                    synth::intervals_from_bits(&raw, geometry.bit_cell_secs() / 2.0, DEFAULT_SAMPLE_HZ);
                let index = ch.track_index(geometry.heads());
                controller.tracks[index] = Some(intervals);
            }
        }
        Ok(controller)
    }

    pub fn geometry(&self) -> &DiskGeometry {
        &self.geometry
    }

    pub fn sample_hz(&self) -> u32 {
        self.sample_hz
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    /// Install a Gaussian read-noise model. Sigma is in seconds of transition displacement;
    /// the seed makes every read sequence reproducible.
    pub fn set_noise(&mut self, sigma_secs: f64, seed: u64) {
        self.noise = Some((sigma_secs, StdRng::seed_from_u64(seed)));
    }

    /// Replace one track's stored flux. Index is `cylinder * heads + head`.
    pub fn set_track_intervals(&mut self, index: usize, intervals: Option<Vec<u32>>) {
        self.tracks[index] = intervals;
    }

    pub fn track_intervals(&self, index: usize) -> Option<&[u32]> {
        self.tracks[index].as_deref()
    }

    /// Corrupt a stored track in place, for failure-scenario tests.
    pub fn corrupt_track(&mut self, index: usize, f: impl FnOnce(&mut Vec<u32>)) {
        if let Some(track) = self.tracks[index].as_mut() {
            f(track);
        }
    }

    /// Make the next `count` seeks to `ch` fail.
    pub fn inject_seek_failures(&mut self, ch: DiskCh, count: u32) {
        self.faults.seek_failures.insert((ch.c(), ch.h()), count);
    }

    /// Make the next `count` flux reads time out.
    pub fn inject_read_timeouts(&mut self, count: u32) {
        self.faults.read_timeouts = count;
    }

    /// Make the next `count` writes fail with `WriteError`.
    pub fn inject_write_errors(&mut self, count: u32) {
        self.faults.write_errors = count;
    }

    /// Drop the transport permanently after `reads` more flux reads.
    pub fn lose_transport_after_reads(&mut self, reads: u32) {
        self.faults.transport_lost_after_reads = Some(reads);
    }

    pub fn write_count(&self) -> u32 {
        self.write_count
    }

    pub fn read_count(&self) -> u32 {
        self.read_count
    }

    fn current_index(&self) -> Result<usize, ControllerError> {
        let ch = self.position.ok_or(ControllerError::SeekError)?;
        Ok(ch.track_index(self.geometry.heads()))
    }

    fn check_open(&self) -> Result<(), ControllerError> {
        if !self.open {
            return Err(ControllerError::NotOpen);
        }
        Ok(())
    }
}

impl FloppyController for MemoryController {
    fn seek(&mut self, ch: DiskCh) -> Result<(), ControllerError> {
        self.check_open()?;
        if ch.c() >= self.geometry.cylinders() || ch.h() >= self.geometry.heads() {
            log::error!("MemoryController::seek(): {} outside geometry", ch);
            return Err(ControllerError::SeekError);
        }
        if let Some(remaining) = self.faults.seek_failures.get_mut(&(ch.c(), ch.h())) {
            if *remaining > 0 {
                *remaining -= 1;
                log::debug!("MemoryController::seek(): injected seek failure at {}", ch);
                return Err(ControllerError::SeekError);
            }
        }
        self.position = Some(ch);
        Ok(())
    }

    fn set_motor(&mut self, on: bool) -> Result<(), ControllerError> {
        self.check_open()?;
        self.motor_on = on;
        Ok(())
    }

    fn read_flux(&mut self, revolutions: u8) -> Result<FluxCapture, ControllerError> {
        self.check_open()?;
        let index = self.current_index()?;

        if self.faults.read_timeouts > 0 {
            self.faults.read_timeouts -= 1;
            log::debug!("MemoryController::read_flux(): injected timeout");
            return Err(ControllerError::TransportTimeout);
        }
        if let Some(after) = self.faults.transport_lost_after_reads {
            if self.read_count >= after {
                log::debug!("MemoryController::read_flux(): injected transport loss");
                return Err(ControllerError::TransportLost);
            }
        }
        self.read_count += 1;

        let revolutions = revolutions.clamp(1, crate::MAXIMUM_REVOLUTIONS as u8) as usize;
        let base: Vec<u32> = match &self.tracks[index] {
            Some(intervals) => intervals.clone(),
            None => {
                // Erased media: a featureless transition train.
                let rev_ticks =
                    (self.geometry.rpm().revolution_secs() * self.sample_hz as f64) as usize;
                vec![BLANK_TRACK_INTERVAL; rev_ticks / BLANK_TRACK_INTERVAL as usize]
            }
        };

        let mut intervals = Vec::with_capacity(base.len() * revolutions);
        let mut index_positions = Vec::with_capacity(revolutions + 1);
        index_positions.push(0);
        for _ in 0..revolutions {
            let mut rev = base.clone();
            if let Some((sigma, rng)) = self.noise.as_mut() {
                synth::apply_jitter(&mut rev, *sigma, self.sample_hz, rng);
            }
            intervals.extend_from_slice(&rev);
            index_positions.push(intervals.len());
        }

        FluxCapture::from_intervals(self.sample_hz, intervals, index_positions).map_err(|e| {
            log::error!("MemoryController::read_flux(): invalid stored flux: {}", e);
            ControllerError::TransportLost
        })
    }

    fn write_flux(&mut self, capture: &FluxCapture) -> Result<(), ControllerError> {
        self.check_open()?;
        let index = self.current_index()?;

        if self.write_protected {
            log::debug!("MemoryController::write_flux(): medium is write protected");
            return Err(ControllerError::WriteProtected);
        }
        if self.faults.write_errors > 0 {
            self.faults.write_errors -= 1;
            log::debug!("MemoryController::write_flux(): injected write error");
            return Err(ControllerError::WriteError);
        }

        // Exactly one revolution lands on the medium.
        let rev = capture.revolution(0).map_err(|_| ControllerError::WriteError)?;
        self.tracks[index] = Some(rev.intervals().to_vec());
        self.write_count += 1;
        Ok(())
    }

    fn erase_track(&mut self) -> Result<(), ControllerError> {
        self.check_open()?;
        let index = self.current_index()?;
        if self.write_protected {
            return Err(ControllerError::WriteProtected);
        }
        self.tracks[index] = None;
        self.write_count += 1;
        Ok(())
    }

    fn measure_rpm(&mut self) -> Result<f64, ControllerError> {
        self.check_open()?;
        Ok(f64::from(self.geometry.rpm()))
    }

    fn close(&mut self) {
        self.motor_on = false;
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bitstream::BitStream,
        codec::codec_for,
        flux::pll::{Pll, PllConfig},
    };

    fn payload_for(chs: DiskChs) -> Vec<u8> {
        vec![chs.s().wrapping_mul(3); 512]
    }

    #[test]
    fn formatted_disk_reads_back_decodable_flux() {
        let geometry = DiskGeometry::pc_1440k();
        let mut drive = MemoryController::with_sector_data(geometry, payload_for).unwrap();

        drive.seek(DiskCh::new(12, 1)).unwrap();
        let capture = drive.read_flux(2).unwrap();
        assert_eq!(capture.revolutions(), 2);

        let pll = Pll::new(PllConfig::new(geometry.encoding(), geometry.data_rate()));
        let decoded = pll.decode(&capture.revolution(0).unwrap(), false).unwrap();
        let track = codec_for(geometry.encoding())
            .decode_track(&BitStream::from_bitvec(decoded.stream.bits().clone()), &geometry, DiskCh::new(12, 1))
            .unwrap();

        assert_eq!(track.sectors.len(), 18);
        assert!(track.sectors.iter().all(|s| s.is_good()));
        assert_eq!(track.sectors[0].payload, payload_for(track.sectors[0].chs));
    }

    #[test]
    fn blank_track_yields_featureless_flux() {
        let geometry = DiskGeometry::pc_1440k();
        let mut drive = MemoryController::blank(geometry);
        drive.seek(DiskCh::new(0, 0)).unwrap();
        let capture = drive.read_flux(1).unwrap();
        assert!(capture.intervals().iter().all(|&t| t == BLANK_TRACK_INTERVAL));
    }

    #[test]
    fn write_protect_blocks_writes_and_erase() {
        let geometry = DiskGeometry::pc_1440k();
        let mut drive = MemoryController::with_sector_data(geometry, payload_for).unwrap();
        drive.set_write_protected(true);
        drive.seek(DiskCh::new(0, 0)).unwrap();

        let capture = drive.read_flux(1).unwrap();
        assert!(matches!(
            drive.write_flux(&capture),
            Err(ControllerError::WriteProtected)
        ));
        assert!(matches!(drive.erase_track(), Err(ControllerError::WriteProtected)));
        assert_eq!(drive.write_count(), 0);
    }

    #[test]
    fn injected_faults_fire_in_order() {
        let geometry = DiskGeometry::pc_1440k();
        let mut drive = MemoryController::with_sector_data(geometry, payload_for).unwrap();

        drive.inject_seek_failures(DiskCh::new(5, 0), 1);
        assert!(matches!(drive.seek(DiskCh::new(5, 0)), Err(ControllerError::SeekError)));
        assert!(drive.seek(DiskCh::new(5, 0)).is_ok());

        drive.inject_read_timeouts(1);
        assert!(matches!(drive.read_flux(1), Err(ControllerError::TransportTimeout)));
        assert!(drive.read_flux(1).is_ok());
    }

    #[test]
    fn written_flux_replaces_the_track() {
        let geometry = DiskGeometry::pc_1440k();
        let mut drive = MemoryController::blank(geometry);
        drive.seek(DiskCh::new(0, 0)).unwrap();

        let capture = FluxCapture::from_intervals(
            DEFAULT_SAMPLE_HZ,
            vec![144; 1000],
            vec![0, 500, 1000],
        )
        .unwrap();
        drive.write_flux(&capture).unwrap();
        // Only revolution 0 lands.
        assert_eq!(drive.track_intervals(0).unwrap().len(), 500);
    }
}
