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

    src/recovery.rs

    The iterative recovery controller. For each outstanding sector it applies
    an escalating ladder of strategies - direct re-read, multi-capture bit
    voting, PLL parameter sweeps, bit-slip re-extraction and, as a last
    resort, surface treatment - re-invoking the decode pipeline until the
    bad-sector count converges.
*/

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    bitstream::BitStream,
    codec::{codec_for, reextract_with_slip, verify_payload_crc, DecodedSector, TrackSectorData},
    controller::{retry_once, FloppyController},
    events::{CancelToken, EngineEvent, EventSink},
    flux::{
        capture::FluxCapture,
        pll::{Pll, PllConfig},
        synth,
    },
    sector_map::SectorTable,
    types::{
        chs::{bytes_to_n, DiskCh, DiskChs},
        enums::{RecoveryLevel, RecoveryMethod, SectorStatus, TrackEncoding},
        geometry::DiskGeometry,
    },
    ControllerError,
    JobError,
    JobOutcome,
    JobStatistics,
};

/// Surface treatment writes these patterns in sequence before the final format pass.
pub const SURFACE_PATTERNS: [u8; 4] = [0x00, 0xFF, 0xAA, 0x55];

/// Format-refresh fill patterns, consumed cyclically across passes.
pub const ROTATION_PATTERNS: [u8; 4] = [0x55, 0xAA, 0xFF, 0x00];

/// Verification retries of the outer loop.
pub const VERIFICATION_RETRIES: u32 = 3;

const GRID_PERIOD_GAINS: [f64; 5] = [0.02, 0.03, 0.05, 0.07, 0.10];
const GRID_PHASE_GAINS: [f64; 5] = [0.4, 0.5, 0.6, 0.7, 0.8];

/// Pass-count policy for a recovery job.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RecoveryMode {
    /// Exactly N passes (or until nothing is outstanding).
    Fixed(u32),
    /// Run until the bad count stops improving.
    Convergence { max_passes: u32, quiet_passes: u32 },
}

impl Default for RecoveryMode {
    fn default() -> Self {
        RecoveryMode::Convergence {
            max_passes: 50,
            quiet_passes: 3,
        }
    }
}

/// Strategy configuration for a recovery job.
#[derive(Clone, Debug)]
pub struct RecoveryProfile {
    pub level: RecoveryLevel,
    pub mode: RecoveryMode,
    pub multi_capture: bool,
    /// Revolutions per hardware capture, 1-10.
    pub revolutions_per_capture: u8,
    /// Total revolutions fed to the bit vote, clamped to 10-1000.
    pub vote_revolutions: u32,
    pub pll_tuning: bool,
    pub bit_slip: bool,
    pub surface_treatment: bool,
    /// Overrides the deterministic sweep grid when set.
    pub pll_grid: Option<Vec<PllConfig>>,
    /// Final fill for the format pass of surface treatment.
    pub fill_byte: u8,
}

impl RecoveryProfile {
    pub fn for_level(level: RecoveryLevel) -> RecoveryProfile {
        match level {
            RecoveryLevel::Standard => RecoveryProfile {
                level,
                mode: RecoveryMode::default(),
                multi_capture: true,
                revolutions_per_capture: 2,
                vote_revolutions: 16,
                pll_tuning: false,
                bit_slip: false,
                surface_treatment: false,
                pll_grid: None,
                fill_byte: 0xE5,
            },
            RecoveryLevel::Aggressive => RecoveryProfile {
                level,
                mode: RecoveryMode::default(),
                multi_capture: true,
                revolutions_per_capture: 3,
                vote_revolutions: 32,
                pll_tuning: true,
                bit_slip: true,
                surface_treatment: false,
                pll_grid: None,
                fill_byte: 0xE5,
            },
            RecoveryLevel::Forensic => RecoveryProfile {
                level,
                mode: RecoveryMode::default(),
                multi_capture: true,
                revolutions_per_capture: 5,
                vote_revolutions: 64,
                pll_tuning: true,
                bit_slip: true,
                surface_treatment: true,
                pll_grid: None,
                fill_byte: 0xE5,
            },
        }
    }

    /// The deterministic sweep order: period gain major, then phase gain, then bit-cell offset
    /// in 2.5% steps.
    pub fn sweep_grid(&self, encoding: TrackEncoding, nominal_bit_cell: f64) -> Vec<PllConfig> {
        if let Some(grid) = &self.pll_grid {
            return grid.clone();
        }
        let mut grid = Vec::with_capacity(GRID_PERIOD_GAINS.len() * GRID_PHASE_GAINS.len() * 5);
        for &alpha in GRID_PERIOD_GAINS.iter() {
            for &beta in GRID_PHASE_GAINS.iter() {
                for k in -2i32..=2 {
                    grid.push(PllConfig {
                        bit_cell_secs: nominal_bit_cell * (1.0 + 0.025 * k as f64),
                        period_gain: alpha,
                        phase_gain: beta,
                        encoding,
                    });
                }
            }
        }
        grid
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecoveryReport {
    pub outcome: JobOutcome,
    pub passes: u32,
    /// Outstanding bad count after each pass.
    pub pass_history: Vec<usize>,
    pub converged: bool,
    pub plateaued: bool,
    /// Linear addresses recovered by this job.
    pub recovered: Vec<usize>,
}

/// Drives recovery for a set of target addresses against one controller handle. The job borrows
/// the sector table for its whole duration; it requests updates, it never owns sectors.
pub struct RecoveryController<'a> {
    controller: &'a mut dyn FloppyController,
    table: &'a mut SectorTable,
    profile: RecoveryProfile,
    encoding: TrackEncoding,
    sink: &'a dyn EventSink,
    cancel: CancelToken,
    /// Tracks excluded from further write strategies after a surface-treatment failure.
    surface_failed: HashSet<usize>,
    /// Cleared when the medium reports write protection.
    writes_allowed: bool,
    pattern_cursor: usize,
    quiet_streak: u32,
}

impl<'a> RecoveryController<'a> {
    pub fn new(
        controller: &'a mut dyn FloppyController,
        table: &'a mut SectorTable,
        profile: RecoveryProfile,
        sink: &'a dyn EventSink,
        cancel: CancelToken,
    ) -> RecoveryController<'a> {
        let encoding = table.geometry().encoding();
        RecoveryController {
            controller,
            table,
            profile,
            encoding,
            sink,
            cancel,
            surface_failed: HashSet::new(),
            writes_allowed: true,
            pattern_cursor: 0,
            quiet_streak: 0,
        }
    }

    /// Run recovery over `targets` (targeted mode) or over every currently-bad address in the
    /// table (full mode). Always returns a structured report; transport faults become a failed
    /// outcome with the table preserved at its last committed state.
    pub fn run(&mut self, targets: Option<Vec<usize>>) -> Result<RecoveryReport, JobError> {
        let original: Vec<usize> = match targets {
            Some(t) => {
                if t.iter().any(|&lin| lin >= self.table.len()) {
                    return Err(JobError::ParameterError);
                }
                t
            }
            None => self.table.bad_addresses(),
        };

        let mut report = RecoveryReport::default();
        if original.is_empty() {
            report.outcome = JobOutcome::ok(self.statistics(0));
            return Ok(report);
        }

        if let Err(e) = self.controller.set_motor(true) {
            report.outcome = JobOutcome::failed(error_name(&e), self.statistics(0));
            return Ok(report);
        }

        let mut fatal: Option<ControllerError> = None;
        for retry in 0..=VERIFICATION_RETRIES {
            if let Err(e) = self.run_passes(&original, &mut report) {
                fatal = Some(e);
                break;
            }
            if self.cancel.is_cancelled() {
                break;
            }

            // Verification is authoritative: re-scan the original targets and restart the loop
            // if anything regressed.
            match self.verify(&original, report.passes) {
                Ok(regressed) => {
                    if regressed.is_empty() {
                        break;
                    }
                    log::warn!(
                        "RecoveryController::run(): {} sector(s) regressed in verification, retry {}",
                        regressed.len(),
                        retry + 1
                    );
                }
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            }
        }

        self.controller.set_motor(false).ok();

        let stats = self.statistics(report.passes);
        report.outcome = if let Some(e) = fatal {
            JobOutcome::failed(error_name(&e), stats)
        }
        else if self.cancel.is_cancelled() {
            JobOutcome::partial("cancelled", stats)
        }
        else {
            let remaining = self.outstanding(&original).len();
            if remaining == 0 {
                JobOutcome::ok(stats)
            }
            else {
                JobOutcome::partial(format!("{} sector(s) remain bad", remaining), stats)
            }
        };

        Ok(report)
    }

    fn statistics(&self, passes: u32) -> JobStatistics {
        JobStatistics {
            tracks_visited: 0,
            sectors_good: self.table.good_count(),
            sectors_bad: self.table.bad_count(),
            sectors_weak: self.table.weak_count(),
            passes,
        }
    }

    /// Addresses from the target set whose table entry still lacks a verified payload.
    fn outstanding(&self, targets: &[usize]) -> Vec<usize> {
        targets
            .iter()
            .copied()
            .filter(|&lin| {
                self.table
                    .sector(lin)
                    .map(|s| !s.status.is_readable())
                    .unwrap_or(false)
            })
            .collect()
    }

    fn run_passes(&mut self, original: &[usize], report: &mut RecoveryReport) -> Result<(), ControllerError> {
        let max_passes = match self.profile.mode {
            RecoveryMode::Fixed(n) => n,
            RecoveryMode::Convergence { max_passes, .. } => max_passes,
        };

        // Deltas are evaluated against the count entering each pass, so the history carries the
        // initial outstanding count at index 0.
        let mut history: Vec<usize> = vec![self.outstanding(original).len()];

        while report.passes < max_passes {
            let outstanding = self.outstanding(original);
            if outstanding.is_empty() {
                break;
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let pass = report.passes + 1;
            self.sink.on_event(&EngineEvent::PassStarted {
                pass,
                outstanding: outstanding.len(),
            });

            self.run_pass(pass, &outstanding, report)?;

            let bad = self.outstanding(original).len();
            report.passes = pass;
            report.pass_history.push(bad);
            history.push(bad);
            self.quiet_streak = if bad < history[history.len() - 2] {
                0
            }
            else {
                self.quiet_streak + 1
            };

            self.sink.on_event(&EngineEvent::PassCompleted {
                pass,
                bad_remaining: bad,
            });

            if let RecoveryMode::Convergence { quiet_passes, .. } = self.profile.mode {
                // Converged: the last `quiet_passes` deltas are all zero.
                let q = quiet_passes as usize;
                if history.len() > q && history[history.len() - 1 - q..].windows(2).all(|w| w[0] == w[1]) {
                    report.converged = true;
                    self.sink.on_event(&EngineEvent::Converged { pass });
                    log::debug!("RecoveryController::run_passes(): converged at pass {}", pass);
                    break;
                }
                // Plateaued: no decrease in any of the last `quiet_passes + 2` passes.
                let p = q + 2;
                if history.len() > p && history[history.len() - 1 - p..].windows(2).all(|w| w[1] >= w[0]) {
                    report.plateaued = true;
                    self.sink.on_event(&EngineEvent::Plateaued { pass });
                    log::debug!("RecoveryController::run_passes(): plateaued at pass {}", pass);
                    break;
                }
            }
        }

        Ok(())
    }

    fn run_pass(&mut self, pass: u32, outstanding: &[usize], report: &mut RecoveryReport) -> Result<(), ControllerError> {
        let geometry = *self.table.geometry();

        let mut by_track: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &lin in outstanding {
            let chs = DiskChs::from_linear(lin, geometry.heads(), geometry.sectors_per_track());
            by_track
                .entry(chs.ch().track_index(geometry.heads()))
                .or_default()
                .push(lin);
        }

        for (track_index, addrs) in by_track {
            if self.cancel.is_cancelled() {
                break;
            }
            let ch = track_ch(track_index, geometry.heads());
            retry_once(|| self.controller.seek(ch))?;

            // 1. Direct re-read with the nominal PLL.
            let capture = retry_once(|| self.controller.read_flux(self.profile.revolutions_per_capture))?;
            let nominal = PllConfig::new(self.encoding, geometry.data_rate());
            let mut last_decodes: Vec<(BitStream, Vec<DecodedSector>)> =
                self.decode_capture(&capture, nominal);

            for (_, sectors) in &last_decodes {
                for sector in sectors {
                    if let Some(lin) = self.target_for(sector, &addrs) {
                        if sector.is_good() {
                            self.recover(lin, sector, RecoveryMethod::Direct, pass, report);
                        }
                    }
                }
            }

            // 2. Multi-capture voting.
            if self.profile.multi_capture && !self.remaining(&addrs).is_empty() {
                self.multi_capture_vote(ch, &addrs, pass, report)?;
            }

            // 3. PLL parameter sweep over the cached capture.
            if self.profile.pll_tuning
                && matches!(self.profile.level, RecoveryLevel::Aggressive | RecoveryLevel::Forensic)
                && !self.remaining(&addrs).is_empty()
            {
                let grid = self.profile.sweep_grid(self.encoding, geometry.bit_cell_secs());
                for config in grid {
                    if self.remaining(&addrs).is_empty() {
                        break;
                    }
                    let decodes = self.decode_capture(&capture, config);
                    for (_, sectors) in &decodes {
                        for sector in sectors {
                            if let Some(lin) = self.target_for(sector, &addrs) {
                                if sector.is_good() {
                                    self.recover(lin, sector, RecoveryMethod::PllTuning, pass, report);
                                }
                            }
                        }
                    }
                    if !decodes.is_empty() {
                        last_decodes = decodes;
                    }
                }
            }

            // 4. Bit-slip around the data mark. Forensic always; Aggressive once the job has
            // gone quiet for two passes.
            let slip_enabled = self.profile.bit_slip
                && (self.profile.level == RecoveryLevel::Forensic
                    || (self.profile.level == RecoveryLevel::Aggressive && self.quiet_streak >= 2));
            if slip_enabled && !self.remaining(&addrs).is_empty() {
                self.bit_slip(&addrs, &last_decodes, pass, report);
            }

            // 5. Surface treatment of still-bad tracks, forensic only and never after a write
            // failure on the same track.
            if self.profile.surface_treatment
                && self.profile.level == RecoveryLevel::Forensic
                && self.writes_allowed
                && !self.surface_failed.contains(&track_index)
                && !self.remaining(&addrs).is_empty()
            {
                self.surface_treatment(ch, track_index, &addrs, pass, report)?;
            }
        }

        Ok(())
    }

    /// Decode every revolution of a capture with one PLL configuration.
    fn decode_capture(&self, capture: &FluxCapture, config: PllConfig) -> Vec<(BitStream, Vec<DecodedSector>)> {
        let geometry = self.table.geometry();
        let pll = Pll::new(config);
        let codec = codec_for(self.encoding);
        let mut out = Vec::new();

        for rev in capture.revolution_iter() {
            let Ok(result) = pll.decode(&rev, true) else {
                continue;
            };
            let ch = DiskCh::new(0, 0); // codecs only use the track id for logging
            match codec.decode_track(&result.stream, geometry, ch) {
                Ok(track) => out.push((result.stream, track.sectors)),
                Err(_) => continue,
            }
        }
        out
    }

    /// The still-outstanding subset of a track's target addresses.
    fn remaining(&self, addrs: &[usize]) -> Vec<usize> {
        self.outstanding(addrs)
    }

    /// Match a decoded sector to a target address, if it is one and still unresolved.
    fn target_for(&self, sector: &DecodedSector, addrs: &[usize]) -> Option<usize> {
        let lin = self.table.linear(sector.chs)?;
        if addrs.contains(&lin) && !self.table.sector(lin)?.status.is_readable() {
            Some(lin)
        }
        else {
            None
        }
    }

    fn recover(
        &mut self,
        lin: usize,
        sector: &DecodedSector,
        method: RecoveryMethod,
        pass: u32,
        report: &mut RecoveryReport,
    ) {
        let chs = sector.chs;
        let payload = sector.payload.clone();
        let confidence = sector.confidence;
        self.apply_recovery(lin, chs, payload, confidence, method, pass, report);
    }

    fn apply_recovery(
        &mut self,
        lin: usize,
        chs: DiskChs,
        payload: Vec<u8>,
        confidence: f32,
        method: RecoveryMethod,
        pass: u32,
        report: &mut RecoveryReport,
    ) {
        self.table.with_sector_mut(lin, |s| {
            s.status = if method == RecoveryMethod::Direct {
                SectorStatus::Good
            }
            else {
                SectorStatus::Recovered
            };
            s.payload = Some(payload);
            s.header_crc_ok = Some(true);
            s.data_crc_ok = Some(true);
            s.quality = s.quality.max(confidence);
            s.last_successful_pass = pass;
            s.recovered_by = Some(method);
        });
        report.recovered.push(lin);
        self.sink.on_event(&EngineEvent::SectorRecovered { chs, method });
        log::debug!("RecoveryController: recovered {} via {} in pass {}", chs, method, pass);
    }

    /// Capture repeatedly until `vote_revolutions` decoded revolutions have fed the vote, then
    /// elect each payload bit by confidence-weighted majority and re-check the CRC.
    fn multi_capture_vote(
        &mut self,
        _ch: DiskCh,
        addrs: &[usize],
        pass: u32,
        report: &mut RecoveryReport,
    ) -> Result<(), ControllerError> {
        let geometry = *self.table.geometry();
        let crc_len = if self.encoding == TrackEncoding::AmigaMfm { 4 } else { 2 };
        let vote_bits = (geometry.sector_size() + crc_len) * 8;
        let k = self.profile.vote_revolutions.clamp(10, 1000);
        let per_capture = self.profile.revolutions_per_capture.clamp(1, 10);

        struct VoteAcc {
            chs: DiskChs,
            sums: Vec<f32>,
            votes: u32,
            deleted: bool,
        }
        let mut accs: HashMap<usize, VoteAcc> = HashMap::new();

        // Identical revolutions decode identically; hash the interval train and reuse the
        // decode result for repeats.
        let mut decode_cache: HashMap<[u8; 20], Vec<DecodedSector>> = HashMap::new();

        let nominal = PllConfig::new(self.encoding, geometry.data_rate());

        let mut revolutions_voted = 0u32;
        while revolutions_voted < k {
            if self.cancel.is_cancelled() {
                break;
            }
            let capture = retry_once(|| self.controller.read_flux(per_capture))?;

            for rev in capture.revolution_iter() {
                if revolutions_voted >= k {
                    break;
                }
                revolutions_voted += 1;

                let mut hasher = sha1_smol::Sha1::new();
                hasher.update(bytemuck::cast_slice(rev.intervals()));
                let digest = hasher.digest().bytes();

                let sectors = match decode_cache.get(&digest) {
                    Some(sectors) => sectors.clone(),
                    None => {
                        let pll = Pll::new(nominal);
                        let decoded = match pll.decode(&rev, true) {
                            Ok(result) => match codec_for(self.encoding).decode_track(
                                &result.stream,
                                &geometry,
                                DiskCh::new(0, 0),
                            ) {
                                Ok(track) => track.sectors,
                                Err(_) => Vec::new(),
                            },
                            Err(_) => Vec::new(),
                        };
                        decode_cache.insert(digest, decoded.clone());
                        decoded
                    }
                };

                for sector in &sectors {
                    let Some(lin) = self.table.linear(sector.chs) else {
                        continue;
                    };
                    if !addrs.contains(&lin) {
                        continue;
                    }
                    if sector.payload.len() != geometry.sector_size() || sector.stored_crc.len() != crc_len {
                        continue;
                    }

                    let acc = accs.entry(lin).or_insert_with(|| VoteAcc {
                        chs: sector.chs,
                        sums: vec![0.0; vote_bits],
                        votes: 0,
                        deleted: sector.deleted,
                    });
                    acc.votes += 1;

                    let mut bytes = sector.payload.clone();
                    bytes.extend_from_slice(&sector.stored_crc);
                    for (i, sum) in acc.sums.iter_mut().enumerate() {
                        let bit = (bytes[i / 8] >> (7 - i % 8)) & 1 != 0;
                        let conf = sector
                            .bit_confidence
                            .as_ref()
                            .and_then(|c| c.get(i).copied())
                            .unwrap_or(1.0);
                        *sum += if bit { conf } else { -conf };
                    }
                }
            }
        }

        for (lin, acc) in accs {
            if self
                .table
                .sector(lin)
                .map(|s| s.status.is_readable())
                .unwrap_or(true)
            {
                continue;
            }

            // Elect the majority bit at every position.
            let mut bytes = vec![0u8; vote_bits / 8];
            for (i, &sum) in acc.sums.iter().enumerate() {
                if sum > 0.0 {
                    bytes[i / 8] |= 1 << (7 - i % 8);
                }
            }
            let payload = bytes[..geometry.sector_size()].to_vec();
            let stored_crc = &bytes[geometry.sector_size()..];

            if verify_payload_crc(self.encoding, &payload, stored_crc, acc.deleted) {
                log::debug!(
                    "RecoveryController::multi_capture_vote(): {} reconstruction passed CRC after {} votes",
                    acc.chs,
                    acc.votes
                );
                self.apply_recovery(lin, acc.chs, payload, 1.0, RecoveryMethod::MultiCaptureVote, pass, report);
            }
        }

        Ok(())
    }

    fn bit_slip(
        &mut self,
        addrs: &[usize],
        decodes: &[(BitStream, Vec<DecodedSector>)],
        pass: u32,
        report: &mut RecoveryReport,
    ) {
        for (stream, sectors) in decodes {
            for sector in sectors {
                let Some(lin) = self.target_for(sector, addrs) else {
                    continue;
                };
                // Slip applies where the header verified but the data field did not.
                if !sector.header_crc_ok || sector.data_crc_ok != Some(false) {
                    continue;
                }

                'slips: for magnitude in 1..=8i32 {
                    for slip in [magnitude, -magnitude] {
                        if let Some(payload) = reextract_with_slip(self.encoding, stream, sector, slip) {
                            log::debug!(
                                "RecoveryController::bit_slip(): {} recovered at slip {:+}",
                                sector.chs,
                                slip
                            );
                            self.apply_recovery(
                                lin,
                                sector.chs,
                                payload,
                                sector.confidence,
                                RecoveryMethod::BitSlip,
                                pass,
                                report,
                            );
                            break 'slips;
                        }
                    }
                }
            }
        }
    }

    /// DC-erase the track, write the four conditioning patterns, format with the rotation fill
    /// and re-read. A write-protect report disables write strategies for the whole job; a write
    /// error excludes this track only.
    fn surface_treatment(
        &mut self,
        ch: DiskCh,
        track_index: usize,
        addrs: &[usize],
        pass: u32,
        report: &mut RecoveryReport,
    ) -> Result<(), ControllerError> {
        let fill = ROTATION_PATTERNS[self.pattern_cursor % ROTATION_PATTERNS.len()];
        self.pattern_cursor += 1;

        match self.write_track_sequence(ch, fill) {
            Ok(()) => {}
            Err(ControllerError::WriteProtected) => {
                log::warn!("RecoveryController::surface_treatment(): medium is write protected");
                self.writes_allowed = false;
                return Ok(());
            }
            Err(ControllerError::WriteError) => {
                log::warn!(
                    "RecoveryController::surface_treatment(): write failed, excluding track {}",
                    ch
                );
                self.surface_failed.insert(track_index);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        // Re-read the refreshed track.
        let capture = retry_once(|| self.controller.read_flux(self.profile.revolutions_per_capture))?;
        let nominal = PllConfig::new(self.encoding, self.table.geometry().data_rate());
        for (_, sectors) in self.decode_capture(&capture, nominal) {
            for sector in &sectors {
                if let Some(lin) = self.target_for(sector, addrs) {
                    if sector.is_good() {
                        self.recover(lin, sector, RecoveryMethod::FormatRefresh, pass, report);
                    }
                }
            }
        }
        Ok(())
    }

    fn write_track_sequence(&mut self, ch: DiskCh, fill: u8) -> Result<(), ControllerError> {
        self.controller.erase_track()?;
        for pattern in SURFACE_PATTERNS {
            self.write_filled_track(ch, pattern)?;
        }
        self.write_filled_track(ch, fill)
    }

    fn write_filled_track(&mut self, ch: DiskCh, fill: u8) -> Result<(), ControllerError> {
        let capture = fill_track_capture(self.table.geometry(), ch, fill)?;
        self.controller.write_flux(&capture)
    }

    /// Final verification: re-read each track holding original targets and demand a CRC-valid
    /// decode for every sector the table claims is readable. A claim that fails is demoted
    /// Good -> Bad and returned for the outer loop to retry.
    fn verify(&mut self, original: &[usize], pass: u32) -> Result<Vec<usize>, ControllerError> {
        let geometry = *self.table.geometry();

        let mut by_track: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &lin in original {
            let chs = DiskChs::from_linear(lin, geometry.heads(), geometry.sectors_per_track());
            by_track
                .entry(chs.ch().track_index(geometry.heads()))
                .or_default()
                .push(lin);
        }

        let mut regressed = Vec::new();
        for (track_index, addrs) in by_track {
            let ch = track_ch(track_index, geometry.heads());
            retry_once(|| self.controller.seek(ch))?;
            let capture = retry_once(|| self.controller.read_flux(self.profile.revolutions_per_capture))?;

            let nominal = PllConfig::new(self.encoding, geometry.data_rate());
            let mut decodes = self.decode_capture(&capture, nominal);
            // Sectors recovered through the parameter sweep only re-decode under swept
            // parameters, so verification sweeps too when the profile allows it.
            if self.profile.pll_tuning {
                for config in self.profile.sweep_grid(self.encoding, geometry.bit_cell_secs()) {
                    decodes.extend(self.decode_capture(&capture, config));
                }
            }

            for &lin in &addrs {
                let claimed = self
                    .table
                    .sector(lin)
                    .map(|s| s.status.is_readable())
                    .unwrap_or(false);
                // Sectors recovered by write strategies verify against the refreshed medium
                // like any other.
                let verified = decodes.iter().any(|(_, sectors)| {
                    sectors.iter().any(|sector| {
                        self.table.linear(sector.chs) == Some(lin) && sector.is_good()
                    })
                });

                if claimed && !verified {
                    self.table.with_sector_mut(lin, |s| {
                        s.status = SectorStatus::Bad;
                        s.data_crc_ok = Some(false);
                        s.recovered_by = None;
                    });
                    regressed.push(lin);
                }
                else if claimed && verified {
                    self.table.with_sector_mut(lin, |s| s.last_successful_pass = pass.max(1));
                }
            }
        }
        Ok(regressed)
    }
}

/// One revolution of flux for a freshly formatted track filled with `fill`.
fn fill_track_capture(geometry: &DiskGeometry, ch: DiskCh, fill: u8) -> Result<FluxCapture, ControllerError> {
    let encoding = geometry.encoding();
    let sectors: Vec<TrackSectorData> = (1..=geometry.sectors_per_track())
        .map(|s| TrackSectorData {
            chs: DiskChs::new(ch.c(), ch.h(), s),
            size_code: bytes_to_n(geometry.sector_size()),
            data: vec![fill; geometry.sector_size()],
            deleted: false,
        })
        .collect();

    let raw = codec_for(encoding).encode_track(&sectors, geometry, ch).map_err(|e| {
        log::error!("fill_track_capture(): encode failed: {}", e);
        ControllerError::WriteError
    })?;
    let cell_secs = encoding.cell_period(geometry.bit_cell_secs());
    synth::capture_from_bits(&raw, cell_secs, crate::DEFAULT_SAMPLE_HZ, 1).map_err(|_| ControllerError::WriteError)
}

/// Format the whole disk with a fill byte. This is a pure write job: the first write-level
/// fault fails it, no further writes are attempted, and no sector table is touched.
pub fn format_disk(
    controller: &mut dyn FloppyController,
    geometry: DiskGeometry,
    fill: u8,
) -> Result<JobOutcome, JobError> {
    let mut stats = JobStatistics::default();

    if let Err(e) = controller.set_motor(true) {
        return Ok(JobOutcome::failed(error_name(&e), stats));
    }

    for c in 0..geometry.cylinders() {
        for h in 0..geometry.heads() {
            let ch = DiskCh::new(c, h);
            let result = retry_once(|| controller.seek(ch)).and_then(|_| {
                let capture = fill_track_capture(&geometry, ch, fill)?;
                controller.write_flux(&capture)
            });
            match result {
                Ok(()) => stats.tracks_visited += 1,
                Err(e) => {
                    log::warn!("format_disk(): {} failed at {}: {}", error_name(&e), ch, e);
                    controller.set_motor(false).ok();
                    return Ok(JobOutcome::failed(error_name(&e), stats));
                }
            }
        }
    }

    controller.set_motor(false).ok();
    Ok(JobOutcome::ok(stats))
}

fn track_ch(track_index: usize, heads: u8) -> DiskCh {
    DiskCh::new((track_index / heads as usize) as u16, (track_index % heads as usize) as u8)
}

fn error_name(e: &ControllerError) -> &'static str {
    match e {
        ControllerError::SeekError => "SeekError",
        ControllerError::TransportTimeout => "TransportTimeout",
        ControllerError::TransportLost => "TransportLost",
        ControllerError::WriteProtected => "WriteProtected",
        ControllerError::WriteError => "WriteError",
        ControllerError::MotorTimeout => "MotorTimeout",
        ControllerError::NotOpen => "NotOpen",
    }
}

/// Convenience wrapper: run recovery with a null sink and no cancellation.
pub fn recover(
    controller: &mut dyn FloppyController,
    table: &mut SectorTable,
    profile: RecoveryProfile,
    targets: Option<Vec<usize>>,
) -> Result<RecoveryReport, JobError> {
    let sink = crate::events::NullEventSink;
    let mut job = RecoveryController::new(controller, table, profile, &sink, CancelToken::new());
    job.run(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_grid_is_deterministic_and_alpha_major() {
        let profile = RecoveryProfile::for_level(RecoveryLevel::Aggressive);
        let grid = profile.sweep_grid(TrackEncoding::Mfm, 2.0e-6);
        assert_eq!(grid.len(), 5 * 5 * 5);
        assert_eq!(grid[0].period_gain, 0.02);
        assert_eq!(grid[0].phase_gain, 0.4);
        assert!((grid[0].bit_cell_secs - 2.0e-6 * 0.95).abs() < 1e-12);
        // The bit-cell offset varies fastest, the period gain slowest.
        assert_eq!(grid[4].period_gain, 0.02);
        assert!((grid[4].bit_cell_secs - 2.0e-6 * 1.05).abs() < 1e-12);
        assert_eq!(grid[24].period_gain, 0.02);
        assert_eq!(grid[24].phase_gain, 0.8);
        assert_eq!(grid[25].period_gain, 0.03);
    }

    #[test]
    fn user_grid_overrides_sweep() {
        let mut profile = RecoveryProfile::for_level(RecoveryLevel::Aggressive);
        profile.pll_grid = Some(vec![PllConfig::default()]);
        assert_eq!(profile.sweep_grid(TrackEncoding::Mfm, 2.0e-6).len(), 1);
    }

    #[test]
    fn rotation_patterns_cycle() {
        assert_eq!(ROTATION_PATTERNS, [0x55, 0xAA, 0xFF, 0x00]);
        assert_eq!(SURFACE_PATTERNS, [0x00, 0xFF, 0xAA, 0x55]);
    }
}
