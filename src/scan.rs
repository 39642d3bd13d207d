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

    src/scan.rs

    The full-disk read pipeline: walk the geometry in snake order, capture and
    decode each track, and populate the sector table, with typed progress
    events and track-boundary cancellation.
*/

use crate::{
    bitstream::BitStream,
    codec::{self, codec_for, DecodedSector},
    controller::{retry_once, FloppyController},
    events::{CancelToken, EngineEvent, EventSink},
    flux::{analyzer, capture::FluxCapture, pll::{Pll, PllConfig}},
    sector_map::{Sector, SectorTable},
    types::{
        chs::DiskCh,
        enums::{ScanMode, SectorStatus, TrackEncoding},
        geometry::DiskGeometry,
    },
    FluxError,
    JobError,
    JobOutcome,
    JobStatistics,
};

/// A data-CRC-valid sector below this mean cell confidence is recorded `Weak` rather than
/// `Good`.
pub const WEAK_CONFIDENCE: f32 = 0.70;

#[derive(Clone, Debug, Default)]
pub struct ScanConfig {
    pub mode: ScanMode,
    /// Override the mode's revolution count.
    pub revolutions: Option<u8>,
    /// Fixed encoding; `None` runs detection on cylinder 0 head 0 and freezes the result.
    pub encoding: Option<TrackEncoding>,
}

pub struct ScanResult {
    pub table: SectorTable,
    pub outcome: JobOutcome,
    /// The encoding used, whether configured or detected.
    pub encoding: TrackEncoding,
    /// Analyzer quality score per track index, for tracks that were visited.
    pub track_scores: Vec<Option<f64>>,
    /// Retained captures per track index (forensic mode only).
    pub retained_flux: Vec<Option<FluxCapture>>,
}

/// Executes full-disk reads against a controller. The orchestrator owns the handle for the
/// duration of the job; the table is never shared while a scan mutates it.
pub struct ScanOrchestrator<'a> {
    controller: &'a mut dyn FloppyController,
    sink: &'a dyn EventSink,
    cancel: CancelToken,
}

impl<'a> ScanOrchestrator<'a> {
    pub fn new(
        controller: &'a mut dyn FloppyController,
        sink: &'a dyn EventSink,
        cancel: CancelToken,
    ) -> ScanOrchestrator<'a> {
        ScanOrchestrator {
            controller,
            sink,
            cancel,
        }
    }

    pub fn run(&mut self, geometry: DiskGeometry, config: &ScanConfig) -> Result<ScanResult, JobError> {
        let mut table = SectorTable::new(geometry);
        let mut track_scores: Vec<Option<f64>> = vec![None; geometry.total_tracks()];
        let mut retained_flux: Vec<Option<FluxCapture>> = vec![None; geometry.total_tracks()];

        let revolutions = config.revolutions.unwrap_or(config.mode.revolutions());

        if let Err(e) = self.controller.set_motor(true) {
            return Ok(failed_result(table, track_scores, retained_flux, geometry.encoding(), e));
        }

        // Resolve the encoding up front: configured, or detected once on cylinder 0 head 0 and
        // frozen for the whole scan.
        let encoding = match config.encoding {
            Some(encoding) => encoding,
            None => match self.detect_encoding(geometry) {
                Ok(encoding) => encoding,
                Err(e) => {
                    return Ok(failed_result(table, track_scores, retained_flux, geometry.encoding(), e));
                }
            },
        };
        log::debug!("ScanOrchestrator::run(): scanning with encoding {}", encoding);

        let mut cancelled = false;
        let mut tracks_visited = 0u32;
        'tracks: for ch in scan_order(geometry, config.mode) {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break 'tracks;
            }

            self.sink.on_event(&EngineEvent::TrackStarted { ch });

            let capture = match self.read_track(ch, revolutions) {
                Ok(capture) => capture,
                Err(e) => {
                    let outcome = JobOutcome::failed(e.to_string(), statistics(&table, tracks_visited));
                    self.controller.set_motor(false).ok();
                    return Ok(ScanResult {
                        table,
                        outcome,
                        encoding,
                        track_scores,
                        retained_flux,
                    });
                }
            };

            tracks_visited += 1;
            let index = ch.track_index(geometry.heads());
            let analysis = analyzer::analyze_capture(&capture);
            track_scores[index] = Some(analysis.quality);

            decode_into_table(&mut table, &capture, encoding, geometry, ch, 0, Some(self.sink));

            if config.mode.retains_flux() {
                retained_flux[index] = Some(capture);
            }

            self.sink.on_event(&EngineEvent::TrackCompleted {
                ch,
                good: table.good_count(),
                bad: table.bad_count(),
                weak: table.weak_count(),
            });
        }

        self.controller.set_motor(false).ok();

        let stats = statistics(&table, tracks_visited);
        let outcome = if cancelled {
            JobOutcome::partial("cancelled", stats)
        }
        else if table.bad_count() > 0 || table.count(SectorStatus::Unread) > 0 {
            JobOutcome::partial("bad or unread sectors remain", stats)
        }
        else {
            JobOutcome::ok(stats)
        };

        Ok(ScanResult {
            table,
            outcome,
            encoding,
            track_scores,
            retained_flux,
        })
    }

    fn detect_encoding(&mut self, geometry: DiskGeometry) -> Result<TrackEncoding, crate::ControllerError> {
        retry_once(|| self.controller.seek(DiskCh::new(0, 0)))?;
        let capture = retry_once(|| self.controller.read_flux(1))?;
        let (detected, confidence) = codec::detect(&capture);
        match detected {
            Some(encoding) => {
                log::debug!(
                    "ScanOrchestrator::detect_encoding(): detected {} ({:.2})",
                    encoding,
                    confidence
                );
                // Flux timing cannot tell Amiga MFM from IBM MFM; trust the geometry there.
                if encoding == TrackEncoding::Mfm && geometry.encoding() == TrackEncoding::AmigaMfm {
                    Ok(TrackEncoding::AmigaMfm)
                }
                else {
                    Ok(encoding)
                }
            }
            None => {
                log::warn!(
                    "ScanOrchestrator::detect_encoding(): detection inconclusive, using geometry default {}",
                    geometry.encoding()
                );
                Ok(geometry.encoding())
            }
        }
    }

    fn read_track(&mut self, ch: DiskCh, revolutions: u8) -> Result<FluxCapture, crate::ControllerError> {
        retry_once(|| self.controller.seek(ch))?;
        retry_once(|| self.controller.read_flux(revolutions))
    }
}

/// Decode every revolution of a capture and merge the results into the table. Returns the
/// number of sectors that merged as readable. `pass` stamps `last_successful_pass` for
/// recovery bookkeeping.
pub fn decode_into_table(
    table: &mut SectorTable,
    capture: &FluxCapture,
    encoding: TrackEncoding,
    geometry: DiskGeometry,
    ch: DiskCh,
    pass: u32,
    sink: Option<&dyn EventSink>,
) -> usize {
    let pll = Pll::new(PllConfig::new(encoding, geometry.data_rate()));
    let codec = codec_for(encoding);
    let mut readable = 0usize;

    let mut any_decoded = false;
    for rev in capture.revolution_iter() {
        let stream = match pll.decode(&rev, true) {
            Ok(result) => result.stream,
            Err(FluxError::DecodeAbort) => {
                log::debug!("decode_into_table(): {} PLL abort, skipping revolution", ch);
                continue;
            }
            Err(e) => {
                log::warn!("decode_into_table(): {} flux error: {}", ch, e);
                continue;
            }
        };

        match codec.decode_track(&stream, &geometry, ch) {
            Ok(decoded) => {
                any_decoded = true;
                for sector in decoded.sectors {
                    let candidate = sector_from_decode(&sector, pass);
                    let status = candidate.status;
                    let chs = candidate.id;
                    let Some(lin) = table.linear(chs) else {
                        log::warn!("decode_into_table(): {} decoded out-of-geometry id {}", ch, chs);
                        continue;
                    };
                    if table.merge(lin, candidate) && status.is_readable() {
                        readable += 1;
                    }
                    if let Some(sink) = sink {
                        sink.on_event(&EngineEvent::SectorDecoded { chs, status });
                    }
                }
            }
            Err(_) => {
                // NoAddressMarks is track-local: the revolution contributes nothing.
                any_decoded = true;
                log::debug!("decode_into_table(): {} no address marks in revolution", ch);
            }
        }
    }

    // Anything this visited track never produced an ID for is missing, not unread.
    if any_decoded {
        for lin in table.track_addresses(ch.c(), ch.h()) {
            table.with_sector_mut(lin, |s| {
                if s.status == SectorStatus::Unread {
                    s.status = SectorStatus::Missing;
                }
            });
        }
    }

    readable
}

/// Decode an already-materialized bitstream (e.g. from an HFE image) and merge the results.
pub fn decode_stream_into_table(
    table: &mut SectorTable,
    stream: &BitStream,
    encoding: TrackEncoding,
    geometry: DiskGeometry,
    ch: DiskCh,
) -> usize {
    let codec = codec_for(encoding);
    let mut readable = 0usize;

    match codec.decode_track(stream, &geometry, ch) {
        Ok(decoded) => {
            for sector in decoded.sectors {
                let candidate = sector_from_decode(&sector, 0);
                let readable_candidate = candidate.status.is_readable();
                let Some(lin) = table.linear(candidate.id) else {
                    log::warn!("decode_stream_into_table(): {} out-of-geometry id {}", ch, candidate.id);
                    continue;
                };
                if table.merge(lin, candidate) && readable_candidate {
                    readable += 1;
                }
            }
        }
        Err(_) => {
            log::debug!("decode_stream_into_table(): {} no address marks", ch);
        }
    }

    for lin in table.track_addresses(ch.c(), ch.h()) {
        table.with_sector_mut(lin, |s| {
            if s.status == SectorStatus::Unread {
                s.status = SectorStatus::Missing;
            }
        });
    }
    readable
}

/// Map a codec decode onto a sector-table candidate.
pub(crate) fn sector_from_decode(decoded: &DecodedSector, pass: u32) -> Sector {
    let status = if !decoded.header_crc_ok {
        SectorStatus::HeaderCrc
    }
    else {
        match decoded.data_crc_ok {
            None => SectorStatus::NoAddress,
            Some(false) => SectorStatus::Bad,
            Some(true) => {
                if decoded.deleted {
                    SectorStatus::Deleted
                }
                else if decoded.confidence < WEAK_CONFIDENCE {
                    SectorStatus::Weak
                }
                else {
                    SectorStatus::Good
                }
            }
        }
    };

    Sector {
        id: decoded.chs,
        status,
        payload: (!decoded.payload.is_empty()).then(|| decoded.payload.clone()),
        header_crc_ok: Some(decoded.header_crc_ok),
        data_crc_ok: decoded.data_crc_ok,
        quality: decoded.confidence,
        read_count: 0,
        last_successful_pass: if status.is_readable() { pass } else { 0 },
        recovered_by: None,
    }
}

/// The track visit order for a scan: ascending cylinders, with head order alternating per
/// cylinder so consecutive tracks never require a long reposition. Quick mode samples five
/// cylinders across the disk.
pub(crate) fn scan_order(geometry: DiskGeometry, mode: ScanMode) -> Vec<DiskCh> {
    let c = geometry.cylinders();
    let cylinders: Vec<u16> = match mode {
        ScanMode::Quick => {
            let mut samples = vec![0, c / 4, c / 2, c * 3 / 4, c.saturating_sub(1)];
            samples.dedup();
            samples
        }
        _ => (0..c).collect(),
    };

    let heads = geometry.heads();
    let mut order = Vec::with_capacity(cylinders.len() * heads as usize);
    for (i, &cyl) in cylinders.iter().enumerate() {
        if i % 2 == 0 {
            for h in 0..heads {
                order.push(DiskCh::new(cyl, h));
            }
        }
        else {
            for h in (0..heads).rev() {
                order.push(DiskCh::new(cyl, h));
            }
        }
    }
    order
}

fn statistics(table: &SectorTable, tracks_visited: u32) -> JobStatistics {
    JobStatistics {
        tracks_visited,
        sectors_good: table.good_count(),
        sectors_bad: table.bad_count(),
        sectors_weak: table.weak_count(),
        passes: 0,
    }
}

fn failed_result(
    table: SectorTable,
    track_scores: Vec<Option<f64>>,
    retained_flux: Vec<Option<FluxCapture>>,
    encoding: TrackEncoding,
    error: crate::ControllerError,
) -> ScanResult {
    let stats = statistics(&table, 0);
    ScanResult {
        outcome: JobOutcome::failed(error.to_string(), stats),
        table,
        encoding,
        track_scores,
        retained_flux,
    }
}

/// Convenience wrapper: scan with a null sink and no cancellation.
pub fn scan(
    controller: &mut dyn FloppyController,
    geometry: DiskGeometry,
    config: &ScanConfig,
) -> Result<ScanResult, JobError> {
    let sink = crate::events::NullEventSink;
    let mut orchestrator = ScanOrchestrator::new(controller, &sink, CancelToken::new());
    orchestrator.run(geometry, config)
}
