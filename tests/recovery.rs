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

    tests/recovery.rs

    Recovery controller scenarios: direct re-reads, PLL sweep recovery of
    skewed media, convergence and plateau behavior, and write-protect
    handling.
*/

mod common;

use fluxrescue::{
    controller::MemoryController,
    flux::synth,
    recovery::{format_disk, recover, RecoveryMode, RecoveryProfile},
    scan::{scan, ScanConfig},
    types::{
        chs::{DiskCh, DiskChs},
        enums::{RecoveryLevel, RecoveryMethod, SectorStatus, TrackEncoding},
    },
    DataRate,
    DiskGeometry,
    DiskRpm,
    JobStatus,
    SectorTable,
    DEFAULT_SAMPLE_HZ,
};

use crate::common::{healthy_disk, index_payload, init, track_raw, ScheduledHealController};

/// A sector whose decode was damaged after the fact comes back Good from a plain re-read of
/// the unmodified flux, with direct provenance.
#[test]
fn damaged_table_entry_recovers_directly() {
    init();
    let geometry = DiskGeometry::pc_1440k();
    let mut drive = healthy_disk(geometry);

    let result = scan(&mut drive, geometry, &ScanConfig::default()).unwrap();
    let mut table = result.table;
    assert_eq!(table.bad_count(), 0);

    // Flip one byte of the decoded payload and mark the sector bad, as if the first decode
    // had gone wrong. The flux itself is untouched.
    let target = DiskChs::new(40, 1, 9);
    let lin = table.linear(target).unwrap();
    table.with_sector_mut(lin, |s| {
        s.status = SectorStatus::Bad;
        s.data_crc_ok = Some(false);
        if let Some(payload) = s.payload.as_mut() {
            payload[17] ^= 0xFF;
        }
    });
    assert_eq!(table.bad_count(), 1);

    // Convergence mode, multi-capture disabled, grid-only tuning: the plain re-read should
    // win before any sweep is needed.
    let mut profile = RecoveryProfile::for_level(RecoveryLevel::Aggressive);
    profile.multi_capture = false;

    let report = recover(&mut drive, &mut table, profile, Some(vec![lin])).unwrap();

    assert_eq!(report.outcome.status, JobStatus::Ok);
    let sector = table.sector(lin).unwrap();
    assert_eq!(sector.status, SectorStatus::Good);
    assert_eq!(sector.recovered_by, Some(RecoveryMethod::Direct));
    assert_eq!(sector.payload.as_deref(), Some(index_payload(512).as_slice()));
    assert_eq!(table.bad_count(), 0);
}

/// Build a two-cylinder HD disk whose media runs at a 2.1µs bit cell (nominal 2.0), with one
/// interval in one sector stretched so the nominal-clock decode miscounts cells while a decode
/// retuned to the real bit cell does not.
fn skewed_disk_with_marginal_sector(
    geometry: DiskGeometry,
    target: DiskChs,
) -> (MemoryController, usize) {
    const SKEWED_CELL_SECS: f64 = 1.05e-6;

    let mut drive = MemoryController::blank(geometry);
    let mut target_lin = 0;

    for c in 0..geometry.cylinders() {
        for h in 0..geometry.heads() {
            let ch = DiskCh::new(c, h);
            let raw = track_raw(&geometry, ch, |_| index_payload(geometry.sector_size()));
            let mut intervals = synth::intervals_from_bits(&raw, SKEWED_CELL_SECS, DEFAULT_SAMPLE_HZ);

            if ch == target.ch() {
                let offsets = common::data_mark_offsets(&geometry, &raw);
                let mark = offsets
                    .iter()
                    .find(|(chs, _)| *chs == target)
                    .map(|(_, m)| *m)
                    .unwrap();
                // Count of transitions before a raw position is the interval index there.
                let payload_start = mark + 64 + 64 * 16;
                let before: usize = raw.iter().take(payload_start).filter(|b| *b).count();
                // Stretch the first three-cell interval inside the payload. The shift lands
                // between the nominal and retuned rounding thresholds.
                let three_cell = (3.0 * SKEWED_CELL_SECS * DEFAULT_SAMPLE_HZ as f64).round() as u32;
                let idx = (before..intervals.len())
                    .find(|&i| intervals[i].abs_diff(three_cell) <= 1)
                    .unwrap();
                intervals[idx] += 33;
                target_lin = target.to_linear(geometry.heads(), geometry.sectors_per_track());
            }

            drive.set_track_intervals(ch.track_index(geometry.heads()), Some(intervals));
        }
    }
    (drive, target_lin)
}

/// Aggressive recovery sweeps the PLL grid and recovers skew-marginal sectors with pll_tuning
/// provenance, in well under five passes.
#[test]
fn aggressive_recovery_retunes_skewed_media() {
    init();
    let geometry = DiskGeometry::new(
        2,
        1,
        18,
        512,
        DiskRpm::Rpm300,
        DataRate::Rate500Kbps,
        TrackEncoding::Mfm,
    )
    .unwrap();
    let target = DiskChs::new(0, 0, 9);
    let (mut drive, target_lin) = skewed_disk_with_marginal_sector(geometry, target);

    let config = ScanConfig {
        encoding: Some(TrackEncoding::Mfm),
        ..ScanConfig::default()
    };
    let result = scan(&mut drive, geometry, &config).unwrap();
    let mut table = result.table;

    // The nominal-clock scan must fail exactly the crafted sector.
    assert_eq!(table.bad_count(), 1, "expected the stretched interval to break one sector");
    assert_eq!(table.sector(target_lin).unwrap().status, SectorStatus::Bad);

    let profile = RecoveryProfile::for_level(RecoveryLevel::Aggressive);
    let report = recover(&mut drive, &mut table, profile, Some(vec![target_lin])).unwrap();

    assert_eq!(report.outcome.status, JobStatus::Ok);
    assert!(report.passes < 5, "took {} passes", report.passes);
    let sector = table.sector(target_lin).unwrap();
    assert!(sector.status.is_readable());
    assert_eq!(sector.recovered_by, Some(RecoveryMethod::PllTuning));
    assert_eq!(sector.payload.as_deref(), Some(index_payload(512).as_slice()));
}

/// Convergence scenario: 42 bad sectors of which 20, 10 and 5 heal on passes one through
/// three and 7 never heal. With quietPasses = 3, the job must stop at pass 6 with 7 bad left.
#[test]
fn convergence_terminates_on_plateaued_bad_count() {
    init();
    let geometry = DiskGeometry::pc_360k();
    let mut drive = ScheduledHealController::new(geometry);

    let mut table = SectorTable::new(geometry);
    for lin in 0..geometry.total_sectors() {
        table.with_sector_mut(lin, |s| {
            s.status = SectorStatus::Good;
            s.payload = Some(index_payload(512));
            s.data_crc_ok = Some(true);
        });
    }

    // 42 damaged sectors on 42 distinct tracks.
    let mut targets = Vec::new();
    for i in 0..42u16 {
        let chs = DiskChs::new(i / 2, (i % 2) as u8, 5);
        let heal_at = match i {
            0..=19 => 1,
            20..=29 => 2,
            30..=34 => 3,
            _ => u32::MAX,
        };
        drive.damage_sector(chs, heal_at);
        let lin = table.linear(chs).unwrap();
        table.with_sector_mut(lin, |s| {
            s.status = SectorStatus::Bad;
            s.data_crc_ok = Some(false);
        });
        targets.push(lin);
    }

    let profile = RecoveryProfile {
        level: RecoveryLevel::Standard,
        mode: RecoveryMode::Convergence {
            max_passes: 50,
            quiet_passes: 3,
        },
        multi_capture: false,
        revolutions_per_capture: 1,
        vote_revolutions: 10,
        pll_tuning: false,
        bit_slip: false,
        surface_treatment: false,
        pll_grid: None,
        fill_byte: 0xE5,
    };

    let report = recover(&mut drive, &mut table, profile, Some(targets)).unwrap();

    assert_eq!(report.pass_history, vec![22, 12, 7, 7, 7, 7]);
    assert_eq!(report.passes, 6);
    assert!(report.converged);
    assert_eq!(report.outcome.status, JobStatus::Partial);
    assert_eq!(table.bad_count(), 7);

    // Bad count is monotonically non-increasing across passes.
    for window in report.pass_history.windows(2) {
        assert!(window[1] <= window[0]);
    }
}

/// Fixed-pass mode runs exactly N passes when sectors stay bad.
#[test]
fn fixed_mode_respects_pass_count() {
    init();
    let geometry = DiskGeometry::pc_360k();
    let mut drive = ScheduledHealController::new(geometry);

    let mut table = SectorTable::new(geometry);
    for lin in 0..geometry.total_sectors() {
        table.with_sector_mut(lin, |s| {
            s.status = SectorStatus::Good;
            s.payload = Some(index_payload(512));
        });
    }

    let chs = DiskChs::new(3, 0, 2);
    drive.damage_sector(chs, u32::MAX);
    let lin = table.linear(chs).unwrap();
    table.with_sector_mut(lin, |s| s.status = SectorStatus::Bad);

    let mut profile = RecoveryProfile::for_level(RecoveryLevel::Standard);
    profile.mode = RecoveryMode::Fixed(4);
    profile.multi_capture = false;

    let report = recover(&mut drive, &mut table, profile, Some(vec![lin])).unwrap();
    assert_eq!(report.passes, 4);
    assert_eq!(report.outcome.status, JobStatus::Partial);
    assert!(!report.converged);
}

/// A write-protected disk fails a format job on the first write, with no further write
/// attempts and the medium untouched.
#[test]
fn format_on_write_protected_disk_fails_cleanly() {
    init();
    let geometry = DiskGeometry::pc_1440k();
    let mut drive = healthy_disk(geometry);
    drive.set_write_protected(true);

    let before: Vec<Option<Vec<u32>>> = (0..geometry.total_tracks())
        .map(|i| drive.track_intervals(i).map(|t| t.to_vec()))
        .collect();

    let outcome = format_disk(&mut drive, geometry, 0xE5).unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.reason.as_deref(), Some("WriteProtected"));
    assert_eq!(drive.write_count(), 0);

    // No track changed.
    for (i, track) in before.iter().enumerate() {
        assert_eq!(drive.track_intervals(i), track.as_deref());
    }
}

/// Write protection discovered during forensic surface treatment disables write strategies but
/// does not abort the read-based recovery job.
#[test]
fn surface_treatment_respects_write_protect() {
    init();
    let geometry = DiskGeometry::new(
        2,
        1,
        9,
        512,
        DiskRpm::Rpm300,
        DataRate::Rate250Kbps,
        TrackEncoding::Mfm,
    )
    .unwrap();
    let mut drive = healthy_disk(geometry);
    drive.set_write_protected(true);

    // Break one sector's flux on the medium itself so read strategies cannot recover it.
    let ch = DiskCh::new(1, 0);
    let raw = track_raw(&geometry, ch, |_| index_payload(512));
    let offsets = common::data_mark_offsets(&geometry, &raw);
    let mut broken = raw.clone();
    common::corrupt_sector_payload(&mut broken, offsets[3].1);
    let intervals = synth::intervals_from_bits(
        &broken,
        geometry.encoding().cell_period(geometry.bit_cell_secs()),
        DEFAULT_SAMPLE_HZ,
    );
    drive.set_track_intervals(ch.track_index(geometry.heads()), Some(intervals));

    let result = scan(&mut drive, geometry, &ScanConfig::default()).unwrap();
    let mut table = result.table;
    assert_eq!(table.bad_count(), 1);

    let mut profile = RecoveryProfile::for_level(RecoveryLevel::Forensic);
    profile.mode = RecoveryMode::Convergence {
        max_passes: 6,
        quiet_passes: 2,
    };

    let report = recover(&mut drive, &mut table, profile, None).unwrap();

    // The job finishes partial rather than failed; the sector stays bad and nothing was
    // written to the medium.
    assert_eq!(report.outcome.status, JobStatus::Partial);
    assert_eq!(table.bad_count(), 1);
    assert_eq!(drive.write_count(), 0);
}
