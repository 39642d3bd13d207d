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

    src/quality.rs

    Reporting data: track grades from analyzer scores, the overall disk score,
    error category tallies and the status heat map a UI renders.
*/

use strum::IntoEnumIterator;

use crate::{
    sector_map::SectorTable,
    types::{
        chs::DiskCh,
        enums::{ErrorCategory, SectorStatus, TrackGrade},
    },
};

#[derive(Clone, Debug)]
pub struct TrackReport {
    pub ch: DiskCh,
    pub score: f64,
    pub grade: TrackGrade,
}

/// The aggregate reporting product for one disk session.
#[derive(Clone, Debug)]
pub struct DiskReport {
    pub tracks: Vec<TrackReport>,
    /// Rounded mean of per-track scores.
    pub disk_score: u32,
    pub error_counts: Vec<(ErrorCategory, usize)>,
    /// Rows are cylinders; columns are sectors across both heads in (head, sector) order.
    pub heat_map: Vec<Vec<SectorStatus>>,
}

impl DiskReport {
    /// Build a report from the sector table and the per-track analyzer scores gathered during
    /// the scan. Tracks with no analysis (skipped by quick mode) are excluded from the mean.
    pub fn build(table: &SectorTable, track_scores: &[Option<f64>]) -> DiskReport {
        let geometry = table.geometry();

        let mut tracks = Vec::new();
        let mut score_sum = 0.0;
        let mut score_ct = 0usize;

        for c in 0..geometry.cylinders() {
            for h in 0..geometry.heads() {
                let index = DiskCh::new(c, h).track_index(geometry.heads());
                if let Some(Some(score)) = track_scores.get(index) {
                    tracks.push(TrackReport {
                        ch: DiskCh::new(c, h),
                        score: *score,
                        grade: TrackGrade::from_score(*score),
                    });
                    score_sum += *score;
                    score_ct += 1;
                }
            }
        }

        let disk_score = if score_ct > 0 {
            (score_sum / score_ct as f64).round() as u32
        }
        else {
            0
        };

        let mut error_counts: Vec<(ErrorCategory, usize)> =
            ErrorCategory::iter().map(|c| (c, 0usize)).collect();
        for sector in table.iter() {
            if let Some(category) = ErrorCategory::from_status(sector.status) {
                if let Some(entry) = error_counts.iter_mut().find(|(c, _)| *c == category) {
                    entry.1 += 1;
                }
            }
        }

        let columns = geometry.heads() as usize * geometry.sectors_per_track() as usize;
        let mut heat_map = vec![vec![SectorStatus::Unread; columns]; geometry.cylinders() as usize];
        for (lin, sector) in table.iter().enumerate() {
            let row = lin / columns;
            let col = lin % columns;
            heat_map[row][col] = sector.status;
        }

        DiskReport {
            tracks,
            disk_score,
            error_counts,
            heat_map,
        }
    }

    pub fn error_count(&self, category: ErrorCategory) -> usize {
        self.error_counts
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}
