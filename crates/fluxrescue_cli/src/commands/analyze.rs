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

use std::fs::File;

use anyhow::{Context, Result};
use fluxrescue::{
    flux::analyzer,
    file_formats::scp::ScpImage,
    types::enums::TrackGrade,
};
use serde::Serialize;

use crate::args::AnalyzeParams;

#[derive(Serialize)]
struct PeakReport {
    mean_ns: f64,
    sigma_ns: f64,
    weight: u32,
}

#[derive(Serialize)]
struct TrackAnalysisReport {
    track: usize,
    revolutions: usize,
    encoding: Option<String>,
    encoding_confidence: f64,
    peaks: Vec<PeakReport>,
    jitter_ns: f64,
    jitter_pct: f64,
    snr_db: f64,
    quality: f64,
    grade: String,
}

#[derive(Serialize)]
struct AnalysisReport {
    source: String,
    tracks: Vec<TrackAnalysisReport>,
    disk_score: u32,
}

pub fn run(params: &AnalyzeParams) -> Result<i32> {
    let mut input =
        File::open(&params.in_file).with_context(|| format!("opening {}", params.in_file.display()))?;
    let scp = ScpImage::read(&mut input, fluxrescue::DEFAULT_SAMPLE_HZ)?;

    let mut tracks = Vec::new();
    let mut score_sum = 0.0;
    for (track_number, slot) in scp.tracks.iter().enumerate() {
        let Some(capture) = slot else {
            continue;
        };
        let analysis = analyzer::analyze_capture(capture);
        score_sum += analysis.quality;
        tracks.push(TrackAnalysisReport {
            track: track_number,
            revolutions: capture.revolutions(),
            encoding: analysis.encoding.map(|e| e.to_string()),
            encoding_confidence: analysis.encoding_confidence,
            peaks: analysis
                .peaks
                .iter()
                .map(|p| PeakReport {
                    mean_ns: p.mean_ns,
                    sigma_ns: p.sigma_ns,
                    weight: p.weight,
                })
                .collect(),
            jitter_ns: analysis.jitter_ns,
            jitter_pct: analysis.jitter_pct,
            snr_db: analysis.snr_db,
            quality: analysis.quality,
            grade: TrackGrade::from_score(analysis.quality).to_string(),
        });
    }

    let disk_score = if tracks.is_empty() {
        0
    }
    else {
        (score_sum / tracks.len() as f64).round() as u32
    };

    let report = AnalysisReport {
        source: params.in_file.display().to_string(),
        tracks,
        disk_score,
    };

    let out = File::create(&params.out).with_context(|| format!("creating {}", params.out.display()))?;
    serde_json::to_writer_pretty(out, &report)?;
    println!("analyze: {} track(s), disk score {}", report.tracks.len(), report.disk_score);
    Ok(0)
}
