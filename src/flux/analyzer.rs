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

    src/flux/analyzer.rs

    Flux timing analysis: interval histogram, Gaussian peak fitting, jitter,
    SNR, encoding detection and the per-track quality score. Used to initialize
    the PLL, classify unknown media, and grade tracks for reporting.
*/

use crate::{flux::capture::FluxCapture, types::enums::TrackEncoding};

/// Histogram bin width over interval durations.
pub const HISTOGRAM_BIN_NS: f64 = 50.0;

/// The most peaks a fit will report.
pub const MAX_PEAKS: usize = 5;

/// Fraction of total population a bin must hold to qualify as a peak candidate.
const PEAK_THRESHOLD: f64 = 0.005;

/// Candidate peaks closer together than this many bins are merged into the stronger one.
const PEAK_MIN_SEPARATION_BINS: usize = 3;

/// Floor applied to within-peak deviation so perfectly-timed synthetic flux does not divide
/// by zero.
const MIN_SIGMA_NS: f64 = 0.5;

/// A fixed-width histogram of flux interval durations.
pub struct FluxHistogram {
    bin_width_ns: f64,
    counts: Vec<u32>,
}

impl FluxHistogram {
    pub fn from_capture(capture: &FluxCapture) -> FluxHistogram {
        Self::from_intervals(capture.intervals(), capture.sample_hz())
    }

    pub fn from_intervals(intervals: &[u32], sample_hz: u32) -> FluxHistogram {
        let tick_ns = 1.0e9 / sample_hz as f64;
        let max_ns = intervals.iter().map(|&t| t as f64 * tick_ns).fold(0.0, f64::max);
        let bin_ct = (max_ns / HISTOGRAM_BIN_NS).ceil() as usize + 1;
        let mut counts = vec![0u32; bin_ct.max(1)];

        for &t in intervals {
            let ns = t as f64 * tick_ns;
            let bin = (ns / HISTOGRAM_BIN_NS) as usize;
            counts[bin.min(bin_ct - 1)] += 1;
        }

        FluxHistogram {
            bin_width_ns: HISTOGRAM_BIN_NS,
            counts,
        }
    }

    pub fn bin_width_ns(&self) -> f64 {
        self.bin_width_ns
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn bin_center_ns(&self, bin: usize) -> f64 {
        (bin as f64 + 0.5) * self.bin_width_ns
    }

    /// Locate local maxima by bin, strongest first, with a population threshold and a minimum
    /// separation between accepted candidates.
    fn find_local_maxima(&self) -> Vec<usize> {
        let total: u64 = self.counts.iter().map(|&c| c as u64).sum();
        let threshold = ((total as f64) * PEAK_THRESHOLD).round().max(1.0) as u32;

        let mut candidates = Vec::new();
        for i in 0..self.counts.len() {
            let prev = if i > 0 { self.counts[i - 1] } else { 0 };
            let next = if i + 1 < self.counts.len() { self.counts[i + 1] } else { 0 };
            if self.counts[i] >= prev && self.counts[i] > next && self.counts[i] >= threshold {
                candidates.push(i);
            }
        }
        candidates.sort_by(|&a, &b| self.counts[b].cmp(&self.counts[a]).then(a.cmp(&b)));

        let mut accepted: Vec<usize> = Vec::new();
        for bin in candidates {
            if accepted.len() >= MAX_PEAKS {
                break;
            }
            if accepted
                .iter()
                .all(|&a| a.abs_diff(bin) >= PEAK_MIN_SEPARATION_BINS)
            {
                accepted.push(bin);
            }
        }
        accepted
    }
}

/// A fitted Gaussian timing peak.
#[derive(Copy, Clone, Debug)]
pub struct FluxPeak {
    pub mean_ns: f64,
    pub sigma_ns: f64,
    /// Number of intervals attributed to this peak's fit window.
    pub weight: u32,
}

/// The full analysis product for one capture.
pub struct FluxAnalysis {
    pub histogram: FluxHistogram,
    /// Fitted peaks in ascending order of position.
    pub peaks: Vec<FluxPeak>,
    pub encoding: Option<TrackEncoding>,
    pub encoding_confidence: f64,
    /// RMS deviation of intervals from their nearest peak.
    pub jitter_ns: f64,
    /// Jitter as a percentage of the shortest (2T) peak position.
    pub jitter_pct: f64,
    pub snr_db: f64,
    /// Composite quality score, 0-100.
    pub quality: f64,
}

pub fn analyze_capture(capture: &FluxCapture) -> FluxAnalysis {
    analyze_intervals(capture.intervals(), capture.sample_hz())
}

pub fn analyze_intervals(intervals: &[u32], sample_hz: u32) -> FluxAnalysis {
    let histogram = FluxHistogram::from_intervals(intervals, sample_hz);
    let tick_ns = 1.0e9 / sample_hz as f64;
    let intervals_ns: Vec<f64> = intervals.iter().map(|&t| t as f64 * tick_ns).collect();

    let mut peaks: Vec<FluxPeak> = histogram
        .find_local_maxima()
        .iter()
        .map(|&bin| fit_peak(&intervals_ns, &histogram, bin))
        .collect();
    peaks.sort_by(|a, b| a.mean_ns.total_cmp(&b.mean_ns));

    let (encoding, encoding_confidence) = classify_encoding(&peaks);

    let (jitter_ns, jitter_pct) = jitter(&intervals_ns, &peaks);
    let snr_db = snr(&peaks);
    let quality = quality_score(&peaks, jitter_pct, snr_db);

    log::debug!(
        "analyze_intervals(): {} intervals, {} peaks, encoding: {:?} ({:.2}), jitter: {:.1}ns ({:.2}%), SNR: {:.1}dB, quality: {:.1}",
        intervals.len(),
        peaks.len(),
        encoding,
        encoding_confidence,
        jitter_ns,
        jitter_pct,
        snr_db,
        quality
    );

    FluxAnalysis {
        histogram,
        peaks,
        encoding,
        encoding_confidence,
        jitter_ns,
        jitter_pct,
        snr_db,
        quality,
    }
}

/// Two-parameter (µ, σ) fit of a single peak: sample moments over a ±3σ window around the
/// candidate bin, iterated to let the window follow the estimate. Moments are taken over the
/// raw intervals, not bin centers, so clean captures fit with zero residual.
fn fit_peak(intervals_ns: &[f64], histogram: &FluxHistogram, bin: usize) -> FluxPeak {
    let mut mean = histogram.bin_center_ns(bin);
    let mut sigma = histogram.bin_width_ns();
    let mut weight = 0u32;

    for _ in 0..3 {
        let half_window = (3.0 * sigma).max(histogram.bin_width_ns());
        let (lo, hi) = (mean - half_window, mean + half_window);

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut n = 0u32;
        for &ns in intervals_ns {
            if ns >= lo && ns <= hi {
                sum += ns;
                sum_sq += ns * ns;
                n += 1;
            }
        }
        if n == 0 {
            break;
        }
        mean = sum / n as f64;
        let var = (sum_sq / n as f64 - mean * mean).max(0.0);
        sigma = var.sqrt().max(MIN_SIGMA_NS);
        weight = n;
    }

    FluxPeak {
        mean_ns: mean,
        sigma_ns: sigma,
        weight,
    }
}

/// Classify the encoding from peak position ratios: three peaks at 2:3:4 within ±10% are MFM,
/// two at 1:2 are FM, four or more inside a narrow band are GCR. Amiga MFM shares cell timing
/// with MFM and cannot be distinguished at the flux level.
fn classify_encoding(peaks: &[FluxPeak]) -> (Option<TrackEncoding>, f64) {
    match peaks.len() {
        3 => {
            let base = peaks[0].mean_ns / 2.0;
            let errs = [
                relative_error(peaks[0].mean_ns, 2.0 * base),
                relative_error(peaks[1].mean_ns, 3.0 * base),
                relative_error(peaks[2].mean_ns, 4.0 * base),
            ];
            let max_err = errs.iter().fold(0.0f64, |a, &b| a.max(b));
            if max_err <= 0.10 {
                (Some(TrackEncoding::Mfm), 1.0 - max_err / 0.10 * 0.5)
            }
            else {
                (None, 0.0)
            }
        }
        2 => {
            let err = relative_error(peaks[1].mean_ns, 2.0 * peaks[0].mean_ns);
            if err <= 0.10 {
                (Some(TrackEncoding::Fm), 1.0 - err / 0.10 * 0.5)
            }
            else {
                (None, 0.0)
            }
        }
        n if n >= 4 => {
            let lo = peaks[0].mean_ns;
            let hi = peaks[n - 1].mean_ns;
            if lo > 0.0 && (hi - lo) / lo < 1.5 {
                (Some(TrackEncoding::Gcr), 0.75)
            }
            else {
                (None, 0.0)
            }
        }
        _ => (None, 0.0),
    }
}

fn relative_error(actual: f64, expected: f64) -> f64 {
    if expected == 0.0 {
        return 1.0;
    }
    (actual - expected).abs() / expected
}

/// RMS deviation of each interval from the nearest peak, in ns and as a percentage of the 2T
/// (shortest) peak position.
fn jitter(intervals_ns: &[f64], peaks: &[FluxPeak]) -> (f64, f64) {
    if peaks.is_empty() || intervals_ns.is_empty() {
        return (0.0, 0.0);
    }

    let mut sum_sq = 0.0;
    for &ns in intervals_ns {
        let nearest = peaks
            .iter()
            .map(|p| (ns - p.mean_ns).abs())
            .fold(f64::MAX, f64::min);
        sum_sq += nearest * nearest;
    }
    let rms = (sum_sq / intervals_ns.len() as f64).sqrt();
    let two_t = peaks[0].mean_ns;
    let pct = if two_t > 0.0 { rms / two_t * 100.0 } else { 0.0 };
    (rms, pct)
}

/// `20·log10(σ_between_peaks / σ_within_peaks)`.
fn snr(peaks: &[FluxPeak]) -> f64 {
    if peaks.len() < 2 {
        return 0.0;
    }
    let mean_of_means = peaks.iter().map(|p| p.mean_ns).sum::<f64>() / peaks.len() as f64;
    let between_var = peaks
        .iter()
        .map(|p| (p.mean_ns - mean_of_means).powi(2))
        .sum::<f64>()
        / peaks.len() as f64;
    let within_rms = (peaks.iter().map(|p| p.sigma_ns * p.sigma_ns).sum::<f64>() / peaks.len() as f64)
        .sqrt()
        .max(MIN_SIGMA_NS);

    20.0 * (between_var.sqrt() / within_rms).log10()
}

/// Weighted composite: 0.4·SNR + 0.4·jitter term + 0.2·peak separation, each term clamped
/// to [0, 100].
fn quality_score(peaks: &[FluxPeak], jitter_pct: f64, snr_db: f64) -> f64 {
    // 40dB of separation-to-spread is as clean as real media gets.
    let snr_norm = (snr_db * 2.5).clamp(0.0, 100.0);
    let jitter_term = (100.0 - jitter_pct * 5.0).clamp(0.0, 100.0);

    let sep_norm = if peaks.len() >= 2 {
        let min_gap = peaks
            .windows(2)
            .map(|w| w[1].mean_ns - w[0].mean_ns)
            .fold(f64::MAX, f64::min);
        let mean_sigma = (peaks.iter().map(|p| p.sigma_ns).sum::<f64>() / peaks.len() as f64).max(MIN_SIGMA_NS);
        // Adjacent peaks six sigmas apart do not overlap.
        (min_gap / (6.0 * mean_sigma) * 100.0).clamp(0.0, 100.0)
    }
    else {
        0.0
    };

    0.4 * snr_norm + 0.4 * jitter_term + 0.2 * sep_norm
}
