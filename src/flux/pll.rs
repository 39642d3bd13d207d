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

    src/flux/pll.rs

    The software phase-locked loop. Converts a flux interval stream into a raw
    bitstream by tracking a variable cell clock, optionally emitting a per-bit
    confidence estimate for weak-bit voting.
*/

use crate::{
    bitstream::BitStream,
    flux::{capture::RevolutionView, FluxStats},
    format_us,
    types::enums::{DataRate, TrackEncoding},
    FluxError,
};

/// Pull range of the cell clock around the configured nominal, matching the narrow capture
/// range of a hardware data separator. Media skewed further than this needs a retuned
/// `bit_cell_secs`, not more loop gain.
const MAX_PERIOD_ADJUST: f64 = 0.025;

/// Width of the moving window over which clamp violations are tallied.
const ABORT_WINDOW: usize = 1024;

pub const PERIOD_GAIN_RANGE: std::ops::RangeInclusive<f64> = 0.01..=0.15;
pub const PHASE_GAIN_RANGE: std::ops::RangeInclusive<f64> = 0.2..=0.9;

pub const DEFAULT_PERIOD_GAIN: f64 = 0.05;
pub const DEFAULT_PHASE_GAIN: f64 = 0.6;

/// PLL tuning parameters. `bit_cell_secs` is the nominal *data* bit-cell time; MFM and FM pack
/// two raw cells into every data bit, so the cell clock the loop tracks runs at half this period.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PllConfig {
    pub bit_cell_secs: f64,
    /// Period (clock) tracking gain, α.
    pub period_gain: f64,
    /// Phase tracking gain, β.
    pub phase_gain: f64,
    pub encoding: TrackEncoding,
}

impl Default for PllConfig {
    fn default() -> Self {
        PllConfig {
            bit_cell_secs: DataRate::Rate250Kbps.bit_cell_secs(),
            period_gain: DEFAULT_PERIOD_GAIN,
            phase_gain: DEFAULT_PHASE_GAIN,
            encoding: TrackEncoding::Mfm,
        }
    }
}

impl PllConfig {
    pub fn new(encoding: TrackEncoding, rate: DataRate) -> PllConfig {
        PllConfig {
            bit_cell_secs: rate.bit_cell_secs(),
            period_gain: DEFAULT_PERIOD_GAIN,
            phase_gain: DEFAULT_PHASE_GAIN,
            encoding,
        }
    }

    pub fn with_bit_cell_secs(mut self, bit_cell_secs: f64) -> PllConfig {
        self.bit_cell_secs = bit_cell_secs;
        self
    }

    pub fn with_gains(mut self, period_gain: f64, phase_gain: f64) -> PllConfig {
        self.period_gain = period_gain;
        self.phase_gain = phase_gain;
        self
    }

    /// Clamp both gains into their stable ranges.
    pub fn clamped(mut self) -> PllConfig {
        self.period_gain = self.period_gain.clamp(*PERIOD_GAIN_RANGE.start(), *PERIOD_GAIN_RANGE.end());
        self.phase_gain = self.phase_gain.clamp(*PHASE_GAIN_RANGE.start(), *PHASE_GAIN_RANGE.end());
        self
    }
}

pub struct PllDecodeResult {
    pub stream: BitStream,
    pub stats: FluxStats,
}

/// A software PLL. The decode state is local to each call, so a single `Pll` may be reused
/// across revolutions and always produces identical output for identical input.
pub struct Pll {
    config: PllConfig,
}

impl Pll {
    pub fn new(config: PllConfig) -> Pll {
        Pll {
            config: config.clamped(),
        }
    }

    pub fn config(&self) -> &PllConfig {
        &self.config
    }

    /// Decode one revolution of flux into a raw bitstream.
    ///
    /// Each interval `δ` is converted to a cell count `n` against the tracked cell clock `T`,
    /// emitting `n - 1` zero bits and a one bit. Phase and period follow the transition with
    /// gains β and α. With `emit_confidence`, every emitted bit carries `1 - |e_φ|/T`.
    ///
    /// Fails with `DecodeAbort` only if the cell-count clamp is violated on a majority of the
    /// intervals within a moving window of 1024.
    pub fn decode(&self, rev: &RevolutionView, emit_confidence: bool) -> Result<PllDecodeResult, FluxError> {
        let cell_range = self.config.encoding.cell_range();
        let min_cells = *cell_range.start() as i64;
        let max_cells = *cell_range.end() as i64;

        let nominal_period = self.config.encoding.cell_period(self.config.bit_cell_secs);
        let min_period = nominal_period - (nominal_period * MAX_PERIOD_ADJUST);
        let max_period = nominal_period + (nominal_period * MAX_PERIOD_ADJUST);

        let mut period = nominal_period;
        let mut phase: f64 = 0.0;

        // Estimate ~2.6 cells per transition for capacity.
        let mut stream = BitStream::with_capacity(rev.len() * 3, emit_confidence);

        let mut violation_window = [false; ABORT_WINDOW];
        let mut violation_ct: usize = 0;
        let mut window_cursor: usize = 0;
        let mut window_filled = false;

        let mut stats = FluxStats {
            total: rev.len() as u32,
            shortest_flux: f64::MAX,
            ..FluxStats::default()
        };

        for delta in rev.delta_iter() {
            stats.shortest_flux = delta.min(stats.shortest_flux);
            stats.longest_flux = delta.max(stats.longest_flux);

            // Phase-correct the interval, then estimate how many cell clocks elapsed.
            let adjusted = delta - phase;
            let ideal = adjusted / period;
            let rounded = ideal.round() as i64;

            let violated = rounded < min_cells || rounded > max_cells;
            let cells = rounded.clamp(min_cells, max_cells);

            if rounded < min_cells {
                stats.too_short += 1;
            }
            else if rounded > max_cells {
                stats.too_long += 1;
            }
            match cells - min_cells {
                0 => stats.short += 1,
                1 => stats.medium += 1,
                _ => stats.long += 1,
            }

            // Tally the clamp violation into the moving window and abort on a majority.
            if window_filled && violation_window[window_cursor] {
                violation_ct -= 1;
            }
            violation_window[window_cursor] = violated;
            if violated {
                violation_ct += 1;
            }
            window_cursor += 1;
            if window_cursor == ABORT_WINDOW {
                window_cursor = 0;
                window_filled = true;
            }
            if window_filled && violation_ct * 2 > ABORT_WINDOW {
                log::debug!(
                    "Pll::decode(): {} clamp violations in a window of {}, aborting. T: {}",
                    violation_ct,
                    ABORT_WINDOW,
                    format_us!(period)
                );
                return Err(FluxError::DecodeAbort);
            }

            // Phase error is the residue after the elected cell count.
            let expected = cells as f64 * period;
            let phase_error = adjusted - expected;

            let confidence = if emit_confidence {
                (1.0 - (phase_error.abs() / period)).clamp(0.0, 1.0) as f32
            }
            else {
                1.0
            };

            for _ in 0..cells - 1 {
                stream.push(false, confidence);
            }
            stream.push(true, confidence);

            // φ ← φ + τ + β·e, re-expressed relative to the transition just consumed.
            phase = (self.config.phase_gain - 1.0) * phase_error;

            // T tracks the observed per-cell time with gain α.
            let cell_time = delta / cells as f64;
            period += self.config.period_gain * (cell_time - period);
            period = period.clamp(min_period, max_period);
        }

        log::trace!(
            "Pll::decode(): {} intervals -> {} bits, final T: {} stats: {}",
            rev.len(),
            stream.len(),
            format_us!(period),
            stats
        );

        Ok(PllDecodeResult { stream, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::capture::FluxCapture;

    const SAMPLE_HZ: u32 = 72_000_000;

    // Build an HD MFM capture (1µs raw cell = 72 ticks) from a cell-count sequence.
    fn capture_from_cells(cells: &[u32]) -> FluxCapture {
        let intervals: Vec<u32> = cells.iter().map(|&c| c * 72).collect();
        let len = intervals.len();
        FluxCapture::from_intervals(SAMPLE_HZ, intervals, vec![0, len]).unwrap()
    }

    fn hd_config() -> PllConfig {
        PllConfig::new(TrackEncoding::Mfm, DataRate::Rate500Kbps)
    }

    #[test]
    fn nominal_flux_decodes_exactly() {
        let cells = [2u32, 3, 4, 2, 2, 3, 2, 4, 3, 2];
        let cap = capture_from_cells(&cells);
        let pll = Pll::new(hd_config());
        let result = pll.decode(&cap.revolution(0).unwrap(), false).unwrap();

        let mut expected = Vec::new();
        for &c in &cells {
            for _ in 0..c - 1 {
                expected.push(false);
            }
            expected.push(true);
        }
        let bits: Vec<bool> = result.stream.iter_bits().collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn decode_is_deterministic() {
        let cells: Vec<u32> = (0..5000).map(|i| 2 + (i * 7 % 3) as u32).collect();
        let cap = capture_from_cells(&cells);
        let pll = Pll::new(hd_config());
        let a = pll.decode(&cap.revolution(0).unwrap(), true).unwrap();
        let b = pll.decode(&cap.revolution(0).unwrap(), true).unwrap();
        assert_eq!(a.stream.bits(), b.stream.bits());
        assert_eq!(a.stream.confidence(), b.stream.confidence());
    }

    #[test]
    fn jittered_flux_recovers_original_bits() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let cells: Vec<u32> = (0..5000).map(|i| 2 + (i * 11 % 3) as u32).collect();
        let mut rng = StdRng::seed_from_u64(42);

        // Apply uniform jitter within ±5% of the 1µs raw bit cell (±3.6 ticks).
        let intervals: Vec<u32> = cells
            .iter()
            .map(|&c| {
                let jitter = rng.gen_range(-3i32..=3);
                (c * 72).saturating_add_signed(jitter)
            })
            .collect();
        let len = intervals.len();
        let cap = FluxCapture::from_intervals(SAMPLE_HZ, intervals, vec![0, len]).unwrap();

        let pll = Pll::new(hd_config());
        let result = pll.decode(&cap.revolution(0).unwrap(), false).unwrap();

        let mut expected = Vec::new();
        for &c in &cells {
            for _ in 0..c - 1 {
                expected.push(false);
            }
            expected.push(true);
        }
        let bits: Vec<bool> = result.stream.iter_bits().collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn wrong_clock_majority_aborts() {
        // 6-cell intervals against an MFM clamp of 2..=4: every interval violates.
        let cells: Vec<u32> = vec![6; 2000];
        let cap = capture_from_cells(&cells);
        let pll = Pll::new(hd_config());
        assert!(matches!(
            pll.decode(&cap.revolution(0).unwrap(), false),
            Err(FluxError::DecodeAbort)
        ));
    }

    #[test]
    fn confidence_reflects_phase_error() {
        let cap = capture_from_cells(&[2, 2, 2, 2]);
        let pll = Pll::new(hd_config());
        let result = pll.decode(&cap.revolution(0).unwrap(), true).unwrap();
        // Perfectly timed flux decodes with full confidence.
        for c in result.stream.confidence().unwrap() {
            assert!((c - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn skewed_cell_within_pull_range_still_locks() {
        // ~1.4% slow bit cell, inside the pull range. The period gain walks the clock onto
        // the data and the original cell counts come back exactly.
        let cells: Vec<u32> = (0..5000).map(|i| 2 + (i * 7 % 3) as u32).collect();
        let intervals: Vec<u32> = cells.iter().map(|&c| c * 73).collect();
        let len = intervals.len();
        let cap = FluxCapture::from_intervals(SAMPLE_HZ, intervals, vec![0, len]).unwrap();
        let pll = Pll::new(hd_config());
        let result = pll.decode(&cap.revolution(0).unwrap(), false).unwrap();

        let mut expected = Vec::new();
        for &c in &cells {
            for _ in 0..c - 1 {
                expected.push(false);
            }
            expected.push(true);
        }
        let bits: Vec<bool> = result.stream.iter_bits().collect();
        assert_eq!(bits, expected);
    }
}
