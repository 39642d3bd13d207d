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

    src/flux/synth.rs

    Flux synthesis: the inverse of the PLL. Converts a raw cell bitstream into
    a transition interval train for writing, optionally with timing jitter for
    the memory controller's read-noise model.
*/

use bit_vec::BitVec;
use rand::{rngs::StdRng, Rng};

use crate::{flux::capture::FluxCapture, FluxError};

/// Convert a raw cell bitstream into flux intervals. Every set cell emits a transition; the
/// interval is the number of cells since the previous transition times the cell clock.
///
/// Cumulative tick positions are rounded, not the individual intervals, so synthesis does not
/// accumulate rounding drift over a track.
pub fn intervals_from_bits(bits: &BitVec, cell_secs: f64, sample_hz: u32) -> Vec<u32> {
    let mut intervals = Vec::with_capacity(bits.len() / 2);
    let mut last_tick: u64 = 0;
    let mut cell_index: u64 = 0;

    for bit in bits.iter() {
        cell_index += 1;
        if bit {
            let tick = ((cell_index as f64 * cell_secs) * sample_hz as f64).round() as u64;
            let delta = tick.saturating_sub(last_tick);
            if delta > 0 {
                intervals.push(delta as u32);
            }
            last_tick = tick;
        }
    }
    intervals
}

/// Synthesize a multi-revolution capture by repeating one revolution's bitstream. Index
/// positions are placed at every revolution boundary, including both ends.
pub fn capture_from_bits(
    bits: &BitVec,
    cell_secs: f64,
    sample_hz: u32,
    revolutions: usize,
) -> Result<FluxCapture, FluxError> {
    let rev_intervals = intervals_from_bits(bits, cell_secs, sample_hz);
    let mut intervals = Vec::with_capacity(rev_intervals.len() * revolutions);
    let mut index_positions = Vec::with_capacity(revolutions + 1);

    index_positions.push(0);
    for _ in 0..revolutions {
        intervals.extend_from_slice(&rev_intervals);
        index_positions.push(intervals.len());
    }

    FluxCapture::from_intervals(sample_hz, intervals, index_positions)
}

/// Apply Gaussian timing jitter to an interval train. `sigma_secs` is the standard deviation of
/// the per-transition displacement. Intervals never drop below one tick.
pub fn apply_jitter(intervals: &mut [u32], sigma_secs: f64, sample_hz: u32, rng: &mut StdRng) {
    if sigma_secs <= 0.0 {
        return;
    }
    let sigma_ticks = sigma_secs * sample_hz as f64;
    for interval in intervals.iter_mut() {
        let displaced = *interval as f64 + gaussian(rng) * sigma_ticks;
        *interval = displaced.round().max(1.0) as u32;
    }
}

// Box-Muller transform; one draw per call is plenty for a noise model.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        flux::pll::{Pll, PllConfig},
        types::enums::{DataRate, TrackEncoding},
    };
    use rand::SeedableRng;

    const SAMPLE_HZ: u32 = 72_000_000;

    fn raw_bits(cells: &[u32]) -> BitVec {
        let mut bits = BitVec::new();
        for &c in cells {
            for _ in 0..c - 1 {
                bits.push(false);
            }
            bits.push(true);
        }
        bits
    }

    #[test]
    fn synthesis_inverts_the_pll() {
        // HD MFM: 1µs raw cell.
        let cells = [2u32, 3, 4, 2, 3, 3, 2, 4];
        let bits = raw_bits(&cells);
        let cap = capture_from_bits(&bits, 1.0e-6, SAMPLE_HZ, 1).unwrap();

        let expected: Vec<u32> = cells.iter().map(|&c| c * 72).collect();
        assert_eq!(cap.intervals(), expected.as_slice());

        let pll = Pll::new(PllConfig::new(TrackEncoding::Mfm, DataRate::Rate500Kbps));
        let decoded = pll.decode(&cap.revolution(0).unwrap(), false).unwrap();
        let got: Vec<bool> = decoded.stream.iter_bits().collect();
        let want: Vec<bool> = bits.iter().collect();
        assert_eq!(got, want);
    }

    #[test]
    fn multi_revolution_index_positions() {
        let bits = raw_bits(&[2, 2, 2, 2]);
        let cap = capture_from_bits(&bits, 1.0e-6, SAMPLE_HZ, 3).unwrap();
        assert_eq!(cap.revolutions(), 3);
        assert_eq!(cap.index_positions(), &[0, 4, 8, 12]);
    }

    #[test]
    fn leading_zero_cells_do_not_emit() {
        // A stream starting with zeros folds them into the first transition interval.
        let mut bits = BitVec::new();
        bits.push(false);
        bits.push(false);
        bits.push(true);
        bits.push(false);
        bits.push(true);
        let intervals = intervals_from_bits(&bits, 1.0e-6, SAMPLE_HZ);
        assert_eq!(intervals, vec![216, 144]);
    }

    #[test]
    fn jitter_is_bounded_and_deterministic() {
        let mut a: Vec<u32> = vec![144; 1000];
        let mut b = a.clone();
        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        apply_jitter(&mut a, 20.0e-9, SAMPLE_HZ, &mut rng_a);
        apply_jitter(&mut b, 20.0e-9, SAMPLE_HZ, &mut rng_b);
        assert_eq!(a, b);
        assert!(a.iter().all(|&t| t > 0));
        // 20ns sigma on a 2µs interval: nothing should stray past 10 sigma.
        assert!(a.iter().all(|&t| (t as i64 - 144).unsigned_abs() < 15));
    }
}
