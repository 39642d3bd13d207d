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

    src/flux/capture.rs

    FluxCapture: an immutable sequence of flux transition intervals for one
    (cylinder, head), with index marks and cheap per-revolution slicing.
*/

use crate::{FluxError, MAXIMUM_REVOLUTIONS};

/// An immutable flux capture for a single track. Intervals are tick counts at `sample_hz`;
/// index positions are indexes into the interval sequence marking index-pulse arrivals.
///
/// Decoders consume borrowed [`RevolutionView`]s; a view never extends the capture's lifetime.
/// A caller that wants to keep one revolution past the capture (flux retention) copies it out
/// with [`RevolutionView::retain`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FluxCapture {
    sample_hz: u32,
    intervals: Vec<u32>,
    index_positions: Vec<usize>,
}

impl FluxCapture {
    /// Build a capture from raw intervals and index positions, validating the flux invariants:
    /// intervals strictly positive, index positions strictly increasing and in range.
    pub fn from_intervals(
        sample_hz: u32,
        intervals: Vec<u32>,
        index_positions: Vec<usize>,
    ) -> Result<FluxCapture, FluxError> {
        if sample_hz == 0 {
            return Err(FluxError::InvalidFlux("sample frequency must be non-zero".to_string()));
        }
        if let Some(pos) = intervals.iter().position(|&t| t == 0) {
            return Err(FluxError::InvalidFlux(format!(
                "non-positive interval at index {}",
                pos
            )));
        }
        let mut last: Option<usize> = None;
        for &ip in &index_positions {
            if ip > intervals.len() {
                return Err(FluxError::InvalidFlux(format!("index position {} out of range", ip)));
            }
            if let Some(last) = last {
                if ip <= last {
                    return Err(FluxError::InvalidFlux(format!(
                        "index positions not strictly increasing at {}",
                        ip
                    )));
                }
            }
            last = Some(ip);
        }
        if index_positions.len() > MAXIMUM_REVOLUTIONS + 1 {
            return Err(FluxError::InvalidFlux(format!(
                "capture holds more than {} revolutions",
                MAXIMUM_REVOLUTIONS
            )));
        }

        Ok(FluxCapture {
            sample_hz,
            intervals,
            index_positions,
        })
    }

    pub fn sample_hz(&self) -> u32 {
        self.sample_hz
    }

    pub fn intervals(&self) -> &[u32] {
        &self.intervals
    }

    pub fn index_positions(&self) -> &[usize] {
        &self.index_positions
    }

    /// The number of complete revolutions in this capture: one fewer than the index-pulse count.
    /// A capture with one index pulse or none is usable only as a single degenerate revolution.
    pub fn revolutions(&self) -> usize {
        self.index_positions.len().saturating_sub(1).max(1)
    }

    fn is_degenerate(&self) -> bool {
        self.index_positions.len() < 2
    }

    /// A borrowed view of the intervals between index pulse `i` and `i + 1`.
    pub fn revolution(&self, i: usize) -> Result<RevolutionView, FluxError> {
        if i >= self.revolutions() {
            return Err(FluxError::OutOfRange);
        }

        if self.is_degenerate() {
            // Only one index pulse (or none) was seen. Expose the whole capture as revolution 0.
            return Ok(RevolutionView {
                sample_hz: self.sample_hz,
                intervals: &self.intervals,
                start: 0,
            });
        }

        let start = self.index_positions[i];
        let end = self.index_positions[i + 1];
        Ok(RevolutionView {
            sample_hz: self.sample_hz,
            intervals: &self.intervals[start..end],
            start,
        })
    }

    /// Iterate over all revolution views in order.
    pub fn revolution_iter(&self) -> impl Iterator<Item = RevolutionView<'_>> + '_ {
        (0..self.revolutions()).filter_map(|i| self.revolution(i).ok())
    }

    /// The duration of the whole capture in nanoseconds.
    pub fn duration_ns(&self) -> u64 {
        ticks_to_ns(self.intervals.iter().map(|&t| t as u64).sum(), self.sample_hz)
    }

    /// Rotation rate computed from index-to-index timing. `None` for degenerate captures.
    pub fn measured_rpm(&self) -> Option<f64> {
        if self.is_degenerate() {
            return None;
        }
        let mut rev_secs = Vec::with_capacity(self.revolutions());
        for view in self.revolution_iter() {
            rev_secs.push(view.duration_secs());
        }
        let mean = rev_secs.iter().sum::<f64>() / rev_secs.len() as f64;
        if mean > 0.0 {
            Some(60.0 / mean)
        }
        else {
            None
        }
    }
}

/// A borrowed slice of a [`FluxCapture`] covering one revolution.
#[derive(Copy, Clone)]
pub struct RevolutionView<'a> {
    sample_hz: u32,
    intervals: &'a [u32],
    start: usize,
}

impl RevolutionView<'_> {
    pub fn sample_hz(&self) -> u32 {
        self.sample_hz
    }

    pub fn intervals(&self) -> &[u32] {
        self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Offset of this view's first interval within the parent capture.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Iterate interval durations in seconds.
    pub fn delta_iter(&self) -> impl Iterator<Item = f64> + '_ {
        let hz = self.sample_hz as f64;
        self.intervals.iter().map(move |&t| t as f64 / hz)
    }

    pub fn duration_ns(&self) -> u64 {
        ticks_to_ns(self.intervals.iter().map(|&t| t as u64).sum(), self.sample_hz)
    }

    pub fn duration_secs(&self) -> f64 {
        self.intervals.iter().map(|&t| t as u64).sum::<u64>() as f64 / self.sample_hz as f64
    }

    /// Copy this view into an owned single-revolution capture. This is the explicit retention
    /// point for flux that must outlive its source capture.
    pub fn retain(&self) -> FluxCapture {
        FluxCapture {
            sample_hz: self.sample_hz,
            intervals: self.intervals.to_vec(),
            index_positions: vec![0, self.intervals.len()],
        }
    }
}

fn ticks_to_ns(ticks: u64, sample_hz: u32) -> u64 {
    // Multiply before dividing to keep nanosecond precision for high sample rates.
    (ticks as u128 * 1_000_000_000u128 / sample_hz as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_intervals() {
        assert!(matches!(
            FluxCapture::from_intervals(72_000_000, vec![100, 0, 100], vec![0, 3]),
            Err(FluxError::InvalidFlux(_))
        ));
    }

    #[test]
    fn rejects_non_monotonic_index() {
        assert!(matches!(
            FluxCapture::from_intervals(72_000_000, vec![100; 10], vec![0, 5, 5]),
            Err(FluxError::InvalidFlux(_))
        ));
        assert!(matches!(
            FluxCapture::from_intervals(72_000_000, vec![100; 10], vec![0, 11]),
            Err(FluxError::InvalidFlux(_))
        ));
    }

    #[test]
    fn revolution_slicing() {
        let cap = FluxCapture::from_intervals(72_000_000, vec![100; 10], vec![0, 4, 10]).unwrap();
        assert_eq!(cap.revolutions(), 2);
        assert_eq!(cap.revolution(0).unwrap().len(), 4);
        assert_eq!(cap.revolution(1).unwrap().len(), 6);
        assert!(matches!(cap.revolution(2), Err(FluxError::OutOfRange)));
    }

    #[test]
    fn degenerate_capture_exposes_one_revolution() {
        let cap = FluxCapture::from_intervals(72_000_000, vec![100; 10], vec![]).unwrap();
        assert_eq!(cap.revolutions(), 1);
        assert_eq!(cap.revolution(0).unwrap().len(), 10);

        let cap = FluxCapture::from_intervals(72_000_000, vec![100; 10], vec![3]).unwrap();
        assert_eq!(cap.revolutions(), 1);
        assert_eq!(cap.revolution(0).unwrap().len(), 10);
    }

    #[test]
    fn duration_in_ns() {
        // 72 ticks at 72MHz is exactly 1µs.
        let cap = FluxCapture::from_intervals(72_000_000, vec![72; 1000], vec![0, 1000]).unwrap();
        assert_eq!(cap.duration_ns(), 1_000_000);
        assert_eq!(cap.revolution(0).unwrap().duration_ns(), 1_000_000);
    }

    #[test]
    fn rpm_from_index_timing() {
        // A 200ms revolution is 300 RPM. 200ms at 72MHz = 14_400_000 ticks.
        let intervals = vec![14_400u32; 1000];
        let cap = FluxCapture::from_intervals(72_000_000, intervals, vec![0, 1000]).unwrap();
        let rpm = cap.measured_rpm().unwrap();
        assert!((rpm - 300.0).abs() < 0.01);
    }

    #[test]
    fn retained_view_is_standalone() {
        let cap = FluxCapture::from_intervals(72_000_000, vec![100; 10], vec![0, 4, 10]).unwrap();
        let kept = cap.revolution(1).unwrap().retain();
        drop(cap);
        assert_eq!(kept.revolutions(), 1);
        assert_eq!(kept.intervals().len(), 6);
    }
}
