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

//! Flux-domain representation and processing: the immutable [`FluxCapture`] value, the
//! [`pll::Pll`] decoder that turns transition timings into a raw bitstream, the synthesizer that
//! goes the other way for writes, and the [`analyzer`] that derives histograms, peaks, jitter
//! and quality scores from a capture.

pub mod analyzer;
pub mod capture;
pub mod pll;
pub mod synth;

use std::fmt::{self, Display, Formatter};

pub use analyzer::{FluxAnalysis, FluxHistogram};
pub use capture::{FluxCapture, RevolutionView};
pub use pll::{Pll, PllConfig, PllDecodeResult};

#[doc(hidden)]
#[macro_export]
macro_rules! format_us {
    ($value:expr) => {
        format!("{:.4}μs", $value * 1_000_000.0)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! format_ms {
    ($value:expr) => {
        format!("{:.4}ms", $value * 1_000.0)
    };
}

/// Summary statistics collected by a single PLL decode pass.
#[derive(Default)]
pub struct FluxStats {
    pub total: u32,
    pub short: u32,
    pub medium: u32,
    pub long: u32,
    pub too_short: u32,
    pub too_long: u32,

    pub shortest_flux: f64,
    pub longest_flux:  f64,
}

impl Display for FluxStats {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "Total: {} S: {} M: {} L: {} Shortest: {} Longest: {} Too Short: {} Too Long: {}",
            self.total,
            self.short,
            self.medium,
            self.long,
            format_us!(self.shortest_flux),
            format_us!(self.longest_flux),
            self.too_short,
            self.too_long
        )
    }
}
