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

    src/types/chs.rs

    Defines physical track (DiskCh) and sector (DiskChs) addresses, and the
    linear-address law used by the sector table and raw sector images.
*/

use std::fmt::Display;

/// A physical track address: (cylinder, head).
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Default)]
pub struct DiskCh {
    c: u16,
    h: u8,
}

impl From<(u16, u8)> for DiskCh {
    fn from((c, h): (u16, u8)) -> Self {
        Self { c, h }
    }
}

impl Display for DiskCh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{}]", self.c, self.h)
    }
}

impl DiskCh {
    pub fn new(c: u16, h: u8) -> Self {
        Self { c, h }
    }

    pub fn c(&self) -> u16 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h
    }

    /// Return the single-sided track index used by SCP and HFE images, where head 0 and head 1
    /// tracks of the same cylinder are adjacent.
    pub fn track_index(&self, heads: u8) -> usize {
        self.c as usize * heads as usize + self.h as usize
    }
}

/// A physical sector address: (cylinder, head, sector). Sector ids are 1-based per the standard
/// convention; a sector id of 0 never addresses user data.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct DiskChs {
    c: u16,
    h: u8,
    s: u8,
}

impl Default for DiskChs {
    fn default() -> Self {
        Self { c: 0, h: 0, s: 1 }
    }
}

impl From<(u16, u8, u8)> for DiskChs {
    fn from((c, h, s): (u16, u8, u8)) -> Self {
        Self { c, h, s }
    }
}

impl From<DiskChs> for (u16, u8, u8) {
    fn from(chs: DiskChs) -> Self {
        (chs.c, chs.h, chs.s)
    }
}

impl From<(DiskCh, u8)> for DiskChs {
    fn from((ch, s): (DiskCh, u8)) -> Self {
        Self {
            c: ch.c(),
            h: ch.h(),
            s,
        }
    }
}

impl Display for DiskChs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{} s:{}]", self.c, self.h, self.s)
    }
}

impl DiskChs {
    pub fn new(c: u16, h: u8, s: u8) -> Self {
        Self { c, h, s }
    }

    pub fn get(&self) -> (u16, u8, u8) {
        (self.c, self.h, self.s)
    }
    pub fn c(&self) -> u16 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h
    }
    pub fn s(&self) -> u8 {
        self.s
    }

    pub fn ch(&self) -> DiskCh {
        DiskCh::new(self.c, self.h)
    }

    /// Convert to a linear sector address: `(c * heads + h) * spt + (s - 1)`.
    /// A reference geometry supplies heads and sectors-per-track.
    pub fn to_linear(&self, heads: u8, spt: u8) -> usize {
        let hpc = heads as usize;
        let spt = spt as usize;
        (self.c as usize * hpc + self.h as usize) * spt + (self.s.saturating_sub(1)) as usize
    }

    /// Recover a sector address from a linear address under the given geometry.
    pub fn from_linear(linear: usize, heads: u8, spt: u8) -> DiskChs {
        let spt_us = spt as usize;
        let hpc = heads as usize;
        let s = (linear % spt_us) as u8 + 1;
        let track = linear / spt_us;
        let h = (track % hpc) as u8;
        let c = (track / hpc) as u16;
        DiskChs::new(c, h, s)
    }
}

/// The size of the 'n' size-code parameter in bytes.
/// The formula for calculating size from n is (128 * 2^n).
/// We enforce a maximum size of 8192 bytes for a single sector.
pub fn n_to_bytes(n: u8) -> usize {
    std::cmp::min(crate::MAXIMUM_SECTOR_SIZE, 128usize.overflowing_shl(n as u32).0)
}

pub fn bytes_to_n(size: usize) -> u8 {
    let mut n = 0;
    let mut size = size;
    while size > 128 {
        size >>= 1;
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_addressing_round_trips() {
        let (heads, spt) = (2u8, 18u8);
        for c in 0..80u16 {
            for h in 0..heads {
                for s in 1..=spt {
                    let chs = DiskChs::new(c, h, s);
                    let lin = chs.to_linear(heads, spt);
                    assert_eq!(DiskChs::from_linear(lin, heads, spt), chs);
                }
            }
        }
    }

    #[test]
    fn linear_address_law() {
        // (c * heads + h) * spt + (s - 1)
        let chs = DiskChs::new(40, 1, 9);
        assert_eq!(chs.to_linear(2, 18), (40 * 2 + 1) * 18 + 8);
    }

    #[test]
    fn n_size_codes() {
        assert_eq!(n_to_bytes(0), 128);
        assert_eq!(n_to_bytes(2), 512);
        assert_eq!(n_to_bytes(6), 8192);
        // Oversized codes clamp to the maximum sector size.
        assert_eq!(n_to_bytes(7), 8192);
        assert_eq!(bytes_to_n(512), 2);
        assert_eq!(bytes_to_n(128), 0);
    }
}
