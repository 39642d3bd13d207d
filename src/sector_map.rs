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

    src/sector_map.rs

    The dense sector table: one Sector per linear address, owned exclusively
    by the table. All mutation funnels through with_sector_mut so the derived
    per-status aggregates stay consistent and same-address updates are totally
    ordered.
*/

use strum::IntoEnumIterator;

use crate::{
    types::{
        chs::DiskChs,
        enums::{RecoveryMethod, SectorStatus},
        geometry::DiskGeometry,
    },
};

/// The primary unit of user data.
#[derive(Clone, Debug)]
pub struct Sector {
    pub id: DiskChs,
    pub status: SectorStatus,
    pub payload: Option<Vec<u8>>,
    /// Tri-state CRC results: ok / bad / absent.
    pub header_crc_ok: Option<bool>,
    pub data_crc_ok: Option<bool>,
    pub quality: f32,
    pub read_count: u32,
    pub last_successful_pass: u32,
    pub recovered_by: Option<RecoveryMethod>,
}

impl Sector {
    fn unread(id: DiskChs) -> Sector {
        Sector {
            id,
            status: SectorStatus::Unread,
            payload: None,
            header_crc_ok: None,
            data_crc_ok: None,
            quality: 0.0,
            read_count: 0,
            last_successful_pass: 0,
            recovered_by: None,
        }
    }
}

fn status_index(status: SectorStatus) -> usize {
    status.rank() as usize
}

/// Dense mapping from linear sector address to [`Sector`], with O(1) access and incrementally
/// maintained aggregate counts. Iteration order is (cylinder, head, sector) order, which the
/// linear-address law makes the natural vector order.
pub struct SectorTable {
    geometry: DiskGeometry,
    sectors: Vec<Sector>,
    counts: [usize; 9],
}

impl SectorTable {
    pub fn new(geometry: DiskGeometry) -> SectorTable {
        let total = geometry.total_sectors();
        let mut sectors = Vec::with_capacity(total);
        for lin in 0..total {
            let chs = DiskChs::from_linear(lin, geometry.heads(), geometry.sectors_per_track());
            sectors.push(Sector::unread(chs));
        }

        let mut counts = [0usize; 9];
        counts[status_index(SectorStatus::Unread)] = total;

        SectorTable {
            geometry,
            sectors,
            counts,
        }
    }

    pub fn geometry(&self) -> &DiskGeometry {
        &self.geometry
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Linear address of a sector id, if it is inside this table's geometry.
    pub fn linear(&self, chs: DiskChs) -> Option<usize> {
        if chs.c() >= self.geometry.cylinders()
            || chs.h() >= self.geometry.heads()
            || chs.s() == 0
            || chs.s() > self.geometry.sectors_per_track()
        {
            return None;
        }
        Some(chs.to_linear(self.geometry.heads(), self.geometry.sectors_per_track()))
    }

    pub fn sector(&self, linear: usize) -> Option<&Sector> {
        self.sectors.get(linear)
    }

    /// The single mutation funnel. The closure holds the only live reference to the slot for
    /// its duration, and aggregate counts are reconciled before the borrow is released, so
    /// updates to the same address are totally ordered and the aggregates never drift.
    pub fn with_sector_mut<R>(&mut self, linear: usize, f: impl FnOnce(&mut Sector) -> R) -> Option<R> {
        let sector = self.sectors.get_mut(linear)?;
        let old_status = sector.status;
        let result = f(sector);
        let new_status = sector.status;
        if old_status != new_status {
            self.counts[status_index(old_status)] -= 1;
            self.counts[status_index(new_status)] += 1;
        }
        Some(result)
    }

    /// Merge one decoded candidate into the table. The rule: replace when the stored status is
    /// worse than the candidate's; on equal status keep the higher quality. Read counts
    /// accumulate either way.
    pub fn merge(&mut self, linear: usize, candidate: Sector) -> bool {
        self.with_sector_mut(linear, |slot| {
            let reads = slot.read_count + 1;
            let replace = match slot.status.rank().cmp(&candidate.status.rank()) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal => candidate.quality > slot.quality,
                std::cmp::Ordering::Greater => false,
            };
            if replace {
                *slot = candidate;
            }
            slot.read_count = reads;
            replace
        })
        .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sector> {
        self.sectors.iter()
    }

    pub fn count(&self, status: SectorStatus) -> usize {
        self.counts[status_index(status)]
    }

    pub fn good_count(&self) -> usize {
        self.count(SectorStatus::Good) + self.count(SectorStatus::Recovered)
    }

    pub fn weak_count(&self) -> usize {
        self.count(SectorStatus::Weak)
    }

    /// Sectors that still need recovery attention.
    pub fn bad_count(&self) -> usize {
        SectorStatus::iter()
            .filter(|s| s.is_bad())
            .map(|s| self.count(s))
            .sum()
    }

    /// Linear addresses of all sectors whose status wants recovery.
    pub fn bad_addresses(&self) -> Vec<usize> {
        self.sectors
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status.is_bad())
            .map(|(lin, _)| lin)
            .collect()
    }

    /// Linear addresses for one track, in sector order.
    pub fn track_addresses(&self, c: u16, h: u8) -> std::ops::Range<usize> {
        let spt = self.geometry.sectors_per_track() as usize;
        let base = (c as usize * self.geometry.heads() as usize + h as usize) * spt;
        base..base + spt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SectorTable {
        SectorTable::new(DiskGeometry::pc_1440k())
    }

    fn candidate(id: DiskChs, status: SectorStatus, quality: f32) -> Sector {
        Sector {
            id,
            status,
            payload: Some(vec![0; 512]),
            header_crc_ok: Some(true),
            data_crc_ok: Some(status == SectorStatus::Good),
            quality,
            read_count: 0,
            last_successful_pass: 0,
            recovered_by: None,
        }
    }

    #[test]
    fn new_table_is_all_unread() {
        let t = table();
        assert_eq!(t.len(), 2880);
        assert_eq!(t.count(SectorStatus::Unread), 2880);
        assert!(t.iter().all(|s| s.status == SectorStatus::Unread));
    }

    #[test]
    fn every_address_appears_exactly_once() {
        let t = table();
        let mut seen = std::collections::HashSet::new();
        for sector in t.iter() {
            assert!(seen.insert(sector.id));
        }
        assert_eq!(seen.len(), t.geometry().total_sectors());
    }

    #[test]
    fn aggregates_track_mutations() {
        let mut t = table();
        t.with_sector_mut(0, |s| s.status = SectorStatus::Good);
        t.with_sector_mut(1, |s| s.status = SectorStatus::Bad);
        t.with_sector_mut(2, |s| s.status = SectorStatus::Weak);
        assert_eq!(t.count(SectorStatus::Good), 1);
        assert_eq!(t.count(SectorStatus::Bad), 1);
        assert_eq!(t.count(SectorStatus::Weak), 1);
        assert_eq!(t.count(SectorStatus::Unread), 2877);

        let total: usize = SectorStatus::iter().map(|s| t.count(s)).sum();
        assert_eq!(total, t.len());
    }

    #[test]
    fn merge_prefers_better_status() {
        let mut t = table();
        let id = DiskChs::new(0, 0, 1);
        assert!(t.merge(0, candidate(id, SectorStatus::Bad, 0.2)));
        assert!(t.merge(0, candidate(id, SectorStatus::Good, 0.9)));
        // A worse decode never downgrades the table.
        assert!(!t.merge(0, candidate(id, SectorStatus::Bad, 0.9)));
        assert_eq!(t.sector(0).unwrap().status, SectorStatus::Good);
        assert_eq!(t.sector(0).unwrap().read_count, 3);
    }

    #[test]
    fn merge_equal_status_keeps_higher_quality() {
        let mut t = table();
        let id = DiskChs::new(0, 0, 1);
        t.merge(0, candidate(id, SectorStatus::Good, 0.9));
        t.merge(0, candidate(id, SectorStatus::Good, 0.5));
        assert_eq!(t.sector(0).unwrap().quality, 0.9);
        t.merge(0, candidate(id, SectorStatus::Good, 0.95));
        assert_eq!(t.sector(0).unwrap().quality, 0.95);
    }

    #[test]
    fn linear_rejects_out_of_geometry() {
        let t = table();
        assert!(t.linear(DiskChs::new(80, 0, 1)).is_none());
        assert!(t.linear(DiskChs::new(0, 2, 1)).is_none());
        assert!(t.linear(DiskChs::new(0, 0, 0)).is_none());
        assert!(t.linear(DiskChs::new(0, 0, 19)).is_none());
        assert_eq!(t.linear(DiskChs::new(0, 0, 1)), Some(0));
        assert_eq!(t.linear(DiskChs::new(79, 1, 18)), Some(2879));
    }

    #[test]
    fn iteration_is_chs_ordered() {
        let t = table();
        let mut prev: Option<(u16, u8, u8)> = None;
        for sector in t.iter() {
            let cur = sector.id.get();
            if let Some(prev) = prev {
                assert!(cur > prev);
            }
            prev = Some(cur);
        }
    }
}
