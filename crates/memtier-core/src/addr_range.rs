//! Page-granular address ranges
//!
//! An [`AddrRange`] is a base address plus a length counted in pages.
//! [`AddrRanges`] scopes a sequence of them to one process and provides
//! the range algebra used when choosing what to track:
//! - `flatten`: one single-range set per range
//! - `filter`: keep ranges matching a predicate
//! - `split_length`: chop ranges into bounded chunks
//! - `intersect` / `intersection`: clip ranges against cut ranges

use crate::error::PageMapError;
use crate::pagemap::{PageMap, Pages, ProcPageMap};
use crate::Pid;
use std::fmt;
use tracing::{debug, warn};

/// Page size assumed by all range arithmetic
pub const PAGE_SIZE: u64 = 4096;

/// A contiguous span of pages: `[addr, addr + length * PAGE_SIZE)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AddrRange {
    addr: u64,
    length: u64,
}

impl AddrRange {
    /// Create a range covering `start_addr..stop_addr`.
    ///
    /// Endpoints given in the wrong order are swapped. A trailing partial
    /// page is dropped.
    pub fn new(start_addr: u64, stop_addr: u64) -> Self {
        let (start, stop) = if stop_addr < start_addr {
            (stop_addr, start_addr)
        } else {
            (start_addr, stop_addr)
        };
        Self {
            addr: start,
            length: (stop - start) / PAGE_SIZE,
        }
    }

    /// Create a range of `length` pages starting at `addr`.
    pub fn from_pages(addr: u64, length: u64) -> Self {
        Self { addr, length }
    }

    /// First address of the range
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Number of pages
    pub fn length(&self) -> u64 {
        self.length
    }

    /// First address past the range, clamped to `u64::MAX` for a range
    /// reaching the top of the address space
    pub fn end_addr(&self) -> u64 {
        self.length
            .saturating_mul(PAGE_SIZE)
            .saturating_add(self.addr)
    }

    /// Unclamped end address
    fn end_addr_wide(&self) -> u128 {
        self.addr as u128 + self.length as u128 * PAGE_SIZE as u128
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}({})", self.addr, self.length)
    }
}

/// Address ranges of a single process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AddrRanges {
    pid: Pid,
    addrs: Vec<AddrRange>,
}

impl AddrRanges {
    /// Create a set of ranges for `pid`.
    pub fn new(pid: Pid, addrs: Vec<AddrRange>) -> Self {
        Self { pid, addrs }
    }

    /// Process the ranges belong to
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Ranges in their current order
    pub fn ranges(&self) -> &[AddrRange] {
        &self.addrs
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Split into one single-range set per range, preserving order.
    pub fn flatten(&self) -> Vec<AddrRanges> {
        self.addrs
            .iter()
            .map(|r| AddrRanges::new(self.pid, vec![*r]))
            .collect()
    }

    /// Return the ranges accepted by `accept`, preserving order.
    pub fn filter<F>(&self, accept: F) -> AddrRanges
    where
        F: Fn(&AddrRange) -> bool,
    {
        AddrRanges::new(
            self.pid,
            self.addrs.iter().filter(|r| accept(*r)).copied().collect(),
        )
    }

    /// Chop every range into consecutive chunks of at most `max_length` pages.
    ///
    /// A `max_length` of zero leaves the ranges as they are.
    pub fn split_length(&self, max_length: u64) -> AddrRanges {
        if max_length == 0 {
            warn!(pid = self.pid, "Ignoring split of address ranges into zero-length chunks");
            return self.clone();
        }

        let mut addrs = Vec::with_capacity(self.addrs.len());
        for r in &self.addrs {
            let mut addr = r.addr;
            let mut length = r.length;
            while length > max_length {
                addrs.push(AddrRange::from_pages(addr, max_length));
                length -= max_length;
                addr = addr.saturating_add(max_length.saturating_mul(PAGE_SIZE));
            }
            if length > 0 {
                addrs.push(AddrRange::from_pages(addr, length));
            }
        }
        AddrRanges::new(self.pid, addrs)
    }

    /// Replace the ranges with their overlaps against `cut_ranges`.
    ///
    /// A cut range overlaps when its start lies in `[addr, end_addr]` of an
    /// existing range. Every overlapping pair yields one entry, so several cut
    /// ranges hitting the same range produce several (possibly overlapping)
    /// entries. Ranges without any overlap are dropped.
    pub fn intersect(&mut self, cut_ranges: &[AddrRange]) {
        let mut addrs = Vec::new();
        for old in &self.addrs {
            for cut in cut_ranges {
                let stop = old.end_addr_wide();
                if cut.addr < old.addr || cut.addr as u128 > stop {
                    continue;
                }
                let start = old.addr.max(cut.addr);
                let stop = stop.min(cut.end_addr_wide());
                let length = (stop - start as u128) / PAGE_SIZE as u128;
                addrs.push(AddrRange::from_pages(start, length as u64));
            }
        }
        debug!(
            pid = self.pid,
            before = self.addrs.len(),
            after = addrs.len(),
            "Intersected address ranges"
        );
        self.addrs = addrs;
    }

    /// Like [`intersect`](Self::intersect), but returns a new set.
    pub fn intersection(&self, cut_ranges: &[AddrRange]) -> AddrRanges {
        let mut ar = self.clone();
        ar.intersect(cut_ranges);
        ar
    }

    /// Pages of these ranges whose page-map entries have all `attributes` bits set.
    pub fn pages_matching(&self, attributes: u64) -> Result<Pages, PageMapError> {
        self.pages_matching_with(&ProcPageMap::new(), attributes)
    }

    /// Like [`pages_matching`](Self::pages_matching), using the given page map.
    pub fn pages_matching_with<M: PageMap + ?Sized>(
        &self,
        page_map: &M,
        attributes: u64,
    ) -> Result<Pages, PageMapError> {
        let pages = page_map.query(self.pid, &self.addrs, attributes)?;
        Ok(Pages::new(self.pid, pages))
    }
}

impl fmt::Display for AddrRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ranges: Vec<String> = self.addrs.iter().map(|r| r.to_string()).collect();
        write!(f, "AddrRanges{{pid={} ranges={}}}", self.pid, ranges.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagemap::Page;

    fn sample_ranges() -> AddrRanges {
        AddrRanges::new(
            42,
            vec![
                AddrRange::from_pages(0x1000, 4),
                AddrRange::from_pages(0x10000, 1),
                AddrRange::from_pages(0x20000, 7),
            ],
        )
    }

    #[test]
    fn test_new_swaps_endpoints() {
        assert_eq!(AddrRange::new(0x1000, 0x5000), AddrRange::new(0x5000, 0x1000));
        assert_eq!(AddrRange::new(0x5000, 0x1000).addr(), 0x1000);
        assert_eq!(AddrRange::new(0x1000, 0x5000).length(), 4);
    }

    #[test]
    fn test_new_truncates_partial_page() {
        let r = AddrRange::new(0x1000, 0x2fff);
        assert_eq!(r.length(), 1);
        assert_eq!(r.end_addr(), 0x2000);
        assert_eq!(AddrRange::new(0x1000, 0x1000).length(), 0);
    }

    #[test]
    fn test_display() {
        let ar = AddrRanges::new(
            7,
            vec![AddrRange::from_pages(0xabc000, 3), AddrRange::from_pages(0x1000, 12)],
        );
        assert_eq!(ar.ranges()[0].to_string(), "abc000(3)");
        assert_eq!(ar.to_string(), "AddrRanges{pid=7 ranges=abc000(3),1000(12)}");
    }

    #[test]
    fn test_flatten() {
        let ar = sample_ranges();
        let flat = ar.flatten();

        assert_eq!(flat.len(), ar.len());
        for (single, original) in flat.iter().zip(ar.ranges()) {
            assert_eq!(single.pid(), 42);
            assert_eq!(single.ranges(), &[*original]);
        }
    }

    #[test]
    fn test_filter() {
        let ar = sample_ranges();

        assert_eq!(ar.filter(|_| true), ar);
        assert!(ar.filter(|_| false).is_empty());
        assert_eq!(ar.filter(|_| false).pid(), 42);

        let long = ar.filter(|r| r.length() > 1);
        assert_eq!(
            long.ranges(),
            &[AddrRange::from_pages(0x1000, 4), AddrRange::from_pages(0x20000, 7)]
        );
    }

    #[test]
    fn test_split_length() {
        let ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x1000, 4)]);
        let split = ar.split_length(2);
        assert_eq!(
            split.ranges(),
            &[AddrRange::from_pages(0x1000, 2), AddrRange::from_pages(0x3000, 2)]
        );
    }

    #[test]
    fn test_split_length_remainder() {
        let ar = sample_ranges();
        let split = ar.split_length(3);

        assert!(split.ranges().iter().all(|r| r.length() <= 3));
        let total: u64 = split.ranges().iter().map(|r| r.length()).sum();
        let original: u64 = ar.ranges().iter().map(|r| r.length()).sum();
        assert_eq!(total, original);

        // 4 -> 3+1, 1 -> 1, 7 -> 3+3+1
        let lengths: Vec<u64> = split.ranges().iter().map(|r| r.length()).collect();
        assert_eq!(lengths, vec![3, 1, 1, 3, 3, 1]);
        assert_eq!(split.ranges()[1].addr(), 0x1000 + 3 * PAGE_SIZE);
        assert_eq!(split.ranges()[5].end_addr(), ar.ranges()[2].end_addr());
    }

    #[test]
    fn test_split_length_zero_is_identity() {
        let ar = sample_ranges();
        assert_eq!(ar.split_length(0), ar);
    }

    #[test]
    fn test_intersect_disjoint() {
        let mut ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x1000, 2)]);
        ar.intersect(&[AddrRange::from_pages(0x10000, 4)]);
        assert!(ar.is_empty());
    }

    #[test]
    fn test_intersect_containing() {
        let mut ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x1000, 2)]);
        ar.intersect(&[AddrRange::from_pages(0x1000, 8)]);
        assert_eq!(ar.ranges(), &[AddrRange::from_pages(0x1000, 2)]);
    }

    #[test]
    fn test_intersect_end_boundary() {
        // A cut starting exactly at the end is still an overlap, of zero pages
        let mut ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x1000, 2)]);
        ar.intersect(&[AddrRange::from_pages(0x3000, 4)]);
        assert_eq!(ar.ranges(), &[AddrRange::from_pages(0x3000, 0)]);

        let mut ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x1000, 2)]);
        ar.intersect(&[AddrRange::from_pages(0x4000, 4)]);
        assert!(ar.is_empty());
    }

    #[test]
    fn test_intersect_cut_starts_before() {
        let mut ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x3000, 2)]);
        ar.intersect(&[AddrRange::from_pages(0x2000, 2)]);
        assert!(ar.is_empty());

        // Strictly containing, but starting below the range
        let mut ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x3000, 2)]);
        ar.intersect(&[AddrRange::from_pages(0x1000, 16)]);
        assert!(ar.is_empty());
    }

    #[test]
    fn test_top_of_address_space() {
        let last = AddrRange::from_pages(0xffff_ffff_ffff_f000, 1);
        assert_eq!(last.end_addr(), u64::MAX);
        assert_eq!(AddrRange::from_pages(0x1000, u64::MAX).end_addr(), u64::MAX);

        let mut ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x1000, 4)]);
        ar.intersect(&[AddrRange::from_pages(0x1000, u64::MAX / PAGE_SIZE + 1)]);
        assert_eq!(ar.ranges(), &[AddrRange::from_pages(0x1000, 4)]);

        let mut ar = AddrRanges::new(1, vec![last]);
        ar.intersect(&[last]);
        assert_eq!(ar.ranges(), &[last]);

        let split = AddrRanges::new(1, vec![AddrRange::from_pages(0xffff_ffff_ffff_e000, 2)])
            .split_length(1);
        assert_eq!(
            split.ranges(),
            &[AddrRange::from_pages(0xffff_ffff_ffff_e000, 1), last]
        );
    }

    #[test]
    fn test_intersect_partial() {
        let mut ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x1000, 8)]);
        ar.intersect(&[AddrRange::from_pages(0x3000, 10)]);
        assert_eq!(ar.ranges(), &[AddrRange::from_pages(0x3000, 6)]);

        let mut ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x1000, 8)]);
        ar.intersect(&[AddrRange::from_pages(0x3000, 2)]);
        assert_eq!(ar.ranges(), &[AddrRange::from_pages(0x3000, 2)]);
    }

    #[test]
    fn test_intersect_fan_out() {
        let mut ar = AddrRanges::new(
            1,
            vec![AddrRange::from_pages(0x1000, 8), AddrRange::from_pages(0x100000, 2)],
        );
        ar.intersect(&[
            AddrRange::from_pages(0x2000, 4),
            AddrRange::from_pages(0x3000, 1),
            AddrRange::from_pages(0x100000, 1),
        ]);
        assert_eq!(
            ar.ranges(),
            &[
                AddrRange::from_pages(0x2000, 4),
                AddrRange::from_pages(0x3000, 1),
                AddrRange::from_pages(0x100000, 1),
            ]
        );
    }

    #[test]
    fn test_intersection_keeps_receiver() {
        let ar = AddrRanges::new(1, vec![AddrRange::from_pages(0x1000, 8)]);
        let cut = ar.intersection(&[AddrRange::from_pages(0x2000, 1)]);
        assert_eq!(cut.ranges(), &[AddrRange::from_pages(0x2000, 1)]);
        assert_eq!(ar.ranges(), &[AddrRange::from_pages(0x1000, 8)]);
    }

    struct FixedPageMap;

    impl PageMap for FixedPageMap {
        fn query(
            &self,
            pid: Pid,
            ranges: &[AddrRange],
            attributes: u64,
        ) -> Result<Vec<Page>, PageMapError> {
            if pid == 0 {
                return Err(PageMapError::ProcessNotFound(pid));
            }
            Ok(ranges
                .iter()
                .map(|r| Page::new(r.addr(), attributes))
                .collect())
        }
    }

    #[test]
    fn test_pages_matching_with() {
        let ar = sample_ranges();
        let pages = ar.pages_matching_with(&FixedPageMap, 1 << 63).unwrap();
        assert_eq!(pages.pid(), 42);
        assert_eq!(pages.len(), 3);
        assert!(pages.pages()[0].is_present());

        let missing = AddrRanges::new(0, vec![AddrRange::from_pages(0x1000, 1)]);
        assert!(matches!(
            missing.pages_matching_with(&FixedPageMap, 0),
            Err(PageMapError::ProcessNotFound(0))
        ));
    }
}
