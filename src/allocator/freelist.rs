/// A contiguous run of unused bytes within a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeRange {
    /// Byte offset of the range within the page.
    pub offset: u64,
    /// Byte size of the range.
    pub size: u64,
}

impl FreeRange {
    fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// The free ranges of a page, kept sorted by ascending offset
/// in a plain vector: predecessor and successor lookups are
/// then simple index arithmetic instead of pointer chasing.
/// Two invariants hold between calls: the ranges are disjoint
/// and ordered, and no two adjacent ranges touch (touching
/// ranges are merged as soon as a free creates them). Together
/// with the allocations handed out, the ranges always cover the
/// page exactly.
pub struct FreeList {
    ranges: Vec<FreeRange>,
}

impl FreeList {
    /// A fresh list covering `capacity` bytes: one free range
    /// spanning the whole page.
    pub fn new(capacity: u64) -> Self {
        Self {
            ranges: vec![FreeRange { offset: 0, size: capacity }],
        }
    }

    /// Find room for `size` bytes aligned to `alignment` and
    /// carve it out of the list, returning the chosen offset.
    ///
    /// The scan is first-fit: ranges are visited in offset
    /// order and the first one that can hold the aligned
    /// request wins. There is no best-fit search; pages are
    /// bounded and coalescing on free keeps fragmentation in
    /// check, so the linear scan stays short.
    pub fn place(&mut self, size: u64, alignment: u64) -> Option<u64> {
        debug_assert!(alignment.is_power_of_two());

        // For each candidate range, the placement offset is the
        // smallest aligned offset at or past the start of the
        // range. The bytes skipped over to reach it (the front
        // slack) are wasted, so the candidate only works if
        // slack and request together fit in the range.
        let (index, offset) = self.ranges
            .iter()
            .enumerate()
            .find_map(|(index, range)| {
                let offset = align_up(range.offset, alignment);
                let slack = offset - range.offset;

                (slack + size <= range.size).then_some((index, offset))
            })?;

        let range = self.ranges[index];
        let front = offset - range.offset;
        let back = range.end() - (offset + size);

        // The placed region splits its range into up to two
        // remainders: the front slack left before the aligned
        // offset, and whatever is left past the end of the
        // region. Empty remainders are dropped rather than kept
        // as zero-sized ranges.
        match (front > 0, back > 0) {
            (false, false) => {
                self.ranges.remove(index);
            }
            (false, true) => {
                self.ranges[index] = FreeRange { offset: offset + size, size: back };
            }
            (true, false) => {
                self.ranges[index].size = front;
            }
            (true, true) => {
                self.ranges[index].size = front;
                self.ranges.insert(index + 1, FreeRange { offset: offset + size, size: back });
            }
        }

        Some(offset)
    }

    /// Return a previously placed region to the list, merging
    /// it with its neighbors where they touch.
    pub fn release(&mut self, offset: u64, size: u64) {
        // Insert at the position that keeps the list ordered.
        // Overlap is impossible: live allocations are disjoint
        // from each other and from every free range.
        let index = self.ranges.partition_point(|range| range.offset < offset);
        self.ranges.insert(index, FreeRange { offset, size });

        // Coalesce on both sides, successor first so that the
        // inserted index stays valid for the predecessor check.
        // Checking only one side leaves seams in the list that
        // never heal and fragment the page under alloc/free
        // churn at varying sizes.
        if index + 1 < self.ranges.len() && self.ranges[index].end() == self.ranges[index + 1].offset {
            self.ranges[index].size += self.ranges[index + 1].size;
            self.ranges.remove(index + 1);
        }

        if index > 0 && self.ranges[index - 1].end() == self.ranges[index].offset {
            self.ranges[index - 1].size += self.ranges[index].size;
            self.ranges.remove(index);
        }
    }

    /// Discard all bookkeeping and return to a single free
    /// range spanning the whole page.
    pub fn reset(&mut self, capacity: u64) {
        self.ranges.clear();
        self.ranges.push(FreeRange { offset: 0, size: capacity });
    }

    /// The current free ranges, ordered by offset.
    pub fn ranges(&self) -> &[FreeRange] {
        &self.ranges
    }
}

fn align_down(value: u64, alignment: u64) -> u64 {
    // Clear every bit of the value below the alignment, which
    // is the next lower multiple of it (alignments are powers
    // of two, so "alignment - 1" is a mask of exactly those
    // bits).
    value & !(alignment - 1)
}

fn align_up(value: u64, alignment: u64) -> u64 {
    // Aligning up is aligning down the value offset by one
    // alignment step (alignment - 1).
    align_down(value + alignment - 1, alignment)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: u64 = 1024;

    fn ranges(list: &FreeList) -> Vec<(u64, u64)> {
        list.ranges().iter().map(|range| (range.offset, range.size)).collect()
    }

    // The free ranges plus the live regions must tile the page
    // exactly, with nothing overlapping and nothing unmerged.
    fn check_invariants(list: &FreeList, live: &[(u64, u64)]) {
        let mut regions = ranges(list);
        regions.extend_from_slice(live);
        regions.sort();

        let mut cursor = 0;
        for (offset, size) in regions {
            assert!(offset >= cursor, "overlapping regions at offset {offset}");
            cursor = offset + size;
        }
        assert_eq!(cursor, CAPACITY, "page not fully covered");

        for pair in list.ranges().windows(2) {
            assert!(pair[0].end() < pair[1].offset, "unmerged adjacent free ranges");
        }
    }

    #[test]
    fn fresh_list_spans_whole_page() {
        let list = FreeList::new(CAPACITY);
        assert_eq!(ranges(&list), vec![(0, CAPACITY)]);
    }

    #[test]
    fn first_fit_reuses_lowest_offset() {
        let mut list = FreeList::new(CAPACITY);

        // 100 bytes go at the very start; the next request is
        // placed at the next multiple of 16 past them.
        assert_eq!(list.place(100, 16), Some(0));
        assert_eq!(list.place(200, 16), Some(112));

        // Once the first region is returned, the lowest
        // satisfying range is the hole at the start again.
        list.release(0, 100);
        assert_eq!(list.place(100, 16), Some(0));
    }

    #[test]
    fn placement_is_aligned() {
        let mut list = FreeList::new(CAPACITY);

        for (size, alignment) in [(3, 1), (17, 4), (100, 16), (128, 128), (1, 64)] {
            let offset = list.place(size, alignment).unwrap();
            assert_eq!(offset % alignment, 0);
            assert!(offset + size <= CAPACITY);
        }
    }

    #[test]
    fn exact_fit_removes_the_range() {
        let mut list = FreeList::new(CAPACITY);
        assert_eq!(list.place(CAPACITY, 1), Some(0));
        assert!(list.ranges().is_empty());
    }

    #[test]
    fn split_keeps_front_and_back_remainders() {
        let mut list = FreeList::new(CAPACITY);

        // Occupy [0, 100) so the list starts at an unaligned
        // offset, then force front slack with a 128-byte
        // alignment: the region lands at 128, leaving both the
        // slack [100, 128) and the tail [192, 1024) free.
        assert_eq!(list.place(100, 1), Some(0));
        assert_eq!(list.place(64, 128), Some(128));
        assert_eq!(ranges(&list), vec![(100, 28), (192, 832)]);
    }

    #[test]
    fn back_only_split_shrinks_in_place() {
        let mut list = FreeList::new(CAPACITY);
        assert_eq!(list.place(100, 1), Some(0));
        assert_eq!(ranges(&list), vec![(100, 924)]);
    }

    #[test]
    fn rejects_requests_that_cannot_fit() {
        let mut list = FreeList::new(CAPACITY);
        assert_eq!(list.place(CAPACITY + 1, 1), None);

        // A range can also be too small only because of the
        // alignment slack in front of the region.
        assert_eq!(list.place(1000, 1), Some(0));
        assert_eq!(list.place(20, 64), None);
    }

    #[test]
    fn release_merges_regardless_of_order() {
        // Three adjacent equal regions, freed in every order:
        // the end state must always be the single full-page
        // range, which exercises the merge with both neighbors
        // at once.
        for order in [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
            let mut list = FreeList::new(CAPACITY);
            let offsets = [
                list.place(100, 4).unwrap(),
                list.place(100, 4).unwrap(),
                list.place(100, 4).unwrap(),
            ];
            assert_eq!(offsets, [0, 100, 200]);

            for region in order {
                list.release(offsets[region], 100);
            }
            assert_eq!(ranges(&list), vec![(0, CAPACITY)]);
        }
    }

    #[test]
    fn capacity_is_restored_after_full_free() {
        let mut list = FreeList::new(CAPACITY);

        let mut live: Vec<(u64, u64)> = (0..8)
            .map(|_| (list.place(96, 32).unwrap(), 96))
            .collect();

        // Free from the middle out, so both merge directions
        // are hit.
        for index in [4, 2, 6, 1, 5, 3, 7, 0] {
            let (offset, size) = live[index];
            list.release(offset, size);
        }
        live.clear();

        assert_eq!(ranges(&list), vec![(0, CAPACITY)]);
    }

    #[test]
    fn invariants_hold_under_churn() {
        let mut list = FreeList::new(CAPACITY);
        let mut live: Vec<(u64, u64)> = Vec::new();

        // A fixed alloc/free script at varying sizes and
        // alignments, checking the tiling invariant after every
        // step.
        let script: &[(bool, u64, u64)] = &[
            (true, 100, 16),
            (true, 37, 4),
            (true, 256, 64),
            (false, 0, 0),
            (true, 12, 8),
            (true, 300, 32),
            (false, 1, 0),
            (false, 2, 0),
            (true, 64, 128),
            (true, 180, 16),
            (false, 0, 0),
            (true, 48, 8),
        ];

        for &(alloc, size, alignment) in script {
            if alloc {
                let offset = list.place(size, alignment).unwrap();
                assert_eq!(offset % alignment, 0);
                live.push((offset, size));
            } else {
                let (offset, freed) = live.remove(size as usize);
                list.release(offset, freed);
            }
            check_invariants(&list, &live);
        }

        while let Some((offset, size)) = live.pop() {
            list.release(offset, size);
            check_invariants(&list, &live);
        }
        assert_eq!(ranges(&list), vec![(0, CAPACITY)]);
    }

    #[test]
    fn reset_restores_the_single_range() {
        let mut list = FreeList::new(CAPACITY);
        list.place(500, 16).unwrap();
        list.place(100, 4).unwrap();

        list.reset(CAPACITY);
        assert_eq!(ranges(&list), vec![(0, CAPACITY)]);
    }
}
