use core::{fmt, ops::Range, slice};

use crate::{PhysAddr, error::LayoutError};

/// Per-page owner counts for a managed range of physical memory.
///
/// The table lives in the first pages of the range it describes and covers
/// every page of that range, its own included. A count of `0` means the
/// page is free (or not yet released at boot); a positive count is the
/// number of live owners.
pub struct UsageTable<const PAGE_SIZE: usize> {
    /// Address of page index `0`.
    base: PhysAddr,
    counts: &'static mut [u32],
}

impl<const PAGE_SIZE: usize> fmt::Debug for UsageTable<PAGE_SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageTable")
            .field("base", &self.base)
            .field("pages", &self.counts.len())
            .field("table_pages", &self.table_pages())
            .finish_non_exhaustive()
    }
}

impl<const PAGE_SIZE: usize> UsageTable<PAGE_SIZE> {
    /// Number of pages needed to store counts for `total_pages` pages.
    #[must_use]
    pub const fn pages_for(total_pages: usize) -> usize {
        (total_pages * size_of::<u32>()).div_ceil(PAGE_SIZE)
    }

    /// Places a table at the start of `range`, sized for the whole range,
    /// with every count set to `1`.
    ///
    /// Pages holding the table itself keep that count forever; every other
    /// page has to be released once before it can be allocated.
    ///
    /// # Safety
    ///
    /// `range` must be page-aligned memory that is writable, unused by
    /// anything else and valid for the rest of the program.
    pub unsafe fn carve(range: Range<PhysAddr>) -> Result<Self, LayoutError> {
        assert!(range.start.is_aligned(PAGE_SIZE));
        assert!(range.end.is_aligned(PAGE_SIZE));

        let total_pages = range.end.offset_from(range.start) / PAGE_SIZE;
        let table_pages = Self::pages_for(total_pages);
        if table_pages >= total_pages {
            return Err(LayoutError::TableTooLarge {
                table_pages,
                total_pages,
            });
        }

        let ptr = range.start.as_non_null().cast::<u32>();
        for i in 0..total_pages {
            unsafe {
                ptr.add(i).write(1);
            }
        }
        let counts = unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), total_pages) };

        Ok(Self {
            base: range.start,
            counts,
        })
    }

    /// Number of pages the table describes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Number of pages occupied by the table.
    #[must_use]
    pub fn table_pages(&self) -> usize {
        Self::pages_for(self.counts.len())
    }

    /// First page after the table's own storage.
    #[must_use]
    pub fn end(&self) -> PhysAddr {
        self.base.byte_add(self.table_pages() * PAGE_SIZE)
    }

    /// Returns the index of the page at `pa`.
    ///
    /// # Panics
    ///
    /// Panics if `pa` is not page-aligned or lies outside the described
    /// range.
    #[must_use]
    pub fn page_index(&self, pa: PhysAddr) -> usize {
        assert!(pa.is_aligned(PAGE_SIZE), "page_index: misaligned {pa:#x}");
        assert!(
            pa >= self.base,
            "page_index: {pa:#x} below base {:#x}",
            self.base
        );
        let index = pa.offset_from(self.base) / PAGE_SIZE;
        assert!(
            index < self.counts.len(),
            "page_index: {pa:#x} beyond managed range"
        );
        index
    }

    /// Returns the address of the page with the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`len`](Self::len).
    #[must_use]
    pub fn page_addr(&self, index: usize) -> PhysAddr {
        assert!(
            index < self.counts.len(),
            "page_addr: index {index} beyond managed range ({} pages)",
            self.counts.len()
        );
        self.base.byte_add(index * PAGE_SIZE)
    }

    #[must_use]
    pub fn read_usage(&self, index: usize) -> u32 {
        self.counts[index]
    }

    pub fn write_usage(&mut self, index: usize, value: u32) {
        self.counts[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::test_util::{PAGE_SIZE, arena};

    #[test]
    fn carve_marks_every_page_used() {
        let range = arena(40);
        let table = unsafe { UsageTable::<PAGE_SIZE>::carve(range.clone()) }.unwrap();

        assert_eq!(table.len(), 40);
        // 40 counts of 4 bytes in 64-byte pages.
        assert_eq!(table.table_pages(), 3);
        assert_eq!(table.end(), range.start.byte_add(3 * PAGE_SIZE));
        assert!((0..table.len()).all(|i| table.read_usage(i) == 1));
    }

    #[test]
    fn index_mapping_is_injective() {
        let range = arena(32);
        let table = unsafe { UsageTable::<PAGE_SIZE>::carve(range.clone()) }.unwrap();

        let mut seen = HashSet::new();
        let mut pa = range.start;
        while pa < range.end {
            let index = table.page_index(pa);
            assert!(seen.insert(index));
            assert_eq!(table.page_addr(index), pa);
            pa = pa.byte_add(PAGE_SIZE);
        }
        assert_eq!(seen.len(), 32);
    }

    #[test]
    fn write_then_read() {
        let range = arena(20);
        let mut table = unsafe { UsageTable::<PAGE_SIZE>::carve(range) }.unwrap();
        table.write_usage(7, 0);
        table.write_usage(8, 3);
        assert_eq!(table.read_usage(7), 0);
        assert_eq!(table.read_usage(8), 3);
        assert_eq!(table.read_usage(9), 1);
    }

    #[test]
    fn too_small_range_is_rejected() {
        let range = arena(1);
        let err = unsafe { UsageTable::<PAGE_SIZE>::carve(range) }.unwrap_err();
        assert_eq!(
            err,
            LayoutError::TableTooLarge {
                table_pages: 1,
                total_pages: 1,
            }
        );
    }

    #[test]
    #[should_panic = "misaligned"]
    fn misaligned_index_panics() {
        let range = arena(20);
        let table = unsafe { UsageTable::<PAGE_SIZE>::carve(range.clone()) }.unwrap();
        let _ = table.page_index(range.start.byte_add(4));
    }

    #[test]
    #[should_panic = "beyond managed range"]
    fn out_of_range_index_panics() {
        let range = arena(20);
        let table = unsafe { UsageTable::<PAGE_SIZE>::carve(range.clone()) }.unwrap();
        let _ = table.page_index(range.end);
    }

    #[test]
    #[should_panic = "page_addr: index 20 beyond managed range"]
    fn out_of_range_addr_panics() {
        let range = arena(20);
        let table = unsafe { UsageTable::<PAGE_SIZE>::carve(range) }.unwrap();
        let _ = table.page_addr(20);
    }
}
