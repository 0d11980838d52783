use core::ops::Range;

use crate::{PhysAddr, error::LayoutError, free_list::FreeList};

/// Bytes per page on the kernel's target.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Platform memory layout handed to the allocator at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// First address after the kernel image.
    ///
    /// Defined by the linker script.
    pub kernel_end: PhysAddr,
    /// One past the last byte of physical RAM.
    pub phys_top: PhysAddr,
}

impl MemoryLayout {
    #[must_use]
    pub const fn new(kernel_end: PhysAddr, phys_top: PhysAddr) -> Self {
        Self {
            kernel_end,
            phys_top,
        }
    }

    /// Returns the page-aligned range of physical memory the allocator owns:
    /// from the first page boundary after the kernel image up to the last
    /// whole page below `phys_top`.
    pub fn managed_range<const PAGE_SIZE: usize>(&self) -> Result<Range<PhysAddr>, LayoutError> {
        if !PAGE_SIZE.is_power_of_two() || PAGE_SIZE < FreeList::<PAGE_SIZE>::MIN_PAGE_SIZE {
            return Err(LayoutError::InvalidPageSize(PAGE_SIZE));
        }

        let start = self.kernel_end.align_up(PAGE_SIZE);
        let end = self.phys_top.align_down(PAGE_SIZE);
        if start >= end || start.addr() == 0 {
            return Err(LayoutError::Empty {
                kernel_end: self.kernel_end,
                phys_top: self.phys_top,
            });
        }
        Ok(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 4096;

    #[test]
    fn range_is_rounded_inwards() {
        let layout = MemoryLayout::new(PhysAddr::new(0x8002_1234), PhysAddr::new(0x8800_0800));
        let range = layout.managed_range::<PAGE_SIZE>().unwrap();
        assert_eq!(range.start, PhysAddr::new(0x8002_2000));
        assert_eq!(range.end, PhysAddr::new(0x8800_0000));
    }

    #[test]
    fn aligned_kernel_end_is_kept() {
        let layout = MemoryLayout::new(PhysAddr::new(0x8002_0000), PhysAddr::new(0x8003_0000));
        let range = layout.managed_range::<PAGE_SIZE>().unwrap();
        assert_eq!(range.start, PhysAddr::new(0x8002_0000));
    }

    #[test]
    fn empty_range_is_rejected() {
        let layout = MemoryLayout::new(PhysAddr::new(0x8002_0010), PhysAddr::new(0x8002_0ff0));
        assert_eq!(
            layout.managed_range::<PAGE_SIZE>(),
            Err(LayoutError::Empty {
                kernel_end: layout.kernel_end,
                phys_top: layout.phys_top,
            })
        );
    }

    #[test]
    fn bad_page_size_is_rejected() {
        let layout = MemoryLayout::new(PhysAddr::new(0x1000), PhysAddr::new(0x10000));
        assert_eq!(
            layout.managed_range::<3000>(),
            Err(LayoutError::InvalidPageSize(3000))
        );
        assert_eq!(
            layout.managed_range::<2>(),
            Err(LayoutError::InvalidPageSize(2))
        );
    }
}
