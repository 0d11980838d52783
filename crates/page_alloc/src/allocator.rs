//! Physical memory allocator, for user processes,
//! kernel stacks, page-table pages,
//! and pipe buffers.
//!
//! Allocates whole pages and counts how many owners each page has, so that
//! a page mapped copy-on-write into several address spaces is reclaimed only
//! when its last owner lets go.

use core::{fmt, ops::Range, ptr::NonNull};

use mutex_api::{Mutex, SpinLock};

use crate::{
    PhysAddr,
    error::{LayoutError, PageAllocError},
    fill::{self, ALLOC_FILL, FREE_FILL},
    free_list::FreeList,
    layout::MemoryLayout,
    usage::UsageTable,
};

/// Memory usage summary, as reported to `sysinfo`-style callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Pages currently on the free list.
    pub free_pages: usize,
    /// Pages the allocator can hand out, excluding the usage table.
    pub total_pages: usize,
    pub page_size: usize,
}

/// The usage table and the free list, always locked together.
#[derive(Debug)]
pub struct PageState<const PAGE_SIZE: usize> {
    usage: UsageTable<PAGE_SIZE>,
    free_list: FreeList<PAGE_SIZE>,
}

impl<const PAGE_SIZE: usize> PageState<PAGE_SIZE> {
    /// Adds `delta` to the count of the page at `pa` and returns the new
    /// count.
    ///
    /// # Panics
    ///
    /// Panics if the count is zero and `delta` is not, or if the result does
    /// not fit in a count.
    fn change_usage(&mut self, pa: PhysAddr, delta: i32) -> u32 {
        let index = self.usage.page_index(pa);
        let current = self.usage.read_usage(index);
        // A free page is linked into the free list.
        assert!(
            current != 0 || delta == 0,
            "change_usage: usage zero (pa = {pa:#x})"
        );
        let Some(new) = current.checked_add_signed(delta) else {
            panic!("change_usage: usage out of range (pa = {pa:#x}, usage = {current}, delta = {delta})");
        };
        self.usage.write_usage(index, new);
        new
    }

    fn usage(&self, pa: PhysAddr) -> u32 {
        self.usage.read_usage(self.usage.page_index(pa))
    }
}

/// A page allocator whose usage table and free list sit behind the lock `M`.
pub struct PageAllocator<M, const PAGE_SIZE: usize>
where
    M: Mutex<Data = PageState<PAGE_SIZE>>,
{
    layout: MemoryLayout,
    /// Every page the allocator owns, usage table included.
    managed: Range<PhysAddr>,
    /// Pages that can ever be handed out.
    heap: Range<PhysAddr>,
    state: M,
}

/// The allocator the kernel runs with.
pub type SpinPageAllocator<const PAGE_SIZE: usize> =
    PageAllocator<SpinLock<PageState<PAGE_SIZE>>, PAGE_SIZE>;

impl<M, const PAGE_SIZE: usize> fmt::Debug for PageAllocator<M, PAGE_SIZE>
where
    M: Mutex<Data = PageState<PAGE_SIZE>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageAllocator")
            .field("layout", &self.layout)
            .field("managed", &self.managed)
            .field("heap", &self.heap)
            .finish_non_exhaustive()
    }
}

impl<M, const PAGE_SIZE: usize> PageAllocator<M, PAGE_SIZE>
where
    M: Mutex<Data = PageState<PAGE_SIZE>>,
{
    /// Takes over physical memory from the end of the kernel image up to the
    /// top of RAM.
    ///
    /// The usage table is placed at the start of that range with every page
    /// marked in use. Each page after the table is then released once, which
    /// links it into the free list. This is the only place where pages that
    /// were never allocated get released.
    ///
    /// # Safety
    ///
    /// The memory described by `layout` must be writable, unused by anything
    /// else and valid for as long as the allocator or any page it returned is
    /// in use. Only one allocator may manage a given range.
    pub unsafe fn new(layout: MemoryLayout) -> Result<Self, LayoutError> {
        let managed = layout.managed_range::<PAGE_SIZE>()?;
        let usage = unsafe { UsageTable::carve(managed.clone()) }?;
        let heap = usage.end()..managed.end;
        let table_pages = usage.table_pages();

        let this = Self {
            layout,
            managed,
            heap,
            state: M::new(PageState {
                usage,
                free_list: FreeList::new(),
            }),
        };

        let mut pa = this.heap.start;
        while pa < this.heap.end {
            unsafe {
                this.release(pa.as_non_null());
            }
            pa = pa.byte_add(PAGE_SIZE);
        }

        log::info!(
            "page allocator: managing {:#x}..{:#x}, {} table pages, {} free pages",
            this.managed.start,
            this.managed.end,
            table_pages,
            this.info().free_pages,
        );

        Ok(this)
    }

    /// Returns the layout the allocator was initialized with.
    #[must_use]
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Returns every page the allocator owns, usage table included.
    #[must_use]
    pub fn managed_range(&self) -> Range<PhysAddr> {
        self.managed.clone()
    }

    /// Returns the pages the allocator can hand out.
    #[must_use]
    pub fn heap_range(&self) -> Range<PhysAddr> {
        self.heap.clone()
    }

    /// Checks if `pa` is a page that this allocator hands out.
    ///
    /// Returns `false` for misaligned addresses.
    #[must_use]
    pub fn contains(&self, pa: PhysAddr) -> bool {
        pa.is_aligned(PAGE_SIZE) && self.heap.contains(&pa)
    }

    /// Panics unless `pa` is a page that this allocator hands out.
    #[track_caller]
    fn assert_heap_page(&self, op: &str, pa: PhysAddr) {
        assert!(pa.is_aligned(PAGE_SIZE), "{op}: misaligned page {pa:#x}");
        assert!(
            pa >= self.heap.start,
            "{op}: page {pa:#x} below heap start {:#x}",
            self.heap.start
        );
        assert!(
            pa < self.heap.end,
            "{op}: page {pa:#x} at or above memory top {:#x}",
            self.heap.end
        );
    }

    /// Allocates one page of physical memory.
    ///
    /// The page starts with a single owner, the caller. Its contents are
    /// filled with [`ALLOC_FILL`]; callers must not rely on them.
    ///
    /// Returns [`PageAllocError::NoFreePage`] if every page is in use.
    pub fn allocate(&self) -> Result<NonNull<u8>, PageAllocError> {
        let page = self.pop_free()?;
        unsafe {
            fill::fill_page::<PAGE_SIZE>(page, ALLOC_FILL);
        }
        Ok(page)
    }

    /// Allocates one zeroed page of physical memory.
    ///
    /// The page starts with a single owner, the caller.
    ///
    /// Returns [`PageAllocError::NoFreePage`] if every page is in use.
    pub fn allocate_zeroed(&self) -> Result<NonNull<u8>, PageAllocError> {
        let page = self.pop_free()?;
        unsafe {
            fill::fill_page::<PAGE_SIZE>(page, 0);
        }
        Ok(page)
    }

    fn pop_free(&self) -> Result<NonNull<u8>, PageAllocError> {
        let mut state = self.state.lock();
        let Some(page) = state.free_list.pop() else {
            drop(state);
            log::debug!("page allocator: out of free pages");
            return Err(PageAllocError::NoFreePage);
        };

        let pa = PhysAddr::from(page);
        let index = state.usage.page_index(pa);
        assert_eq!(
            state.usage.read_usage(index),
            0,
            "allocate: free page {pa:#x} is in use"
        );
        state.usage.write_usage(index, 1);
        Ok(page)
    }

    /// Drops one owner of `page`, reclaiming it once no owner remains.
    ///
    /// While other owners remain, the page stays live and is not touched.
    /// The last release fills the page with [`FREE_FILL`] and makes it the
    /// next page `allocate` returns.
    ///
    /// # Safety
    ///
    /// The caller must own a reference to `page`, obtained from
    /// [`allocate`](Self::allocate), [`allocate_zeroed`](Self::allocate_zeroed)
    /// or [`increment_reference`](Self::increment_reference), and must not
    /// access the page through it afterwards.
    ///
    /// # Panics
    ///
    /// Panics if `page` is misaligned, outside the allocator's heap or has no
    /// owner.
    #[track_caller]
    pub unsafe fn release(&self, page: NonNull<u8>) {
        let pa = PhysAddr::from(page);
        self.assert_heap_page("release", pa);

        // The decrement and the push happen under one lock so no other
        // context sees a zero-count page that is missing from the free list.
        let mut state = self.state.lock();
        if state.change_usage(pa, -1) > 0 {
            return;
        }

        // Fill with junk to catch dangling refs.
        unsafe {
            fill::fill_page::<PAGE_SIZE>(page, FREE_FILL);
            state.free_list.push(page);
        }
        drop(state);
        log::trace!("page allocator: reclaimed {pa:#x}");
    }

    /// Adds `delta` to the owner count of the page at `pa` and returns the
    /// new count.
    ///
    /// # Panics
    ///
    /// Panics if `pa` is not a page of the allocator's heap, if the page is
    /// free and `delta` is not zero, if the count of an allocated page would
    /// drop to zero (the last owner must call [`release`](Self::release)), or
    /// if the count would overflow.
    #[track_caller]
    pub fn change_usage(&self, pa: PhysAddr, delta: i32) -> u32 {
        self.assert_heap_page("change_usage", pa);
        let mut state = self.state.lock();
        let current = state.usage(pa);
        assert!(
            current == 0 || i64::from(current) + i64::from(delta) > 0,
            "change_usage: last owner of {pa:#x} must release the page"
        );
        state.change_usage(pa, delta)
    }

    /// Registers one more owner of the page at `pa`.
    ///
    /// Used when a page gains another mapping, e.g. when `fork` shares a
    /// page copy-on-write.
    ///
    /// # Panics
    ///
    /// Panics if the page is not currently allocated.
    #[track_caller]
    pub fn increment_reference(&self, pa: PhysAddr) {
        self.assert_heap_page("increment_reference", pa);
        let mut state = self.state.lock();
        assert!(
            state.usage(pa) > 0,
            "increment_reference: page {pa:#x} is not allocated"
        );
        state.change_usage(pa, 1);
    }

    /// Drops one owner of the page at `pa` and returns the remaining count,
    /// which is always at least `1`.
    ///
    /// The last owner gives the page back with [`release`](Self::release).
    ///
    /// # Panics
    ///
    /// Panics if the page has no owner or only one.
    #[track_caller]
    pub fn decrement_reference(&self, pa: PhysAddr) -> u32 {
        self.assert_heap_page("decrement_reference", pa);
        let mut state = self.state.lock();
        assert!(
            state.usage(pa) != 1,
            "decrement_reference: last owner of {pa:#x} must release the page"
        );
        state.change_usage(pa, -1)
    }

    /// Returns the number of owners of the page at `pa`.
    #[track_caller]
    #[must_use]
    pub fn usage(&self, pa: PhysAddr) -> u32 {
        self.assert_heap_page("usage", pa);
        self.state.lock().usage(pa)
    }

    /// Returns `true` if the page at `pa` is linked into the free list.
    ///
    /// Walks the whole list; meant for diagnostics.
    #[must_use]
    pub fn is_free(&self, pa: PhysAddr) -> bool {
        let state = self.state.lock();
        state.free_list.iter().any(|page| PhysAddr::from(page) == pa)
    }

    /// Calls `f` with every free page, most recently freed first.
    ///
    /// The allocator stays locked while `f` runs; `f` must not call back
    /// into it.
    pub fn for_each_free_page<F>(&self, mut f: F)
    where
        F: FnMut(PhysAddr),
    {
        let state = self.state.lock();
        for page in state.free_list.iter() {
            f(PhysAddr::from(page));
        }
    }

    /// Retrieves memory information, including the number of free and total
    /// pages.
    #[must_use]
    pub fn info(&self) -> MemoryInfo {
        let free_pages = self.state.lock().free_list.len();
        MemoryInfo {
            free_pages,
            total_pages: self.heap.end.offset_from(self.heap.start) / PAGE_SIZE,
            page_size: PAGE_SIZE,
        }
    }
}
