use core::{fmt, mem, ptr::NonNull, slice};

use mutex_api::Mutex;

use crate::{
    PhysAddr,
    allocator::{PageAllocator, PageState},
    error::PageAllocError,
};

/// One owner's reference to an allocated page.
///
/// Dropping the handle releases the reference; the page goes back to the
/// free list when the last handle (or raw owner) lets go.
pub struct Page<'a, M, const PAGE_SIZE: usize>
where
    M: Mutex<Data = PageState<PAGE_SIZE>>,
{
    ptr: NonNull<u8>,
    allocator: &'a PageAllocator<M, PAGE_SIZE>,
}

unsafe impl<M, const PAGE_SIZE: usize> Send for Page<'_, M, PAGE_SIZE> where
    M: Mutex<Data = PageState<PAGE_SIZE>> + Sync
{
}

impl<M, const PAGE_SIZE: usize> fmt::Debug for Page<'_, M, PAGE_SIZE>
where
    M: Mutex<Data = PageState<PAGE_SIZE>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("pa", &self.pa())
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

impl<M, const PAGE_SIZE: usize> Drop for Page<'_, M, PAGE_SIZE>
where
    M: Mutex<Data = PageState<PAGE_SIZE>>,
{
    fn drop(&mut self) {
        unsafe { self.allocator.release(self.ptr) }
    }
}

impl<'a, M, const PAGE_SIZE: usize> Page<'a, M, PAGE_SIZE>
where
    M: Mutex<Data = PageState<PAGE_SIZE>>,
{
    /// Allocates a page filled with junk.
    pub fn alloc(allocator: &'a PageAllocator<M, PAGE_SIZE>) -> Result<Self, PageAllocError> {
        let ptr = allocator.allocate()?;
        Ok(Self { ptr, allocator })
    }

    /// Allocates a zeroed page.
    pub fn alloc_zeroed(
        allocator: &'a PageAllocator<M, PAGE_SIZE>,
    ) -> Result<Self, PageAllocError> {
        let ptr = allocator.allocate_zeroed()?;
        Ok(Self { ptr, allocator })
    }

    /// Takes over a reference previously given up with
    /// [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    ///
    /// `pa` must carry a reference owned by the caller, obtained from
    /// `allocator`.
    pub unsafe fn from_raw(allocator: &'a PageAllocator<M, PAGE_SIZE>, pa: PhysAddr) -> Self {
        assert!(allocator.contains(pa), "from_raw: {pa:#x} is not a heap page");
        Self {
            ptr: pa.as_non_null(),
            allocator,
        }
    }

    /// Consumes the handle without releasing its reference.
    ///
    /// The reference must later be handed back through
    /// [`from_raw`](Self::from_raw) or released with
    /// [`PageAllocator::release`].
    #[must_use]
    pub fn into_raw(self) -> PhysAddr {
        let pa = self.pa();
        mem::forget(self);
        pa
    }

    /// Adds an owner to the page and returns the new owner's handle.
    #[must_use]
    pub fn share(&self) -> Self {
        self.allocator.increment_reference(self.pa());
        Self {
            ptr: self.ptr,
            allocator: self.allocator,
        }
    }

    #[must_use]
    pub fn pa(&self) -> PhysAddr {
        PhysAddr::from(self.ptr)
    }

    /// Returns the current number of owners.
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.allocator.usage(self.pa())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), PAGE_SIZE) }
    }

    /// Returns the page contents for writing if this handle is the only
    /// owner.
    ///
    /// A shared page must be copied before it is written.
    pub fn get_mut(&mut self) -> Option<&mut [u8]> {
        (self.ref_count() == 1)
            .then(|| unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), PAGE_SIZE) })
    }

    /// Returns a page this handle can write to, copying the contents into a
    /// fresh page first if the current one is shared.
    pub fn make_mut(&mut self) -> Result<&mut [u8], PageAllocError> {
        if self.ref_count() > 1 {
            let mut copy = Self::alloc(self.allocator)?;
            unsafe {
                copy.ptr.copy_from_nonoverlapping(self.ptr, PAGE_SIZE);
            }
            mem::swap(self, &mut copy);
        }
        Ok(unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), PAGE_SIZE) })
    }
}
