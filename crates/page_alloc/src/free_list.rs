use core::{iter::FusedIterator, marker::PhantomData, ptr::NonNull};

/// Link stored in the first bytes of every free page.
struct Run {
    /// Pointer to the next free page.
    next: Option<NonNull<Run>>,
}

/// An intrusive LIFO list of free pages.
///
/// The list owns no storage of its own: each free page holds the link to the
/// next one. Only this module reinterprets page bytes as a [`Run`]; callers
/// deal in page pointers.
#[derive(Debug)]
pub struct FreeList<const PAGE_SIZE: usize> {
    /// The most recently pushed page.
    head: Option<NonNull<Run>>,
    /// Number of pages reachable from `head`.
    len: usize,
}

unsafe impl<const PAGE_SIZE: usize> Send for FreeList<PAGE_SIZE> {}

impl<const PAGE_SIZE: usize> Default for FreeList<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize> FreeList<PAGE_SIZE> {
    /// Smallest page able to hold a free-list link.
    pub const MIN_PAGE_SIZE: usize = size_of::<Run>();

    #[must_use]
    pub const fn new() -> Self {
        const {
            assert!(size_of::<Run>() <= PAGE_SIZE);
            assert!(PAGE_SIZE % align_of::<Run>() == 0);
        }

        Self { head: None, len: 0 }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Links `page` in as the new head of the list.
    ///
    /// # Safety
    ///
    /// `page` must point to `PAGE_SIZE` writable bytes that no one will
    /// access until the page is popped again, and it must not already be on
    /// the list.
    ///
    /// # Panics
    ///
    /// Panics if `page` is not page-aligned.
    pub unsafe fn push(&mut self, page: NonNull<u8>) {
        assert_eq!(
            page.addr().get() % PAGE_SIZE,
            0,
            "free list: misaligned page {page:p}"
        );

        let run = page.cast::<Run>();
        unsafe {
            run.write(Run { next: self.head });
        }
        self.head = Some(run);
        self.len += 1;
    }

    /// Unlinks the head of the list.
    ///
    /// Returns `None` if the list is empty.
    pub fn pop(&mut self) -> Option<NonNull<u8>> {
        let run = self.head?;
        self.head = unsafe { run.as_ref().next };
        self.len -= 1;
        Some(run.cast())
    }

    /// Walks the list from head to tail.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.head,
            remaining: self.len,
            _list: PhantomData,
        }
    }
}

/// Iterator over the pages of a [`FreeList`], most recently freed first.
pub struct Iter<'a> {
    next: Option<NonNull<Run>>,
    remaining: usize,
    _list: PhantomData<&'a ()>,
}

impl Iterator for Iter<'_> {
    type Item = NonNull<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let run = self.next?;
        self.next = unsafe { run.as_ref().next };
        self.remaining -= 1;
        Some(run.cast())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}
impl FusedIterator for Iter<'_> {}
