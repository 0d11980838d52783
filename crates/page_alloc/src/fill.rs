//! Junk patterns written over whole pages.
//!
//! A page handed out by the allocator is filled with [`ALLOC_FILL`] so that
//! callers relying on zeroed memory fail loudly. A page going back onto the
//! free list is filled with [`FREE_FILL`] to catch dangling references.

use core::ptr::NonNull;

/// Byte written over a page right before `allocate` returns it.
pub const ALLOC_FILL: u8 = 5;

/// Byte written over a page right before it is linked into the free list.
pub const FREE_FILL: u8 = 1;

const _: () = {
    assert!(ALLOC_FILL != FREE_FILL);
    assert!(ALLOC_FILL != 0 && FREE_FILL != 0);
};

/// Overwrites the whole page starting at `page` with `byte`.
///
/// # Safety
///
/// `page` must point to `PAGE_SIZE` writable bytes that nobody else is
/// accessing.
pub(crate) unsafe fn fill_page<const PAGE_SIZE: usize>(page: NonNull<u8>, byte: u8) {
    unsafe {
        page.write_bytes(byte, PAGE_SIZE);
    }
}
