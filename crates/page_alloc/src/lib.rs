//! Reference-counted physical page allocator.
//!
//! Pages are handed out from an intrusive free list and each page carries an
//! owner count in a table stored at the start of the managed memory, so a
//! page can be shared (e.g. copy-on-write after `fork`) and is reclaimed only
//! when its last owner releases it.

#![cfg_attr(not(test), no_std)]

pub mod addr;
pub mod allocator;
pub mod error;
pub mod fill;
pub mod free_list;
pub mod layout;
pub mod page;
pub mod usage;

pub use self::{
    addr::PhysAddr,
    allocator::{MemoryInfo, PageAllocator, PageState, SpinPageAllocator},
    error::{LayoutError, PageAllocError},
    fill::{ALLOC_FILL, FREE_FILL},
    free_list::FreeList,
    layout::{DEFAULT_PAGE_SIZE, MemoryLayout},
    page::Page,
    usage::UsageTable,
};
