use crate::PhysAddr;

/// Recoverable failure of an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PageAllocError {
    #[error("no free page")]
    NoFreePage,
}

/// A boot-time memory layout the allocator cannot manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("page size {0} is not a power of two large enough for a free-list link")]
    InvalidPageSize(usize),
    #[error("no whole page between kernel end {kernel_end:#x} and memory top {phys_top:#x}")]
    Empty {
        kernel_end: PhysAddr,
        phys_top: PhysAddr,
    },
    #[error("usage table needs {table_pages} pages but only {total_pages} are managed")]
    TableTooLarge {
        table_pages: usize,
        total_pages: usize,
    },
}
