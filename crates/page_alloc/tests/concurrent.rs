use std::{
    collections::HashSet,
    ops::Range,
    ptr::NonNull,
    sync::{Barrier, Mutex as StdMutex},
    thread,
};

use page_alloc::{
    ALLOC_FILL, DEFAULT_PAGE_SIZE, MemoryLayout, Page, PageAllocError, PageAllocator, PageState,
    PhysAddr, SpinPageAllocator,
};

const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE;
const THREADS: usize = 8;

#[repr(C, align(4096))]
struct Frame([u8; PAGE_SIZE]);

fn arena(pages: usize) -> Range<PhysAddr> {
    let frames = Vec::leak(
        (0..pages)
            .map(|_| Frame([0; PAGE_SIZE]))
            .collect::<Vec<_>>(),
    );
    let range = frames.as_mut_ptr_range();
    PhysAddr::from(NonNull::new(range.start.cast::<u8>()).unwrap())
        ..PhysAddr::from(NonNull::new(range.end.cast::<u8>()).unwrap())
}

fn spin_allocator(pages: usize) -> SpinPageAllocator<PAGE_SIZE> {
    let range = arena(pages);
    unsafe { SpinPageAllocator::new(MemoryLayout::new(range.start, range.end)) }.unwrap()
}

#[test]
fn boot_accounting_with_real_page_size() {
    // 64 pages need 256 bytes of counts: a single table page.
    let allocator = spin_allocator(64);
    let info = allocator.info();
    assert_eq!(info.page_size, 4096);
    assert_eq!(info.total_pages, 63);
    assert_eq!(info.free_pages, 63);
}

#[test]
fn concurrent_allocations_are_disjoint() {
    let allocator = spin_allocator(64);
    let barrier = Barrier::new(THREADS);

    let per_thread = thread::scope(|s| {
        let handles = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    let mut pages = vec![];
                    loop {
                        match allocator.allocate() {
                            Ok(page) => pages.push(PhysAddr::from(page)),
                            Err(PageAllocError::NoFreePage) => break pages,
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    let mut seen = HashSet::new();
    for pa in per_thread.iter().flatten() {
        assert!(seen.insert(*pa), "page {pa:#x} handed out twice");
        assert_eq!(allocator.usage(*pa), 1);
    }
    assert_eq!(seen.len(), 63);
    assert_eq!(allocator.info().free_pages, 0);

    for pa in seen {
        unsafe { allocator.release(pa.as_non_null()) };
    }
    assert_eq!(allocator.info().free_pages, 63);
}

#[test]
fn last_concurrent_release_reclaims_once() {
    let allocator = spin_allocator(32);
    let total = allocator.info().total_pages;

    let page = allocator.allocate().unwrap();
    let pa = PhysAddr::from(page);
    for _ in 1..THREADS {
        allocator.increment_reference(pa);
    }
    assert_eq!(allocator.usage(pa), u32::try_from(THREADS).unwrap());

    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                barrier.wait();
                unsafe { allocator.release(pa.as_non_null()) };
            });
        }
    });

    assert_eq!(allocator.usage(pa), 0);
    assert_eq!(allocator.info().free_pages, total);
    let mut occurrences = 0;
    allocator.for_each_free_page(|free| {
        if free == pa {
            occurrences += 1;
        }
    });
    assert_eq!(occurrences, 1);
}

#[test]
fn balanced_concurrent_sharing() {
    let allocator = spin_allocator(32);
    let page = allocator.allocate().unwrap();
    let pa = PhysAddr::from(page);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..1000 {
                    allocator.increment_reference(pa);
                    assert!(allocator.decrement_reference(pa) >= 1);
                }
            });
        }
    });

    assert_eq!(allocator.usage(pa), 1);
    assert!(!allocator.is_free(pa));
}

#[test]
fn churn_with_page_handles() {
    type StdAllocator = PageAllocator<StdMutex<PageState<PAGE_SIZE>>, PAGE_SIZE>;

    let range = arena(40);
    let allocator =
        unsafe { StdAllocator::new(MemoryLayout::new(range.start, range.end)) }.unwrap();
    let total = allocator.info().total_pages;

    thread::scope(|s| {
        for id in 0..THREADS {
            let allocator = &allocator;
            s.spawn(move || {
                let tag = u8::try_from(id).unwrap() + 0x10;
                for _ in 0..200 {
                    let Ok(mut page) = Page::alloc(allocator) else {
                        continue;
                    };
                    assert!(page.as_bytes().iter().all(|&b| b == ALLOC_FILL));
                    page.get_mut().unwrap().fill(tag);
                    let shared = page.share();
                    assert!(shared.as_bytes().iter().all(|&b| b == tag));
                }
            });
        }
    });

    assert_eq!(allocator.info().free_pages, total);
}
