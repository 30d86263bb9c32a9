//! Physical memory allocator, for user processes,
//! kernel stacks, page-table pages,
//! and pipe buffers. Allocates whole 4096-byte pages.
//!
//! Every CPU has its own free list. Pages are freed onto the list of
//! the CPU doing the freeing, and allocated from it when it has any.
//! A CPU whose list is empty takes a page from the next CPU that has one.

use crate::{
    arch::{
        mem::{is_page_aligned, round_down_page, round_up_page, PAGE_SIZE},
        trap::InterruptBlocker,
    },
    hal::Hart,
    proc::cpu::Cpus,
    sync::spinmutex::{LockStats, SpinMutex},
    ConfigError, NCPU,
};
use arrayvec::ArrayVec;
use core::{
    alloc::{GlobalAlloc, Layout},
    ops::{Deref, DerefMut},
    ptr::{null_mut, NonNull},
    sync::atomic::{AtomicU64, Ordering},
};

/// Fill for freed pages, to catch dangling refs.
pub const FREE_JUNK: u8 = 1;
/// Fill for newly allocated pages, to catch use of uninitialized memory.
pub const ALLOC_JUNK: u8 = 5;

/// A free page, holding the link to the next one.
#[repr(C)]
struct Run {
    next: Option<NonNull<Run>>,
}

#[derive(Default)]
struct FreeList {
    head: Option<NonNull<Run>>,
    len: usize,
}
impl FreeList {
    /// # Safety
    ///
    /// `run` must be a whole page that nothing else refers to.
    unsafe fn push(&mut self, mut run: NonNull<Run>) {
        run.as_mut().next = self.head;
        self.head = Some(run);
        self.len += 1;
    }
    fn pop(&mut self) -> Option<NonNull<Run>> {
        let run = self.head?;
        self.head = unsafe { run.as_ref().next };
        self.len -= 1;
        Some(run)
    }
}
// The pages on the list are owned by it.
unsafe impl Send for FreeList {}

/// One allocated page of physical memory.
#[derive(Debug)]
pub struct Page {
    ptr: NonNull<[u8; PAGE_SIZE]>,
}
impl Page {
    /// Take ownership of the page at physical address `pa`.
    ///
    /// Returns `None` for address 0.
    ///
    /// # Safety
    ///
    /// The memory at `pa` must be valid for `PAGE_SIZE` bytes and not
    /// be in use by anything else.
    pub unsafe fn from_addr(pa: usize) -> Option<Page> {
        Some(Page {
            ptr: NonNull::new(pa as *mut [u8; PAGE_SIZE])?,
        })
    }
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }
    /// Give up ownership without freeing the page.
    pub fn into_addr(self) -> usize {
        self.addr()
    }
}
impl Deref for Page {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { self.ptr.as_ref() }
    }
}
impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { self.ptr.as_mut() }
    }
}
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KmemStats {
    /// Free pages on each CPU's list.
    pub free: ArrayVec<usize, NCPU>,
    /// Pages allocated from another CPU's list.
    pub steals: u64,
    /// Allocations that found every list empty.
    pub failures: u64,
    /// Free list locks, summed.
    pub lock: LockStats,
}

/// The physical page allocator.
pub struct Kmem<'c, H: Hart> {
    cpus: &'c Cpus<H>,
    /// First managed page.
    start: usize,
    /// End of the last managed page.
    end: usize,
    freelists: ArrayVec<SpinMutex<FreeList>, NCPU>,
    steals: AtomicU64,
    failures: AtomicU64,
}
impl<'c, H: Hart> Kmem<'c, H> {
    /// Manage every whole page in `pa_start..pa_end`.
    ///
    /// The pages all start out on the list of the CPU running this.
    ///
    /// # Safety
    ///
    /// The range must be memory that is valid to read and write and
    /// that nothing else uses, for as long as the allocator and the
    /// pages it hands out live.
    pub unsafe fn new(
        cpus: &'c Cpus<H>,
        pa_start: usize,
        pa_end: usize,
    ) -> Result<Kmem<'c, H>, ConfigError> {
        let start = round_up_page(pa_start);
        let end = round_down_page(pa_end);
        if start >= end {
            return Err(ConfigError::EmptyRange {
                start: pa_start,
                end: pa_end,
            });
        }

        let mut freelists = ArrayVec::new();
        for _ in 0..cpus.len() {
            freelists.push(SpinMutex::new(FreeList::default()));
        }
        let kmem = Kmem {
            cpus,
            start,
            end,
            freelists,
            steals: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        };
        kmem.free_range(start, end);
        log::info!(
            "kmem: {} pages at {:#x}..{:#x} for {} cpus",
            (end - start) / PAGE_SIZE,
            start,
            end,
            cpus.len()
        );
        Ok(kmem)
    }

    unsafe fn free_range(&self, pa_start: usize, pa_end: usize) {
        let mut p = round_up_page(pa_start);
        while p + PAGE_SIZE <= pa_end {
            if let Some(page) = Page::from_addr(p) {
                self.kfree(page);
            }
            p += PAGE_SIZE;
        }
    }

    /// Free a page of physical memory, which normally should have
    /// been returned by a call to kalloc(). (The exception is when
    /// initializing the allocator; see new above.)
    ///
    /// The page goes on the list of the CPU calling this.
    pub fn kfree(&self, page: Page) {
        let pa = page.addr();
        if !is_page_aligned(pa) || pa < self.start || pa >= self.end {
            panic!("kfree");
        }

        let run = page.ptr.cast::<Run>();
        unsafe {
            // Fill with junk to catch dangling refs.
            page.as_ptr().write_bytes(FREE_JUNK, PAGE_SIZE);
            run.as_ptr().write(Run { next: None });
        }

        let intr = InterruptBlocker::new(self.cpus);
        let mut list = self.freelists[intr.cpu_id()].lock(&intr);
        unsafe { list.push(run) };
    }

    /// Allocate one 4096-byte page of physical memory.
    ///
    /// Returns `None` if the memory cannot be allocated.
    pub fn kalloc(&self) -> Option<Page> {
        let intr = InterruptBlocker::new(self.cpus);
        let cpu = intr.cpu_id();
        let ncpu = self.freelists.len();

        let mut run = self.freelists[cpu].lock(&intr).pop();
        if run.is_none() {
            for other in (1..ncpu).map(|i| (cpu + i) % ncpu) {
                run = self.freelists[other].lock(&intr).pop();
                if run.is_some() {
                    self.steals.fetch_add(1, Ordering::Relaxed);
                    log::debug!("kalloc: cpu {} took a page from cpu {}", cpu, other);
                    break;
                }
            }
        }
        drop(intr);

        let Some(run) = run else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("kalloc: out of memory");
            return None;
        };

        let page = Page { ptr: run.cast() };
        unsafe {
            // Fill with junk.
            page.as_ptr().write_bytes(ALLOC_JUNK, PAGE_SIZE);
        }
        Some(page)
    }

    /// Whether `pa` is a page this allocator manages.
    pub fn contains(&self, pa: usize) -> bool {
        is_page_aligned(pa) && pa >= self.start && pa < self.end
    }
    /// Number of pages managed, free or not.
    pub fn total_pages(&self) -> usize {
        (self.end - self.start) / PAGE_SIZE
    }
    pub fn free_pages(&self) -> usize {
        self.stats().free.iter().sum()
    }

    pub fn stats(&self) -> KmemStats {
        let intr = InterruptBlocker::new(self.cpus);
        let mut stats = KmemStats {
            steals: self.steals.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            ..KmemStats::default()
        };
        for list in &self.freelists {
            stats.free.push(list.lock(&intr).len);
            stats.lock = stats.lock + list.stats();
        }
        stats
    }
}

/// Single pages only: larger or more aligned layouts fail.
unsafe impl<'c, H: Hart> GlobalAlloc for Kmem<'c, H> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() > PAGE_SIZE || layout.align() > PAGE_SIZE {
            return null_mut();
        }
        match self.kalloc() {
            Some(page) => page.into_addr() as *mut u8,
            None => null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        match Page::from_addr(ptr as usize) {
            Some(page) => self.kfree(page),
            None => panic!("kfree"),
        }
    }
}
