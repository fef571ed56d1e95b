//! Physical frame allocator (coremap)
//!
//! One entry per usable physical frame, built at `vm_bootstrap` time from the
//! RAM bounds reported by the boot layer. Supports single-frame allocation
//! for user pages and contiguous multi-frame allocation for the kernel
//! (first-fit scan). Before bootstrap, allocation falls through to
//! [`Ram::stealmem`] and the free paths do nothing.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::ram::Ram;
use super::{PhysAddr, PAGE_SIZE};
use crate::arch::mips::{kvaddr_to_paddr, paddr_to_kvaddr};

/// Per-frame bookkeeping.
///
/// `block_size` is meaningful only on the first frame of an allocation and
/// records how many frames the allocation owns; interior frames carry 0.
#[derive(Debug, Clone, Copy)]
struct CoremapEntry {
    free: bool,
    block_size: usize,
}

struct CoremapInner {
    entries: Vec<CoremapEntry>,
    /// First frame the allocator manages (just above the coremap itself).
    first_paddr: PhysAddr,
    /// Number of frames after the coremap.
    total_pages: usize,
    ready: bool,
}

/// Allocator state: the entry array plus its spinlock.
pub struct CoreMap {
    inner: Mutex<CoremapInner>,
}

/// Accounting snapshot, used by callers that audit the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoremapStats {
    pub total_pages: usize,
    pub free_pages: usize,
    pub allocated_pages: usize,
    /// Sum of `block_size` over allocation heads. Equals `allocated_pages`
    /// whenever the coremap is consistent.
    pub head_block_sum: usize,
}

impl Default for CoreMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreMap {
    /// An empty, not-yet-bootstrapped coremap. Allocation in this state is
    /// forwarded to the boot layer.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CoremapInner {
                entries: Vec::new(),
                first_paddr: PhysAddr::NULL,
                total_pages: 0,
                ready: false,
            }),
        }
    }

    /// Build the coremap from the RAM bounds. Called once during kernel
    /// initialization; failure to fit the coremap itself is fatal.
    pub fn bootstrap(&self, ram: &Ram) {
        let hi = super::round_down_page(ram.getsize().as_usize());
        let lo = super::round_up_page(ram.getfirstfree().as_usize());

        let total_ram_pages = (hi - lo) / PAGE_SIZE;
        let coremap_bytes = total_ram_pages * core::mem::size_of::<CoremapEntry>();
        let coremap_pages = coremap_bytes.div_ceil(PAGE_SIZE);

        // The entry array lives at the bottom of free RAM; those frames are
        // stolen and never come back.
        let stolen = ram.stealmem(coremap_pages);
        assert!(!stolen.is_null(), "no room for the coremap");
        assert_eq!(stolen.as_usize(), lo);

        let first_paddr = PhysAddr::new(lo + coremap_pages * PAGE_SIZE);
        let total_pages = (hi - first_paddr.as_usize()) / PAGE_SIZE;

        let mut inner = self.inner.lock();
        assert!(!inner.ready, "coremap bootstrapped twice");
        inner.entries = vec![
            CoremapEntry {
                free: true,
                block_size: 0,
            };
            total_pages
        ];
        inner.first_paddr = first_paddr;
        inner.total_pages = total_pages;
        inner.ready = true;

        log::debug!(
            "coremap: {} frames managed starting at {}",
            total_pages,
            first_paddr
        );
    }

    /// Allocate one physical frame for a user page.
    ///
    /// Returns `None` on exhaustion; callers surface that as out-of-memory.
    pub fn alloc_page(&self, ram: &Ram) -> Option<PhysAddr> {
        let mut inner = self.inner.lock();
        if !inner.ready {
            let pa = ram.stealmem(1);
            return if pa.is_null() { None } else { Some(pa) };
        }

        for i in 0..inner.total_pages {
            if inner.entries[i].free {
                inner.entries[i] = CoremapEntry {
                    free: false,
                    block_size: 1,
                };
                return Some(PhysAddr::new(inner.first_paddr.as_usize() + i * PAGE_SIZE));
            }
        }
        None
    }

    /// Free a single frame previously returned by [`CoreMap::alloc_page`].
    ///
    /// Addresses below `first_paddr` belong to the kernel image or coremap
    /// metadata and are silently ignored.
    pub fn free_page(&self, pa: PhysAddr) {
        let mut inner = self.inner.lock();
        if !inner.ready {
            return;
        }
        if pa < inner.first_paddr {
            return;
        }

        let idx = (pa.as_usize() - inner.first_paddr.as_usize()) / PAGE_SIZE;
        assert!(idx < inner.total_pages, "free_page beyond coremap");
        assert_eq!(
            inner.entries[idx].block_size, 1,
            "free_page on a non-head or multi-frame block"
        );

        inner.entries[idx] = CoremapEntry {
            free: true,
            block_size: 0,
        };
    }

    /// Allocate `npages` contiguous frames for the kernel and return the
    /// kseg0 virtual address of the run, or `None` if no run fits.
    pub fn alloc_kpages(&self, ram: &Ram, npages: usize) -> Option<usize> {
        assert!(npages > 0);
        let mut inner = self.inner.lock();
        if !inner.ready {
            let pa = ram.stealmem(npages);
            return if pa.is_null() {
                None
            } else {
                Some(paddr_to_kvaddr(pa))
            };
        }

        let mut i = 0;
        while i < inner.total_pages {
            if !inner.entries[i].free {
                i += 1;
                continue;
            }

            // Check frames [i, i + npages) are all free.
            let mut run_ok = true;
            for j in 0..npages {
                if i + j >= inner.total_pages || !inner.entries[i + j].free {
                    run_ok = false;
                    break;
                }
            }

            if run_ok {
                inner.entries[i] = CoremapEntry {
                    free: false,
                    block_size: npages,
                };
                for j in 1..npages {
                    inner.entries[i + j] = CoremapEntry {
                        free: false,
                        block_size: 0,
                    };
                }
                let pa = PhysAddr::new(inner.first_paddr.as_usize() + i * PAGE_SIZE);
                return Some(paddr_to_kvaddr(pa));
            }
            i += 1;
        }
        None
    }

    /// Free a contiguous run allocated by [`CoreMap::alloc_kpages`].
    ///
    /// The head frame's recorded `block_size` determines exactly how many
    /// frames are released; a zero `block_size` at the head is a caller bug.
    pub fn free_kpages(&self, kvaddr: usize) {
        let mut inner = self.inner.lock();
        if !inner.ready {
            return;
        }

        let pa = kvaddr_to_paddr(kvaddr);
        if pa < inner.first_paddr {
            return;
        }

        let idx = (pa.as_usize() - inner.first_paddr.as_usize()) / PAGE_SIZE;
        assert!(idx < inner.total_pages, "free_kpages beyond coremap");

        let block_len = inner.entries[idx].block_size;
        assert!(block_len > 0, "free_kpages on a non-head frame");

        for i in 0..block_len {
            inner.entries[idx + i] = CoremapEntry {
                free: true,
                block_size: 0,
            };
        }
    }

    /// Whether `vm_bootstrap` has run.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// First frame the allocator manages.
    pub fn first_paddr(&self) -> PhysAddr {
        self.inner.lock().first_paddr
    }

    /// Current accounting snapshot.
    pub fn stats(&self) -> CoremapStats {
        let inner = self.inner.lock();
        let free_pages = inner.entries.iter().filter(|e| e.free).count();
        let allocated_pages = inner.total_pages - free_pages;
        let head_block_sum = inner
            .entries
            .iter()
            .filter(|e| !e.free)
            .map(|e| e.block_size)
            .sum();
        CoremapStats {
            total_pages: inner.total_pages,
            free_pages,
            allocated_pages,
            head_block_sum,
        }
    }
}
