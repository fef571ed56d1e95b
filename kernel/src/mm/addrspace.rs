//! Per-process virtual address spaces
//!
//! An address space is a list of permission-tagged regions (text, data, ...)
//! plus a heap and a stack, backed by a two-level page table:
//!
//! ```text
//!  vaddr:  | 31 ........ 22 | 21 ........ 12 | 11 ........ 0 |
//!          |   L1 index     |   L2 index     |  page offset  |
//! ```
//!
//! Level-2 tables are allocated on demand, so sparse address spaces stay
//! small. A page-table entry of the null frame address means "not mapped";
//! the first touch allocates and zeroes a frame. The heap begins immediately
//! above the highest region and grows only via `sbrk`; the stack occupies a
//! single pre-reserved page below [`USERSTACK`].

use alloc::boxed::Box;
use alloc::vec::Vec;

use bitflags::bitflags;

use super::coremap::CoreMap;
use super::ram::Ram;
use super::{PhysAddr, VirtAddr, PAGE_FRAME, PAGE_SIZE};
use crate::arch::mips::tlb::Tlb;
use crate::arch::mips::USERSTACK;
use crate::error::{Errno, KernelResult};

/// Entries in the level-1 table.
pub const PT_L1_SIZE: usize = 1024;

/// Entries in each level-2 table.
pub const PT_L2_SIZE: usize = 1024;

const PT_L1_SHIFT: usize = 22;
const PT_L2_SHIFT: usize = 12;
const PT_INDEX_MASK: usize = 0x3ff;

bitflags! {
    /// Region permission flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

/// A contiguous, page-aligned range of virtual addresses with uniform
/// permissions.
#[derive(Debug, Clone)]
pub struct Region {
    pub vbase: VirtAddr,
    pub npages: usize,
    pub flags: RegionFlags,
}

impl Region {
    fn contains(&self, va: VirtAddr) -> bool {
        let start = self.vbase.as_usize();
        let end = start + self.npages * PAGE_SIZE;
        (start..end).contains(&va.as_usize())
    }
}

type L2Table = Box<[PhysAddr; PT_L2_SIZE]>;

/// A process's virtual address space.
#[derive(Debug)]
pub struct AddressSpace {
    regions: Vec<Region>,
    pt_l1: Vec<Option<L2Table>>,
    heap_base: usize,
    heap_end: usize,
    stack_base: usize,
    stack_end: usize,
    /// While set, writes are permitted into read-only regions so the program
    /// loader can fill the text segment.
    loading: bool,
}

impl AddressSpace {
    /// An empty address space: no regions, nothing mapped, zero bounds.
    pub fn new() -> Self {
        let mut pt_l1 = Vec::with_capacity(PT_L1_SIZE);
        pt_l1.resize_with(PT_L1_SIZE, || None);
        Self {
            regions: Vec::new(),
            pt_l1,
            heap_base: 0,
            heap_end: 0,
            stack_base: 0,
            stack_end: 0,
            loading: false,
        }
    }

    /// Define a segment at `vaddr` of `size` bytes. Base and length are
    /// page-aligned here; the flags are enforced at fault time.
    ///
    /// The heap is placed immediately after the highest region end seen so
    /// far.
    pub fn define_region(
        &mut self,
        vaddr: VirtAddr,
        size: usize,
        flags: RegionFlags,
    ) -> KernelResult<()> {
        let mut sz = size + (vaddr.as_usize() & !PAGE_FRAME);
        let vbase = vaddr.page_align_down();
        sz = super::round_up_page(sz);
        let npages = sz / PAGE_SIZE;

        if vbase.as_usize() + sz > USERSTACK {
            return Err(Errno::Efault);
        }

        self.regions.push(Region {
            vbase,
            npages,
            flags,
        });

        let region_end = vbase.as_usize() + npages * PAGE_SIZE;
        if self.heap_base == 0 || region_end > self.heap_base {
            self.heap_base = region_end;
            self.heap_end = region_end;
        }
        Ok(())
    }

    /// Reserve the user stack and return the initial stack pointer.
    pub fn define_stack(&mut self) -> VirtAddr {
        self.stack_base = USERSTACK;
        self.stack_end = USERSTACK - PAGE_SIZE;
        VirtAddr::new(USERSTACK)
    }

    /// Enter loading mode: region permission checks treat every region as
    /// writable until [`AddressSpace::complete_load`].
    pub fn prepare_load(&mut self) {
        self.loading = true;
    }

    /// Leave loading mode and flush stale translations that were installed
    /// with write permission.
    pub fn complete_load(&mut self, tlb: &Tlb) {
        self.loading = false;
        self.activate(tlb);
    }

    /// Make this the active address space: invalidate the entire TLB so no
    /// translation from the previous space survives.
    pub fn activate(&self, tlb: &Tlb) {
        tlb.flush();
    }

    /// Counterpart of [`AddressSpace::activate`]; nothing to do in this
    /// design, the next activate flushes.
    pub fn deactivate(&self) {}

    /// Classify `va`: `Some(writable)` if it falls in a region, the heap, or
    /// the stack; `None` otherwise. Heap and stack are always writable.
    pub fn classify(&self, va: VirtAddr) -> Option<bool> {
        for r in &self.regions {
            if r.contains(va) {
                return Some(r.flags.contains(RegionFlags::WRITE) || self.loading);
            }
        }
        if (self.heap_base..self.heap_end).contains(&va.as_usize()) {
            return Some(true);
        }
        if (self.stack_end..self.stack_base).contains(&va.as_usize()) {
            return Some(true);
        }
        None
    }

    /// Look up the frame mapped at the page containing `va`, or the null
    /// address if nothing is mapped there yet.
    pub fn lookup(&self, va: VirtAddr) -> PhysAddr {
        let (l1, l2) = Self::pt_indices(va);
        match &self.pt_l1[l1] {
            Some(table) => table[l2],
            None => PhysAddr::NULL,
        }
    }

    /// Find or create the mapping for the page containing `va`: allocate the
    /// level-2 table on first use, and allocate + zero a frame on first
    /// touch.
    ///
    /// The caller has already established (via [`AddressSpace::classify`])
    /// that `va` is a legal user address.
    pub fn map_page(
        &mut self,
        ram: &Ram,
        coremap: &CoreMap,
        va: VirtAddr,
    ) -> KernelResult<PhysAddr> {
        let (l1, l2) = Self::pt_indices(va);

        let table = self.pt_l1[l1]
            .get_or_insert_with(|| Box::new([PhysAddr::NULL; PT_L2_SIZE]));

        let mut pa = table[l2];
        if pa.is_null() {
            pa = coremap.alloc_page(ram).ok_or(Errno::Enomem)?;
            ram.zero_frame(pa);
            table[l2] = pa;
        }
        Ok(pa)
    }

    /// Deep-copy this address space: a new region list, new heap/stack
    /// metadata, and a fresh frame holding a byte copy of every mapped page.
    ///
    /// On allocation failure the partially built space is torn down and
    /// nothing leaks.
    pub fn copy(&self, ram: &Ram, coremap: &CoreMap) -> KernelResult<AddressSpace> {
        let mut new = AddressSpace::new();
        new.regions = self.regions.clone();
        new.heap_base = self.heap_base;
        new.heap_end = self.heap_end;
        new.stack_base = self.stack_base;
        new.stack_end = self.stack_end;
        new.loading = self.loading;

        for (l1, slot) in self.pt_l1.iter().enumerate() {
            let Some(old_l2) = slot else { continue };

            let mut new_l2: L2Table = Box::new([PhysAddr::NULL; PT_L2_SIZE]);
            for (l2, &old_pa) in old_l2.iter().enumerate() {
                if old_pa.is_null() {
                    continue;
                }
                let Some(new_pa) = coremap.alloc_page(ram) else {
                    // Install what we have so destroy releases it, then bail.
                    new.pt_l1[l1] = Some(new_l2);
                    new.destroy(coremap);
                    return Err(Errno::Enomem);
                };
                ram.copy_frame(new_pa, old_pa);
                new_l2[l2] = new_pa;
            }
            new.pt_l1[l1] = Some(new_l2);
        }

        Ok(new)
    }

    /// Tear the space down: release every mapped frame to the coremap, then
    /// the level-2 tables and region list.
    ///
    /// Must not be called on the currently active space without first
    /// detaching it from the process and deactivating.
    pub fn destroy(mut self, coremap: &CoreMap) {
        for slot in self.pt_l1.iter_mut() {
            if let Some(table) = slot.take() {
                for &pa in table.iter() {
                    if !pa.is_null() {
                        coremap.free_page(pa);
                    }
                }
            }
        }
        self.regions.clear();
    }

    /// Number of frames currently mapped; used by accounting checks.
    pub fn resident_pages(&self) -> usize {
        self.pt_l1
            .iter()
            .flatten()
            .map(|t| t.iter().filter(|pa| !pa.is_null()).count())
            .sum()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn heap_base(&self) -> usize {
        self.heap_base
    }

    pub fn heap_end(&self) -> usize {
        self.heap_end
    }

    /// Move the heap break. Bounds checking is the caller's job (`sbrk`).
    pub fn set_heap_end(&mut self, new_end: usize) {
        self.heap_end = new_end;
    }

    pub fn stack_base(&self) -> usize {
        self.stack_base
    }

    pub fn stack_end(&self) -> usize {
        self.stack_end
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    fn pt_indices(va: VirtAddr) -> (usize, usize) {
        let addr = va.as_usize();
        let l1 = (addr >> PT_L1_SHIFT) & PT_INDEX_MASK;
        let l2 = (addr >> PT_L2_SHIFT) & PT_INDEX_MASK;
        (l1, l2)
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_mm() -> (Ram, CoreMap) {
        let ram = Ram::new(64, 8);
        let cm = CoreMap::new();
        cm.bootstrap(&ram);
        (ram, cm)
    }

    #[test]
    fn test_define_region_aligns_and_places_heap() {
        let mut space = AddressSpace::new();
        space
            .define_region(VirtAddr::new(0x0040_0010), 0x2000, RegionFlags::READ)
            .unwrap();

        let r = &space.regions()[0];
        assert_eq!(r.vbase.as_usize(), 0x0040_0000);
        // 0x10 of slop plus 0x2000 rounds to three pages.
        assert_eq!(r.npages, 3);
        assert_eq!(space.heap_base(), 0x0040_3000);
        assert_eq!(space.heap_end(), space.heap_base());
    }

    #[test]
    fn test_heap_tracks_highest_region() {
        let mut space = AddressSpace::new();
        space
            .define_region(VirtAddr::new(0x0100_0000), PAGE_SIZE, RegionFlags::READ)
            .unwrap();
        space
            .define_region(
                VirtAddr::new(0x0040_0000),
                PAGE_SIZE,
                RegionFlags::READ | RegionFlags::EXEC,
            )
            .unwrap();
        assert_eq!(space.heap_base(), 0x0100_1000);
    }

    #[test]
    fn test_classify_regions_heap_stack() {
        let mut space = AddressSpace::new();
        space
            .define_region(
                VirtAddr::new(0x0040_0000),
                PAGE_SIZE,
                RegionFlags::READ | RegionFlags::EXEC,
            )
            .unwrap();
        space.define_stack();

        // Read-only region.
        assert_eq!(space.classify(VirtAddr::new(0x0040_0123)), Some(false));
        // Loading mode grants writes.
        space.prepare_load();
        assert_eq!(space.classify(VirtAddr::new(0x0040_0123)), Some(true));
        space.loading = false;

        // Heap is empty until sbrk grows it.
        assert_eq!(space.classify(VirtAddr::new(space.heap_base())), None);
        space.set_heap_end(space.heap_base() + PAGE_SIZE);
        assert_eq!(space.classify(VirtAddr::new(space.heap_base())), Some(true));

        // Stack page, exclusive at the top.
        assert_eq!(space.classify(VirtAddr::new(USERSTACK - 1)), Some(true));
        assert_eq!(space.classify(VirtAddr::new(USERSTACK)), None);
        assert_eq!(
            space.classify(VirtAddr::new(USERSTACK - PAGE_SIZE - 1)),
            None
        );

        // Nowhere.
        assert_eq!(space.classify(VirtAddr::new(0x0800_0000)), None);
    }

    #[test]
    fn test_map_page_zeroes_on_first_touch() {
        let (ram, cm) = fresh_mm();
        let mut space = AddressSpace::new();
        space
            .define_region(VirtAddr::new(0x0040_0000), PAGE_SIZE, RegionFlags::WRITE)
            .unwrap();

        let va = VirtAddr::new(0x0040_0000);
        assert!(space.lookup(va).is_null());
        let pa = space.map_page(&ram, &cm, va).unwrap();
        assert!(!pa.is_null());

        let mut buf = [0xffu8; 16];
        ram.read_bytes(pa, &mut buf);
        assert_eq!(buf, [0u8; 16]);

        // Second touch returns the same frame.
        assert_eq!(space.map_page(&ram, &cm, va).unwrap(), pa);
        assert_eq!(space.resident_pages(), 1);
    }

    #[test]
    fn test_copy_duplicates_bytes_not_frames() {
        let (ram, cm) = fresh_mm();
        let mut space = AddressSpace::new();
        space
            .define_region(VirtAddr::new(0x0040_0000), PAGE_SIZE, RegionFlags::WRITE)
            .unwrap();
        let va = VirtAddr::new(0x0040_0000);
        let pa = space.map_page(&ram, &cm, va).unwrap();
        ram.write_bytes(pa, b"original");

        let clone = space.copy(&ram, &cm).unwrap();
        let clone_pa = clone.lookup(va);
        assert!(!clone_pa.is_null());
        assert_ne!(clone_pa, pa);

        let mut buf = [0u8; 8];
        ram.read_bytes(clone_pa, &mut buf);
        assert_eq!(&buf, b"original");

        // Writes to the copy do not bleed into the source.
        ram.write_bytes(clone_pa, b"mutated!");
        ram.read_bytes(pa, &mut buf);
        assert_eq!(&buf, b"original");

        assert_eq!(clone.heap_base(), space.heap_base());
        clone.destroy(&cm);
        space.destroy(&cm);
        assert_eq!(cm.stats().allocated_pages, 0);
    }

    #[test]
    fn test_copy_failure_releases_partial_allocations() {
        let ram = Ram::new(16, 8);
        let cm = CoreMap::new();
        cm.bootstrap(&ram);

        let mut space = AddressSpace::new();
        let total = cm.stats().total_pages;
        space
            .define_region(
                VirtAddr::new(0x0040_0000),
                total * PAGE_SIZE,
                RegionFlags::WRITE,
            )
            .unwrap();
        // Map more than half of RAM so a full copy cannot fit.
        for i in 0..(total / 2 + 1) {
            space
                .map_page(&ram, &cm, VirtAddr::new(0x0040_0000 + i * PAGE_SIZE))
                .unwrap();
        }

        let before = cm.stats().allocated_pages;
        assert_eq!(space.copy(&ram, &cm).unwrap_err(), Errno::Enomem);
        assert_eq!(cm.stats().allocated_pages, before);

        space.destroy(&cm);
        assert_eq!(cm.stats().allocated_pages, 0);
    }

    #[test]
    fn test_destroy_returns_all_frames() {
        let (ram, cm) = fresh_mm();
        let mut space = AddressSpace::new();
        space
            .define_region(VirtAddr::new(0x0040_0000), 4 * PAGE_SIZE, RegionFlags::WRITE)
            .unwrap();
        for i in 0..4 {
            space
                .map_page(&ram, &cm, VirtAddr::new(0x0040_0000 + i * PAGE_SIZE))
                .unwrap();
        }
        assert_eq!(cm.stats().allocated_pages, 4);
        space.destroy(&cm);
        assert_eq!(cm.stats().allocated_pages, 0);
    }
}
