//! Software-managed TLB
//!
//! A small, fully associative cache of virtual-to-physical translations with
//! the classic MIPS entry layout. Misses trap to [`crate::mm::page_fault`];
//! the kernel refills entries by hand. All mutation happens under the TLB's
//! own spinlock, which stands in for the interrupts-off window the real
//! hardware sequence requires.

use spin::Mutex;

use super::MIPS_KSEG0;
use crate::mm::PAGE_SIZE;

/// Number of TLB slots.
pub const NUM_TLB: usize = 64;

/// EntryHi: mask selecting the virtual page number.
pub const TLBHI_VPAGE: u32 = 0xffff_f000;

/// EntryLo: mask selecting the physical page frame.
pub const TLBLO_PPAGE: u32 = 0xffff_f000;

/// EntryLo: page is writable.
pub const TLBLO_DIRTY: u32 = 0x0000_0400;

/// EntryLo: entry is live and may be used for translation.
pub const TLBLO_VALID: u32 = 0x0000_0200;

/// EntryLo value for an invalidated slot.
pub const fn tlblo_invalid() -> u32 {
    0
}

/// EntryHi value for an invalidated slot.
///
/// Distinct kseg0 addresses per slot: the hardware refuses duplicate VPNs,
/// and kseg0 addresses never match a user translation.
pub const fn tlbhi_invalid(slot: usize) -> u32 {
    (MIPS_KSEG0 + slot * PAGE_SIZE) as u32
}

/// One TLB entry as an (EntryHi, EntryLo) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub ehi: u32,
    pub elo: u32,
}

impl TlbEntry {
    const fn invalid(slot: usize) -> Self {
        Self {
            ehi: tlbhi_invalid(slot),
            elo: tlblo_invalid(),
        }
    }

    /// Whether the entry may be used for translation.
    pub const fn is_valid(&self) -> bool {
        self.elo & TLBLO_VALID != 0
    }
}

struct TlbInner {
    entries: [TlbEntry; NUM_TLB],
    /// xorshift state for eviction; any non-zero seed works.
    rand_state: u32,
}

/// The simulated TLB. One per CPU; this kernel models a single CPU.
pub struct Tlb {
    inner: Mutex<TlbInner>,
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlb {
    pub fn new() -> Self {
        let mut entries = [TlbEntry::invalid(0); NUM_TLB];
        let mut slot = 0;
        while slot < NUM_TLB {
            entries[slot] = TlbEntry::invalid(slot);
            slot += 1;
        }
        Self {
            inner: Mutex::new(TlbInner {
                entries,
                rand_state: 0x9e37_79b9,
            }),
        }
    }

    /// Read slot `slot`.
    pub fn read(&self, slot: usize) -> TlbEntry {
        debug_assert!(slot < NUM_TLB);
        self.inner.lock().entries[slot]
    }

    /// Write slot `slot`.
    pub fn write(&self, slot: usize, ehi: u32, elo: u32) {
        debug_assert!(slot < NUM_TLB);
        self.inner.lock().entries[slot] = TlbEntry { ehi, elo };
    }

    /// Install a translation: first invalid slot if one exists, otherwise a
    /// uniformly random victim. The whole scan-and-write is one critical
    /// section, matching the interrupts-off insertion the fault handler needs.
    pub fn insert(&self, ehi: u32, elo: u32) {
        let mut inner = self.inner.lock();
        for slot in 0..NUM_TLB {
            if !inner.entries[slot].is_valid() {
                inner.entries[slot] = TlbEntry { ehi, elo };
                return;
            }
        }
        let victim = next_random(&mut inner.rand_state) as usize % NUM_TLB;
        inner.entries[victim] = TlbEntry { ehi, elo };
    }

    /// Invalidate every slot. Used on address-space activation.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        for slot in 0..NUM_TLB {
            inner.entries[slot] = TlbEntry::invalid(slot);
        }
    }

    /// Look up a live translation for `vaddr`, if any.
    pub fn probe(&self, vaddr: usize) -> Option<TlbEntry> {
        let vpage = vaddr as u32 & TLBHI_VPAGE;
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .find(|e| e.is_valid() && e.ehi & TLBHI_VPAGE == vpage)
            .copied()
    }

    /// Number of live entries.
    pub fn valid_count(&self) -> usize {
        self.inner.lock().entries.iter().filter(|e| e.is_valid()).count()
    }
}

/// Multiprocessor TLB invalidation. This kernel is single-CPU; reaching these
/// is a design error, not a recoverable condition.
pub fn tlb_shootdown_all() -> ! {
    panic!("tlb shootdown on a single-CPU kernel");
}

fn next_random(state: &mut u32) -> u32 {
    // xorshift32
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    *state = x;
    x
}
