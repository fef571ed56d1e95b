//! Page-fault handling
//!
//! A TLB miss (or write to a clean entry) traps here. The handler validates
//! the faulting address against the process's regions, heap, and stack,
//! enforces write permission, materializes the page on first touch, and
//! installs the translation in the TLB.

use super::VirtAddr;
use crate::arch::mips::tlb::{TLBLO_DIRTY, TLBLO_VALID};
use crate::bootstrap::Kernel;
use crate::error::{Errno, KernelResult};
use crate::process::pcb::Process;

/// Why the MMU trapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// Load from an untranslated page.
    Read,
    /// Store to an untranslated page.
    Write,
    /// Store through a translation without the dirty bit: a write to a page
    /// the kernel mapped read-only.
    ReadOnly,
}

/// Handle a translation fault at `faultaddress` on behalf of `proc`.
///
/// On success a TLB entry covers the page and the faulting instruction can
/// be retried. On failure the caller kills the access (EFAULT) or reports
/// memory exhaustion (ENOMEM).
pub fn vm_fault(
    kern: &Kernel,
    proc: &Process,
    faulttype: FaultType,
    faultaddress: VirtAddr,
) -> KernelResult<()> {
    let fault_page = faultaddress.page_align_down();

    let mut guard = proc.addrspace.lock();
    let space = guard.as_mut().ok_or(Errno::Efault)?;

    let writable = space.classify(fault_page).ok_or(Errno::Efault)?;

    if faulttype == FaultType::ReadOnly && !writable {
        return Err(Errno::Efault);
    }

    let frame = space.map_page(&kern.ram, &kern.coremap, fault_page)?;

    let ehi = fault_page.as_usize() as u32;
    let elo = frame.as_usize() as u32 | TLBLO_VALID | if writable { TLBLO_DIRTY } else { 0 };
    kern.tlb.insert(ehi, elo);

    log::trace!(
        "vm_fault: {:?} at {} -> {} (writable={})",
        faulttype,
        fault_page,
        frame,
        writable
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mips::tlb::NUM_TLB;
    use crate::arch::mips::USERSTACK;
    use crate::bootstrap::{Kernel, KernelConfig};
    use crate::mm::addrspace::{AddressSpace, RegionFlags};
    use crate::mm::PAGE_SIZE;
    use crate::process::pcb::{Pid, Process};
    use alloc::sync::Arc;

    const TEXT_BASE: usize = 0x0040_0000;

    fn kern_and_proc() -> (Kernel, Arc<Process>) {
        let kern = Kernel::bootstrap(KernelConfig::default());
        let proc = kern
            .pid_table
            .alloc(|pid: Pid| Arc::new(Process::bare(pid, "vmtest")))
            .unwrap();
        let mut space = AddressSpace::new();
        space
            .define_region(
                VirtAddr::new(TEXT_BASE),
                2 * PAGE_SIZE,
                RegionFlags::READ | RegionFlags::EXEC,
            )
            .unwrap();
        space.define_stack();
        proc.setas(Some(space));
        (kern, proc)
    }

    #[test]
    fn test_fault_in_region_installs_tlb_entry() {
        let (kern, proc) = kern_and_proc();
        let va = VirtAddr::new(TEXT_BASE + 0x123);
        vm_fault(&kern, &proc, FaultType::Read, va).unwrap();

        let entry = kern.tlb.probe(TEXT_BASE).unwrap();
        assert!(entry.is_valid());
        // Read-only region: no dirty bit.
        assert_eq!(entry.elo & TLBLO_DIRTY, 0);

        // The frame exists and is zero-filled.
        let guard = proc.addrspace.lock();
        let frame = guard.as_ref().unwrap().lookup(va.page_align_down());
        assert!(!frame.is_null());
        let mut buf = [0xaau8; 32];
        kern.ram.read_bytes(frame, &mut buf);
        assert_eq!(buf, [0u8; 32]);
    }

    #[test]
    fn test_fault_outside_everything_is_efault() {
        let (kern, proc) = kern_and_proc();
        let before = kern.tlb.valid_count();
        assert_eq!(
            vm_fault(&kern, &proc, FaultType::Read, VirtAddr::new(0x0900_0000)).unwrap_err(),
            Errno::Efault
        );
        // No entry installed on the failure path.
        assert_eq!(kern.tlb.valid_count(), before);
    }

    #[test]
    fn test_readonly_violation_respects_loading_flag() {
        let (kern, proc) = kern_and_proc();
        let va = VirtAddr::new(TEXT_BASE);

        assert_eq!(
            vm_fault(&kern, &proc, FaultType::ReadOnly, va).unwrap_err(),
            Errno::Efault
        );

        proc.addrspace.lock().as_mut().unwrap().prepare_load();
        vm_fault(&kern, &proc, FaultType::ReadOnly, va).unwrap();
        let entry = kern.tlb.probe(TEXT_BASE).unwrap();
        assert_ne!(entry.elo & TLBLO_DIRTY, 0);
    }

    #[test]
    fn test_stack_page_faults_writable() {
        let (kern, proc) = kern_and_proc();
        let va = VirtAddr::new(USERSTACK - 8);
        vm_fault(&kern, &proc, FaultType::Write, va).unwrap();
        let entry = kern.tlb.probe(USERSTACK - PAGE_SIZE).unwrap();
        assert_ne!(entry.elo & TLBLO_DIRTY, 0);

        // One page below the reserved stack page: invalid.
        assert_eq!(
            vm_fault(
                &kern,
                &proc,
                FaultType::Write,
                VirtAddr::new(USERSTACK - PAGE_SIZE - 4)
            )
            .unwrap_err(),
            Errno::Efault
        );
    }

    #[test]
    fn test_process_without_addrspace_faults() {
        let kern = Kernel::bootstrap(KernelConfig::default());
        let proc = kern
            .pid_table
            .alloc(|pid: Pid| Arc::new(Process::bare(pid, "bare")))
            .unwrap();
        assert_eq!(
            vm_fault(&kern, &proc, FaultType::Read, VirtAddr::new(TEXT_BASE)).unwrap_err(),
            Errno::Efault
        );
    }

    #[test]
    fn test_fault_storm_survives_full_tlb() {
        let (kern, proc) = kern_and_proc();
        {
            let mut guard = proc.addrspace.lock();
            guard
                .as_mut()
                .unwrap()
                .define_region(
                    VirtAddr::new(0x0100_0000),
                    (NUM_TLB + 8) * PAGE_SIZE,
                    RegionFlags::READ | RegionFlags::WRITE,
                )
                .unwrap();
        }
        for i in 0..(NUM_TLB + 8) {
            let va = VirtAddr::new(0x0100_0000 + i * PAGE_SIZE);
            vm_fault(&kern, &proc, FaultType::Write, va).unwrap();
        }
        assert_eq!(kern.tlb.valid_count(), NUM_TLB);
    }
}
