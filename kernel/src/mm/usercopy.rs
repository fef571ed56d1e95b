//! Kernel access to user memory
//!
//! Every byte the kernel moves to or from user space goes through here. The
//! transfer walks the process's page tables exactly as the MMU would:
//! addresses outside the user segment or outside every region fail with
//! EFAULT, writes require write permission (or loading mode), and pages are
//! allocated and zeroed on first touch.

use alloc::vec;
use alloc::vec::Vec;

use super::{PhysAddr, VirtAddr, PAGE_SIZE};
use crate::arch::mips::USERSPACETOP;
use crate::bootstrap::Kernel;
use crate::error::{Errno, KernelResult};
use crate::process::pcb::Process;

/// Copy `data` out to `uaddr` in `proc`'s address space.
pub fn copyout(kern: &Kernel, proc: &Process, data: &[u8], uaddr: VirtAddr) -> KernelResult<()> {
    transfer(kern, proc, uaddr, data.len(), |ram, pa, done, chunk| {
        ram.write_bytes(pa, &data[done..done + chunk]);
        Ok(())
    }, true)
}

/// Copy `buf.len()` bytes in from `uaddr` in `proc`'s address space.
pub fn copyin(kern: &Kernel, proc: &Process, uaddr: VirtAddr, buf: &mut [u8]) -> KernelResult<()> {
    let len = buf.len();
    transfer(kern, proc, uaddr, len, |ram, pa, done, chunk| {
        ram.read_bytes(pa, &mut buf[done..done + chunk]);
        Ok(())
    }, false)
}

/// Copy a NUL-terminated string in from user space, returning its bytes
/// without the terminator. Fails with ENAMETOOLONG if no NUL appears within
/// `maxlen` bytes.
pub fn copyinstr(
    kern: &Kernel,
    proc: &Process,
    uaddr: VirtAddr,
    maxlen: usize,
) -> KernelResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut scanned = 0;

    while scanned < maxlen {
        let va = uaddr.add(scanned);
        // Read up to the end of the current page or the length bound,
        // whichever is nearer.
        let in_page = PAGE_SIZE - va.page_offset();
        let chunk = core::cmp::min(in_page, maxlen - scanned);
        let mut buf = vec![0u8; chunk];
        copyin(kern, proc, va, &mut buf)?;

        if let Some(nul) = buf.iter().position(|&b| b == 0) {
            out.extend_from_slice(&buf[..nul]);
            return Ok(out);
        }
        out.extend_from_slice(&buf);
        scanned += chunk;
    }
    Err(Errno::Enametoolong)
}

/// Copy one 4-byte user word in from `uaddr`.
pub fn copyin_uword(kern: &Kernel, proc: &Process, uaddr: VirtAddr) -> KernelResult<u32> {
    let mut buf = [0u8; 4];
    copyin(kern, proc, uaddr, &mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

/// Copy one 4-byte user word out to `uaddr`.
pub fn copyout_uword(kern: &Kernel, proc: &Process, word: u32, uaddr: VirtAddr) -> KernelResult<()> {
    copyout(kern, proc, &word.to_ne_bytes(), uaddr)
}

/// Shared page-walking loop. `access` is handed the frame address of each
/// chunk; `is_write` decides whether write permission is required.
fn transfer(
    kern: &Kernel,
    proc: &Process,
    uaddr: VirtAddr,
    len: usize,
    mut access: impl FnMut(&super::ram::Ram, PhysAddr, usize, usize) -> KernelResult<()>,
    is_write: bool,
) -> KernelResult<()> {
    if len == 0 {
        return Ok(());
    }
    check_user_range(uaddr, len)?;

    let mut guard = proc.addrspace.lock();
    let space = guard.as_mut().ok_or(Errno::Efault)?;

    let mut done = 0;
    while done < len {
        let va = uaddr.add(done);
        let writable = space.classify(va).ok_or(Errno::Efault)?;
        if is_write && !writable {
            return Err(Errno::Efault);
        }

        let frame = space.map_page(&kern.ram, &kern.coremap, va.page_align_down())?;
        let offset = va.page_offset();
        let chunk = core::cmp::min(PAGE_SIZE - offset, len - done);
        access(
            &kern.ram,
            PhysAddr::new(frame.as_usize() + offset),
            done,
            chunk,
        )?;
        done += chunk;
    }
    Ok(())
}

/// The whole range must lie below the kernel segment.
fn check_user_range(uaddr: VirtAddr, len: usize) -> KernelResult<()> {
    let start = uaddr.as_usize();
    let end = start.checked_add(len).ok_or(Errno::Efault)?;
    if end > USERSPACETOP {
        return Err(Errno::Efault);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{Kernel, KernelConfig};
    use crate::mm::addrspace::{AddressSpace, RegionFlags};
    use crate::process::pcb::{Pid, Process};
    use alloc::sync::Arc;

    const DATA_BASE: usize = 0x0040_0000;

    fn kern_and_proc() -> (Kernel, Arc<Process>) {
        let kern = Kernel::bootstrap(KernelConfig::default());
        let proc = kern
            .pid_table
            .alloc(|pid: Pid| Arc::new(Process::bare(pid, "utest")))
            .unwrap();
        let mut space = AddressSpace::new();
        space
            .define_region(
                VirtAddr::new(DATA_BASE),
                8 * PAGE_SIZE,
                RegionFlags::READ | RegionFlags::WRITE,
            )
            .unwrap();
        space.define_stack();
        proc.setas(Some(space));
        (kern, proc)
    }

    #[test]
    fn test_copyout_copyin_round_trip() {
        let (kern, proc) = kern_and_proc();
        let va = VirtAddr::new(DATA_BASE + 100);
        copyout(&kern, &proc, b"user data", va).unwrap();
        let mut buf = [0u8; 9];
        copyin(&kern, &proc, va, &mut buf).unwrap();
        assert_eq!(&buf, b"user data");
    }

    #[test]
    fn test_transfer_spans_page_boundary() {
        let (kern, proc) = kern_and_proc();
        let va = VirtAddr::new(DATA_BASE + PAGE_SIZE - 3);
        copyout(&kern, &proc, b"straddle", va).unwrap();
        let mut buf = [0u8; 8];
        copyin(&kern, &proc, va, &mut buf).unwrap();
        assert_eq!(&buf, b"straddle");
    }

    #[test]
    fn test_unmapped_and_kernel_addresses_fault() {
        let (kern, proc) = kern_and_proc();
        let mut buf = [0u8; 4];
        assert_eq!(
            copyin(&kern, &proc, VirtAddr::new(0x0010_0000), &mut buf).unwrap_err(),
            Errno::Efault
        );
        assert_eq!(
            copyout(&kern, &proc, b"data", VirtAddr::new(USERSPACETOP - 2)).unwrap_err(),
            Errno::Efault
        );
        assert_eq!(
            copyout(&kern, &proc, b"data", VirtAddr::new(usize::MAX - 1)).unwrap_err(),
            Errno::Efault
        );
    }

    #[test]
    fn test_write_to_readonly_region_faults() {
        let (kern, proc) = kern_and_proc();
        let text = VirtAddr::new(0x0030_0000);
        {
            let mut guard = proc.addrspace.lock();
            let space = guard.as_mut().unwrap();
            space
                .define_region(text, PAGE_SIZE, RegionFlags::READ | RegionFlags::EXEC)
                .unwrap();
        }
        assert_eq!(
            copyout(&kern, &proc, b"x", text).unwrap_err(),
            Errno::Efault
        );
        // Reads of the same page are fine (and see zeroes).
        let mut buf = [0xffu8; 1];
        copyin(&kern, &proc, text, &mut buf).unwrap();
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn test_copyinstr_finds_nul_or_overflows() {
        let (kern, proc) = kern_and_proc();
        let va = VirtAddr::new(DATA_BASE);
        copyout(&kern, &proc, b"path/name\0trailing", va).unwrap();
        let s = copyinstr(&kern, &proc, va, 64).unwrap();
        assert_eq!(s, b"path/name");

        // No terminator within the bound.
        assert_eq!(
            copyinstr(&kern, &proc, va, 9).unwrap_err(),
            Errno::Enametoolong
        );
    }

    #[test]
    fn test_uword_round_trip() {
        let (kern, proc) = kern_and_proc();
        let va = VirtAddr::new(DATA_BASE + 64);
        copyout_uword(&kern, &proc, 0xdead_beef, va).unwrap();
        assert_eq!(copyin_uword(&kern, &proc, va).unwrap(), 0xdead_beef);
    }
}
