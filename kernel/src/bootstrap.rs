//! Kernel context and boot sequence
//!
//! All system-wide state lives in one [`Kernel`] value with an explicit
//! bootstrap order: RAM, then the coremap (which steals its own frames), the
//! TLB, the PID table with the kernel process, and finally the VFS with the
//! console device and the root volume. There is no teardown; the kernel
//! context lives as long as the machine.
//!
//! Syscall routines receive the kernel context and the current thread as
//! explicit arguments; nothing reaches for hidden globals.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::fs::devfs::Console;
use crate::fs::ramfs::RamFs;
use crate::fs::{FileSystem, Vfs, Vnode};
use crate::mm::coremap::CoreMap;
use crate::mm::ram::Ram;
use crate::process::loader::{FlatImageLoader, ProgramLoader};
use crate::process::table::PidTable;
use crate::process::thread::{proc_addthread, Thread};
use crate::process::{pcb::Process, KERNEL_PID, KERNEL_PROC_NAME};
use crate::arch::mips::tlb::Tlb;

/// Boot-time knobs. The defaults give a machine large enough for real
/// workloads but small enough that exhaustion paths are reachable in tests.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Total physical memory, in frames.
    pub ram_pages: usize,
    /// Frames occupied by the kernel image at the bottom of RAM.
    pub kernel_image_pages: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ram_pages: 512,
            kernel_image_pages: 16,
        }
    }
}

/// The kernel: every system-wide table behind one handle.
pub struct Kernel {
    pub ram: Ram,
    pub coremap: CoreMap,
    pub tlb: Tlb,
    pub pid_table: PidTable,
    pub vfs: Vfs,
    pub console: Arc<Console>,
    pub loader: Box<dyn ProgramLoader>,
    kproc: Arc<Process>,
}

impl Kernel {
    /// Bring the system up. Failure here is fatal by design: a kernel that
    /// cannot bootstrap has nothing sensible to return to.
    pub fn bootstrap(config: KernelConfig) -> Self {
        let ram = Ram::new(config.ram_pages, config.kernel_image_pages);

        // vm_bootstrap: build the coremap out of the bottom of free RAM.
        let coremap = CoreMap::new();
        coremap.bootstrap(&ram);

        let tlb = Tlb::new();

        // The kernel process claims PID 1 and adopts the boot thread.
        let pid_table = PidTable::new();
        let kproc = Arc::new(Process::bare(KERNEL_PID, KERNEL_PROC_NAME));
        pid_table.register_kernel(Arc::clone(&kproc));
        let boot_thread = Thread::new("boot");
        proc_addthread(&kproc, &boot_thread).expect("boot thread attach cannot fail");

        // VFS: console device plus the root volume, which becomes the
        // kernel process's working directory.
        let vfs = Vfs::new();
        let console = Console::new();
        vfs.register_device("con", Arc::clone(&console) as Arc<dyn Vnode>);

        let rootfs = Arc::new(RamFs::new("emu0"));
        let root_vnode = rootfs.root();
        vfs.mount(rootfs as Arc<dyn FileSystem>)
            .expect("root volume mounts on an empty table");
        kproc.set_cwd(Some(root_vnode));

        log::info!(
            "kernel bootstrapped: {} RAM frames, kernel image {}",
            config.ram_pages,
            config.kernel_image_pages
        );

        Self {
            ram,
            coremap,
            tlb,
            pid_table,
            vfs,
            console,
            loader: Box::new(FlatImageLoader),
            kproc,
        }
    }

    /// The kernel process (PID 1).
    pub fn kproc(&self) -> &Arc<Process> {
        &self.kproc
    }

    /// The root volume's filesystem, for populating programs and files.
    pub fn root_volume(&self) -> Arc<dyn Vnode> {
        self.kproc.cwd().expect("kernel process always has a cwd")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_wires_the_world() {
        let kern = Kernel::bootstrap(KernelConfig::default());
        assert!(kern.coremap.is_ready());
        assert_eq!(kern.kproc().pid, KERNEL_PID);
        assert!(kern.kproc().cwd().is_some());
        // The console answers at its device name.
        assert!(kern.vfs.lookup(None, "con:").is_ok());
        // The boot thread belongs to the kernel process.
        assert_eq!(kern.kproc().threads.lock().len(), 1);
    }
}
