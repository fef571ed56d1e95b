//! Program loading
//!
//! The executable-format parser proper lives behind the [`ProgramLoader`]
//! trait; the kernel only cares that a loader populates the current address
//! space from a vnode and reports the entry point. The bundled
//! [`FlatImageLoader`] maps a file's bytes verbatim as the text segment:
//! enough to run position-fixed images and to exercise the full
//! prepare-load / copy / complete-load sequence a segment loader performs.

use alloc::sync::Arc;
use alloc::vec;

use crate::bootstrap::Kernel;
use crate::error::{Errno, KernelResult};
use crate::fs::uio::{Uio, UioRw};
use crate::fs::{NodeType, Vnode};
use crate::mm::addrspace::RegionFlags;
use crate::mm::usercopy;
use crate::mm::VirtAddr;
use crate::process::pcb::Process;

/// Base virtual address executables are linked at.
pub const USER_TEXT_BASE: usize = 0x0040_0000;

/// Loads an executable image into `proc`'s current address space.
pub trait ProgramLoader: Send + Sync {
    /// Populate the address space from `vnode` and return the entry point.
    ///
    /// The caller has already created and activated a fresh address space on
    /// `proc`; on failure the caller disposes of it.
    fn load(
        &self,
        kern: &Kernel,
        proc: &Process,
        vnode: &Arc<dyn Vnode>,
    ) -> KernelResult<VirtAddr>;
}

/// Loader for flat binary images: the whole file becomes one read+execute
/// segment at [`USER_TEXT_BASE`], and execution starts at its first byte.
pub struct FlatImageLoader;

impl ProgramLoader for FlatImageLoader {
    fn load(
        &self,
        kern: &Kernel,
        proc: &Process,
        vnode: &Arc<dyn Vnode>,
    ) -> KernelResult<VirtAddr> {
        if vnode.node_type() != NodeType::File {
            return Err(Errno::Eisdir);
        }
        let stat = vnode.stat()?;
        if stat.size <= 0 {
            return Err(Errno::Enoexec);
        }
        let size = stat.size as usize;

        // Text is read+execute; the loading flag lets our stores land in it.
        {
            let mut guard = proc.addrspace.lock();
            let space = guard.as_mut().ok_or(Errno::Efault)?;
            space.define_region(
                VirtAddr::new(USER_TEXT_BASE),
                size,
                RegionFlags::READ | RegionFlags::EXEC,
            )?;
            space.prepare_load();
        }

        // Pull the image into kernel memory, then push it through the
        // ordinary user-copy path so pages materialize one by one.
        let mut image = vec![0u8; size];
        let mut uio = Uio::kernel(&mut image, 0, UioRw::Read);
        vnode.read(&mut uio)?;
        if uio.transferred() != size {
            return Err(Errno::Enoexec);
        }
        usercopy::copyout(kern, proc, &image, VirtAddr::new(USER_TEXT_BASE))?;

        {
            let mut guard = proc.addrspace.lock();
            let space = guard.as_mut().ok_or(Errno::Efault)?;
            space.complete_load(&kern.tlb);
        }

        log::debug!(
            "loaded {} byte image for {} at 0x{:08x}",
            size,
            proc.name,
            USER_TEXT_BASE
        );
        Ok(VirtAddr::new(USER_TEXT_BASE))
    }
}
