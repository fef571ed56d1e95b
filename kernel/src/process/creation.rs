//! Process creation for program execution
//!
//! `proc_create_runprogram` builds the process a fresh user program runs in:
//! it inherits the creator's working directory and arrives with the console
//! already open on descriptors 0, 1, and 2. `runprogram` then gives the
//! process an address space, loads the image, and produces the user-mode
//! entry frame.

use alloc::sync::Arc;

use crate::arch::mips::trapframe::{enter_new_process, TrapFrame};
use crate::bootstrap::Kernel;
use crate::error::KernelResult;
use crate::fs::file::OpenFile;
use crate::fs::OpenFlags;
use crate::mm::addrspace::AddressSpace;
use crate::process::thread::Thread;
use crate::process::{proc_create, proc_destroy, Process};

/// Create a process ready to run a program: current directory inherited
/// from the creator, console wired to fds 0 (read), 1, and 2 (write).
pub fn proc_create_runprogram(
    kern: &Kernel,
    td: &Arc<Thread>,
    name: &str,
) -> KernelResult<Arc<Process>> {
    let curproc = td.current_proc()?;
    let newproc = proc_create(kern, name)?;

    // Share the creator's working directory.
    newproc.set_cwd(curproc.cwd());

    let wire_console = |flags: OpenFlags, expected_fd: usize| -> KernelResult<()> {
        let vnode = kern.vfs.open(None, "con:", flags)?;
        let fd = newproc.file_table.insert(OpenFile::new(vnode, flags))?;
        debug_assert_eq!(fd, expected_fd);
        Ok(())
    };

    let result = wire_console(OpenFlags::read_only(), 0)
        .and_then(|_| wire_console(OpenFlags::write_only(), 1))
        .and_then(|_| wire_console(OpenFlags::write_only(), 2));

    if let Err(e) = result {
        proc_destroy(kern, &newproc);
        return Err(e);
    }
    Ok(newproc)
}

/// Load `progname` into the current (fresh) process and return the frame
/// that enters it in user mode with an empty argument list.
pub fn runprogram(kern: &Kernel, td: &Arc<Thread>, progname: &str) -> KernelResult<TrapFrame> {
    let proc = td.current_proc()?;

    let vnode = kern.vfs.open(proc.cwd().as_ref(), progname, OpenFlags::read_only())?;

    // A brand-new process has no address space yet.
    debug_assert!(proc.addrspace.lock().is_none());
    let space = AddressSpace::new();
    space.activate(&kern.tlb);
    proc.setas(Some(space));

    let entry = match kern.loader.load(kern, &proc, &vnode) {
        Ok(entry) => entry,
        Err(e) => {
            if let Some(space) = proc.setas(None) {
                space.destroy(&kern.coremap);
            }
            return Err(e);
        }
    };
    drop(vnode);

    let stackptr = {
        let mut guard = proc.addrspace.lock();
        guard
            .as_mut()
            .expect("address space installed above")
            .define_stack()
    };

    Ok(enter_new_process(
        0,
        0,
        stackptr.as_usize() as u32,
        entry.as_usize() as u32,
    ))
}
