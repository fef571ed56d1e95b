//! System call layer
//!
//! Kernel-side implementations of the process, memory, and file syscalls.
//! The trap dispatcher below this crate decodes registers and hands every
//! routine the kernel context and the current thread explicitly; results
//! and error codes flow back through `KernelResult`.

pub mod filesystem;
pub mod memory;
pub mod process;

use alloc::sync::Arc;

use crate::error::{Errno, KernelResult};
use crate::fs::file::{OpenFile, OPEN_MAX};
use crate::process::pcb::Process;

/// Resolve a descriptor to its open file, taking a reference for the
/// caller.
///
/// This is the front half of every file syscall: bounds-check the
/// descriptor, read the slot under the table lock, and bump the session
/// refcount so the file stays alive after the table lock is released (even
/// if another thread closes the descriptor meanwhile).
pub(crate) fn file_for(proc: &Process, fd: i32) -> KernelResult<Arc<OpenFile>> {
    if fd < 0 || fd as usize >= OPEN_MAX {
        return Err(Errno::Ebadf);
    }
    proc.file_table.get(fd as usize).ok_or(Errno::Ebadf)
}
