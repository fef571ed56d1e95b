//! Process management
//!
//! A process owns its address space and file table, shares its working
//! directory by reference, and is findable through the PID table from birth
//! until its parent reaps it. PID 1 belongs to the kernel process; user
//! processes draw PIDs from `[PID_MIN, PID_MAX)`.

pub mod creation;
pub mod loader;
pub mod pcb;
pub mod table;
pub mod thread;
pub mod wait;

pub use pcb::{Pid, Process};
pub use thread::{Thread, Tid};

use alloc::sync::Arc;

use crate::bootstrap::Kernel;
use crate::error::{Errno, KernelResult};

/// Lowest PID handed to user processes.
pub const PID_MIN: i32 = 2;

/// One past the highest PID.
pub const PID_MAX: i32 = 256;

/// PID of the kernel process.
pub const KERNEL_PID: Pid = Pid(1);

/// Name under which the kernel process registers itself.
pub const KERNEL_PROC_NAME: &str = "[kernel]";

/// Create a user process: reserve the lowest free PID and register the new
/// record under it. ENPROC when the PID space is exhausted.
pub fn proc_create(kern: &Kernel, name: &str) -> KernelResult<Arc<Process>> {
    kern.pid_table
        .alloc(|pid| Arc::new(Process::bare(pid, name)))
        .ok_or(Errno::Enproc)
}

/// Destroy a process record. The caller holds the only meaningful reference
/// (typically the reaping parent); the PID becomes reusable immediately.
pub fn proc_destroy(kern: &Kernel, proc: &Arc<Process>) {
    assert_ne!(proc.pid, KERNEL_PID, "destroying the kernel process");
    debug_assert!(
        proc.threads.lock().is_empty(),
        "destroying a process that still has threads"
    );

    // Release the shared working-directory reference.
    proc.set_cwd(None);

    // Tear down the address space. A process being destroyed is never the
    // one running on the CPU: it either never ran (fork cleanup) or has
    // exited, so detaching the space before destroying it is safe.
    if let Some(space) = proc.setas(None) {
        space.destroy(&kern.coremap);
    }

    // Drop every open-file reference; last ones close their vnodes.
    proc.file_table.close_all();

    kern.pid_table.free(proc.pid);
    log::debug!("destroyed process {} ({})", proc.pid, proc.name);
}
