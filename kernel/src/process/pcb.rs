//! Process control block
//!
//! The [`Process`] structure ties together everything a user program owns:
//! its PID and parent link, the exit rendezvous the parent waits on, the
//! thread membership list, the address space, the working directory, and the
//! open-file table.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use spin::Mutex;

use super::thread::Thread;
use crate::arch::mips::trapframe::TrapFrame;
use crate::fs::file::FileTable;
use crate::fs::Vnode;
use crate::mm::addrspace::AddressSpace;
use crate::sync::{Condvar, Lock};

/// Process ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub i32);

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel parent value before fork assigns one.
const NO_PARENT: i32 = -1;

/// Process control block.
pub struct Process {
    pub pid: Pid,
    pub name: String,

    /// PID of the process that forked us; unset until fork links it.
    parent: AtomicI32,

    /// Exit rendezvous: `exit` stores the packed status and flips `exited`
    /// under `wait_lock`, then broadcasts `wait_cv`; `waitpid` sleeps on the
    /// same pair.
    exited: AtomicBool,
    exit_code: AtomicI32,
    pub wait_lock: Lock,
    pub wait_cv: Condvar,

    /// Threads belonging to this process. Only the kernel process ever has
    /// more than one.
    pub threads: Mutex<Vec<Arc<Thread>>>,

    /// Current address space; kernel-only processes have none.
    pub addrspace: Mutex<Option<AddressSpace>>,

    /// Current working directory, shared with the VFS by refcount.
    pub cwd: Mutex<Option<Arc<dyn Vnode>>>,

    /// Open-file table.
    pub file_table: FileTable,

    /// Register state a newly forked child starts from. Deposited by fork,
    /// consumed exactly once when the child first runs.
    startup_frame: Mutex<Option<Box<TrapFrame>>>,
}

impl Process {
    /// Build a bare process record. PID assignment and table registration
    /// are the caller's job (see [`super::table::PidTable`]); outside the
    /// kernel, processes come from [`super::proc_create`].
    pub(crate) fn bare(pid: Pid, name: &str) -> Self {
        Self {
            pid,
            name: String::from(name),
            parent: AtomicI32::new(NO_PARENT),
            exited: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
            wait_lock: Lock::new("proc_waitlock"),
            wait_cv: Condvar::new("proc_waitcv"),
            threads: Mutex::new(Vec::new()),
            addrspace: Mutex::new(None),
            cwd: Mutex::new(None),
            file_table: FileTable::new(),
            startup_frame: Mutex::new(None),
        }
    }

    /// Parent PID, if fork has linked one.
    pub fn parent(&self) -> Option<Pid> {
        match self.parent.load(Ordering::Acquire) {
            NO_PARENT => None,
            pid => Some(Pid(pid)),
        }
    }

    pub fn set_parent(&self, pid: Pid) {
        self.parent.store(pid.0, Ordering::Release);
    }

    /// Whether `exit` has run. Callers deciding to sleep must re-check under
    /// `wait_lock`.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// The packed exit status. Meaningful once `has_exited` is true.
    pub fn exit_status(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    /// Record the packed exit status. The caller holds `wait_lock`.
    pub fn set_exit_status(&self, status: i32) {
        self.exit_code.store(status, Ordering::Release);
        self.exited.store(true, Ordering::Release);
    }

    /// Swap the current address space, returning the old one for disposal or
    /// restoration.
    pub fn setas(&self, new: Option<AddressSpace>) -> Option<AddressSpace> {
        let mut slot = self.addrspace.lock();
        core::mem::replace(&mut *slot, new)
    }

    /// Replace the working directory, returning the old reference.
    pub fn set_cwd(&self, vnode: Option<Arc<dyn Vnode>>) -> Option<Arc<dyn Vnode>> {
        let mut slot = self.cwd.lock();
        core::mem::replace(&mut *slot, vnode)
    }

    /// Current working directory, if any.
    pub fn cwd(&self) -> Option<Arc<dyn Vnode>> {
        self.cwd.lock().clone()
    }

    /// Deposit the trapframe a forked child will start from.
    pub fn set_startup_frame(&self, tf: Box<TrapFrame>) {
        let mut slot = self.startup_frame.lock();
        debug_assert!(slot.is_none(), "startup frame deposited twice");
        *slot = Some(tf);
    }

    /// Claim the startup trapframe; the child's first entry to user mode
    /// consumes it.
    pub fn take_startup_frame(&self) -> Option<Box<TrapFrame>> {
        self.startup_frame.lock().take()
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("exited", &self.has_exited())
            .finish_non_exhaustive()
    }
}
