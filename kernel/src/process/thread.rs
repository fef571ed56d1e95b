//! Kernel thread handles
//!
//! Threads here are bookkeeping objects: an identity for lock ownership and
//! a back-pointer to the owning process ("current process" is always reached
//! through the current thread). Actual scheduling and context switching live
//! below this crate.

use alloc::string::String;
use alloc::sync::Arc;

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::pcb::Process;
use crate::error::{Errno, KernelResult};

/// Thread ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub u64);

impl core::fmt::Display for Tid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread ID allocator.
static NEXT_TID: AtomicU64 = AtomicU64::new(1);

fn alloc_tid() -> Tid {
    Tid(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

/// A kernel thread.
pub struct Thread {
    pub tid: Tid,
    pub name: String,
    /// Owning process. Updated only by [`proc_addthread`] /
    /// [`proc_remthread`] under the process's thread-list lock, mirroring
    /// how the scheduler-visible back-pointer must change atomically with
    /// the membership list.
    proc: Mutex<Option<Arc<Process>>>,
}

impl Thread {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            tid: alloc_tid(),
            name: String::from(name),
            proc: Mutex::new(None),
        })
    }

    /// The process this thread currently belongs to.
    pub fn proc(&self) -> Option<Arc<Process>> {
        self.proc.lock().clone()
    }

    /// The current process, for syscall paths that require one.
    pub fn current_proc(&self) -> KernelResult<Arc<Process>> {
        self.proc().ok_or(Errno::Esrch)
    }
}

/// Attach `td` to `proc`. The thread must not already belong to a process.
pub fn proc_addthread(proc: &Arc<Process>, td: &Arc<Thread>) -> KernelResult<()> {
    let mut threads = proc.threads.lock();
    let mut owner = td.proc.lock();
    assert!(owner.is_none(), "thread {} already has a process", td.tid);
    threads.push(Arc::clone(td));
    *owner = Some(Arc::clone(proc));
    Ok(())
}

/// Detach `td` from its process.
///
/// Panics if the thread is not on its process's list; that means the
/// membership bookkeeping is corrupt.
pub fn proc_remthread(td: &Thread) {
    let proc = td.proc().expect("thread has no process to leave");
    let mut threads = proc.threads.lock();
    let before = threads.len();
    threads.retain(|t| t.tid != td.tid);
    assert_eq!(
        threads.len(),
        before - 1,
        "thread {} has escaped from its process",
        td.tid
    );
    drop(threads);
    *td.proc.lock() = None;
}
