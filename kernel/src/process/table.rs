//! PID table
//!
//! A system-wide mapping from PID to live process. Every live non-kernel
//! process occupies exactly one slot from creation until its parent reaps
//! it; the slot is released at destroy time, not at exit, so `waitpid` can
//! still find an exited child.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::pcb::{Pid, Process};
use super::{KERNEL_PID, PID_MAX, PID_MIN};

/// The PID table. One per kernel.
pub struct PidTable {
    slots: Mutex<Vec<Option<Arc<Process>>>>,
}

impl Default for PidTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PidTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(PID_MAX as usize);
        slots.resize_with(PID_MAX as usize, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Reserve the lowest free user PID and register the process `make`
    /// builds for it, all in one critical section. Returns `None` when every
    /// slot is taken (the caller reports ENPROC).
    pub fn alloc(&self, make: impl FnOnce(Pid) -> Arc<Process>) -> Option<Arc<Process>> {
        let mut slots = self.slots.lock();
        for i in PID_MIN..PID_MAX {
            if slots[i as usize].is_none() {
                let proc = make(Pid(i));
                debug_assert_eq!(proc.pid, Pid(i));
                slots[i as usize] = Some(Arc::clone(&proc));
                return Some(proc);
            }
        }
        None
    }

    /// Register the kernel process under PID 1.
    pub fn register_kernel(&self, proc: Arc<Process>) {
        assert_eq!(proc.pid, KERNEL_PID);
        let mut slots = self.slots.lock();
        assert!(
            slots[KERNEL_PID.0 as usize].is_none(),
            "kernel process registered twice"
        );
        slots[KERNEL_PID.0 as usize] = Some(proc);
    }

    /// Look up a live user process. The kernel process is not addressable
    /// through here.
    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        if pid.0 < PID_MIN || pid.0 >= PID_MAX {
            return None;
        }
        self.slots.lock()[pid.0 as usize].clone()
    }

    /// Release a PID slot once the process is reaped.
    pub fn free(&self, pid: Pid) {
        assert!(
            (PID_MIN..PID_MAX).contains(&pid.0),
            "freeing PID {} outside the user range",
            pid
        );
        let mut slots = self.slots.lock();
        debug_assert!(slots[pid.0 as usize].is_some(), "freeing an empty PID slot");
        slots[pid.0 as usize] = None;
    }

    /// Number of live user processes.
    pub fn user_count(&self) -> usize {
        let slots = self.slots.lock();
        slots[PID_MIN as usize..].iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(pid: Pid) -> Arc<Process> {
        Arc::new(Process::bare(pid, "stub"))
    }

    #[test]
    fn test_alloc_hands_out_lowest_free() {
        let table = PidTable::new();
        let a = table.alloc(stub).unwrap();
        let b = table.alloc(stub).unwrap();
        assert_eq!(a.pid, Pid(PID_MIN));
        assert_eq!(b.pid, Pid(PID_MIN + 1));
        assert!(table.get(a.pid).is_some());
    }

    #[test]
    fn test_freed_pid_is_reused() {
        let table = PidTable::new();
        let a = table.alloc(stub).unwrap();
        let first = a.pid;
        table.free(first);
        assert!(table.get(first).is_none());
        let b = table.alloc(stub).unwrap();
        assert_eq!(b.pid, first);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let table = PidTable::new();
        let mut held = Vec::new();
        for _ in PID_MIN..PID_MAX {
            held.push(table.alloc(stub).unwrap());
        }
        assert!(table.alloc(stub).is_none());
        let reap = held.pop().unwrap().pid;
        table.free(reap);
        assert_eq!(table.alloc(stub).unwrap().pid, reap);
    }

    #[test]
    fn test_kernel_pid_is_not_addressable() {
        let table = PidTable::new();
        table.register_kernel(Arc::new(Process::bare(KERNEL_PID, super::super::KERNEL_PROC_NAME)));
        assert!(table.get(KERNEL_PID).is_none());
        assert!(table.get(Pid(0)).is_none());
        assert!(table.get(Pid(PID_MAX)).is_none());
    }

    #[test]
    fn test_every_pid_maps_to_at_most_one_process() {
        let table = PidTable::new();
        let a = table.alloc(stub).unwrap();
        let b = table.alloc(stub).unwrap();
        assert_ne!(a.pid, b.pid);
        assert!(Arc::ptr_eq(&table.get(a.pid).unwrap(), &a));
        assert!(Arc::ptr_eq(&table.get(b.pid).unwrap(), &b));
    }
}
