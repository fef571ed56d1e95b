//! Memory system calls
//!
//! `sbrk` is the only one: it moves the heap break and returns the old one.
//! No frames are allocated here; page faults populate new heap pages on
//! first touch.

use crate::error::{Errno, KernelResult};
use crate::process::thread::Thread;

/// sbrk(amount): adjust the heap end by `amount` bytes and return the
/// previous break. `sbrk(0)` queries the break without moving it.
///
/// Shrinking below the heap base is EINVAL; growing into the stack (or
/// wrapping the address space) is ENOMEM.
pub fn sys_sbrk(td: &Thread, amount: isize) -> KernelResult<usize> {
    let proc = td.current_proc()?;
    let mut guard = proc.addrspace.lock();
    let space = guard.as_mut().ok_or(Errno::Enomem)?;

    let old_end = space.heap_end();
    if amount == 0 {
        return Ok(old_end);
    }

    let new_end = old_end.wrapping_add(amount as usize);

    // Unsigned wraparound in either direction.
    if (amount > 0 && new_end < old_end) || (amount < 0 && new_end > old_end) {
        return Err(Errno::Enomem);
    }

    if new_end < space.heap_base() {
        return Err(Errno::Einval);
    }

    if new_end >= space.stack_end() {
        return Err(Errno::Enomem);
    }

    space.set_heap_end(new_end);
    Ok(old_end)
}
