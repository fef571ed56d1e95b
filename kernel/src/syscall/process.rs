//! Process system calls
//!
//! `fork`, `execv`, `_exit`, `waitpid`, and `getpid`. Fork and execv are
//! the two multi-resource constructors in the kernel; both follow the
//! validate-allocate-mutate discipline and unwind everything they built on
//! any failure.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::arch::mips::trapframe::{enter_forked_process, enter_new_process, TrapFrame};
use crate::bootstrap::Kernel;
use crate::error::{Errno, KernelResult};
use crate::fs::{OpenFlags, PATH_MAX};
use crate::mm::addrspace::AddressSpace;
use crate::mm::usercopy;
use crate::mm::VirtAddr;
use crate::process::pcb::{Pid, Process};
use crate::process::thread::{proc_addthread, proc_remthread, Thread};
use crate::process::wait::mkwait_exit;
use crate::process::{proc_create, proc_destroy};

/// Upper bound on the combined size of execv's argument strings and pointer
/// array.
pub const ARG_MAX: usize = 65536;

/// Size of a pointer in the 32-bit user ABI.
const UPTR_SIZE: usize = 4;

/// getpid: the caller's own PID.
pub fn sys_getpid(td: &Thread) -> KernelResult<Pid> {
    Ok(td.current_proc()?.pid)
}

/// _exit(code): record the packed exit status, wake every waiter on the
/// exit rendezvous, and detach the calling thread from the process. The
/// trap layer never lets the thread return to user mode afterwards.
pub fn sys_exit(td: &Thread, code: i32) {
    let proc = td
        .proc()
        .expect("_exit from a thread with no process");

    let tid = td.tid;
    proc.wait_lock.acquire(tid);
    proc.set_exit_status(mkwait_exit(code & 0xff));
    proc.wait_cv.broadcast(&proc.wait_lock, tid);
    proc.wait_lock.release(tid);

    log::debug!("process {} exited with code {}", proc.pid, code & 0xff);
    proc_remthread(td);
}

/// waitpid(pid, status, options): sleep until the named child exits, copy
/// its packed status out, reap it, and return its PID.
pub fn sys_waitpid(
    kern: &Kernel,
    td: &Thread,
    pid: Pid,
    ustatus: VirtAddr,
    options: u32,
) -> KernelResult<Pid> {
    if options != 0 {
        return Err(Errno::Einval);
    }

    let curproc = td.current_proc()?;
    let child = kern.pid_table.get(pid).ok_or(Errno::Esrch)?;

    // Only the parent may wait for (and reap) a process.
    if child.parent() != Some(curproc.pid) {
        return Err(Errno::Echild);
    }

    let tid = td.tid;
    child.wait_lock.acquire(tid);
    while !child.has_exited() {
        child.wait_cv.wait(&child.wait_lock, tid);
    }
    let status = child.exit_status();
    child.wait_lock.release(tid);

    if ustatus.as_usize() != 0 {
        usercopy::copyout_uword(kern, &curproc, status as u32, ustatus)?;
    }

    proc_destroy(kern, &child);
    Ok(pid)
}

/// fork: clone the calling process. The child gets a deep copy of the
/// address space, shares the working directory and every open file (by
/// reference), and starts from a fixed-up copy of the parent's trapframe
/// that makes `fork` return 0 to it.
pub fn sys_fork(kern: &Kernel, td: &Thread, parent_tf: &TrapFrame) -> KernelResult<Pid> {
    let curproc = td.current_proc()?;

    let child = proc_create(kern, &curproc.name)?;

    // Deep-copy the address space. Any failure from here on unwinds the
    // child completely; proc_destroy releases whatever was attached.
    let child_space = {
        let parent_guard = curproc.addrspace.lock();
        let parent_space = match parent_guard.as_ref() {
            Some(space) => space,
            None => {
                drop(parent_guard);
                proc_destroy(kern, &child);
                return Err(Errno::Efault);
            }
        };
        match parent_space.copy(&kern.ram, &kern.coremap) {
            Ok(space) => space,
            Err(e) => {
                drop(parent_guard);
                proc_destroy(kern, &child);
                return Err(e);
            }
        }
    };
    child.setas(Some(child_space));

    // Share the working directory and the open-file sessions; offsets on
    // shared files move for both processes from now on.
    child.set_cwd(curproc.cwd());
    child.file_table.copy_from(&curproc.file_table);

    // The exit/wait rendezvous needs the child to know its parent.
    child.set_parent(curproc.pid);

    // The parent's trapframe lives on its own path back to user mode, so
    // the child gets a heap copy, fixed up to observe fork() == 0.
    let mut child_tf = Box::new(parent_tf.clone());
    enter_forked_process(&mut child_tf);
    child.set_startup_frame(child_tf);

    // New kernel thread carries the child.
    let child_td = Thread::new(&curproc.name);
    if let Err(e) = proc_addthread(&child, &child_td) {
        proc_destroy(kern, &child);
        return Err(e);
    }

    log::debug!("process {} forked child {}", curproc.pid, child.pid);
    Ok(child.pid)
}

/// execv(path, argv): replace the current program image.
///
/// The argument vector is staged into kernel memory (two passes, with the
/// combined string-plus-pointer budget capped at [`ARG_MAX`]), the new
/// image is loaded into a fresh address space, and the strings are pushed
/// back out onto the new stack followed by the pointer array. Until the
/// old address space is destroyed every failure restores it, so a failed
/// execv leaves the caller untouched.
pub fn sys_execv(
    kern: &Kernel,
    td: &Thread,
    upath: VirtAddr,
    uargv: VirtAddr,
) -> KernelResult<TrapFrame> {
    if upath.as_usize() == 0 || uargv.as_usize() == 0 {
        return Err(Errno::Efault);
    }

    let proc = td.current_proc()?;

    let path_bytes = usercopy::copyinstr(kern, &proc, upath, PATH_MAX)?;
    if path_bytes.is_empty() {
        return Err(Errno::Einval);
    }
    let path = String::from_utf8(path_bytes).map_err(|_| Errno::Einval)?;

    // Pass one: count the arguments and enforce the ARG_MAX budget, which
    // covers the strings (with terminators) plus the pointer array.
    let mut argc = 0usize;
    let mut total_bytes = 0usize;
    loop {
        let uptr = usercopy::copyin_uword(kern, &proc, uargv.add(argc * UPTR_SIZE))?;
        if uptr == 0 {
            break;
        }
        let arg = usercopy::copyinstr(kern, &proc, VirtAddr::new(uptr as usize), ARG_MAX)
            .map_err(too_big)?;
        total_bytes += arg.len() + 1;
        if total_bytes + (argc + 1) * UPTR_SIZE > ARG_MAX {
            return Err(Errno::E2big);
        }
        argc += 1;
    }

    // Pass two: copy the strings into one packed kernel buffer.
    let mut packed: Vec<u8> = Vec::with_capacity(total_bytes);
    let mut args: Vec<(usize, usize)> = Vec::with_capacity(argc);
    for i in 0..argc {
        let uptr = usercopy::copyin_uword(kern, &proc, uargv.add(i * UPTR_SIZE))?;
        let arg = usercopy::copyinstr(kern, &proc, VirtAddr::new(uptr as usize), ARG_MAX)
            .map_err(too_big)?;
        let start = packed.len();
        packed.extend_from_slice(&arg);
        packed.push(0);
        args.push((start, arg.len() + 1));
    }

    let vnode = kern
        .vfs
        .open(proc.cwd().as_ref(), &path, OpenFlags::read_only())?;

    // Point of address-space swap: from here until the old space is
    // destroyed, failures must put it back.
    let mut old_space = proc.setas(Some(AddressSpace::new()));
    kern.tlb.flush();

    let entry = match kern.loader.load(kern, &proc, &vnode) {
        Ok(entry) => entry,
        Err(e) => {
            restore_addrspace(kern, &proc, &mut old_space);
            return Err(e);
        }
    };
    drop(vnode);

    let mut sp = {
        let mut guard = proc.addrspace.lock();
        guard
            .as_mut()
            .expect("new address space installed above")
            .define_stack()
            .as_usize()
    };

    // Push the strings, last argument first, recording each user address.
    let mut user_ptrs = vec![0u32; argc + 1];
    for i in (0..argc).rev() {
        let (start, len) = args[i];
        sp -= len;
        if let Err(e) = usercopy::copyout(kern, &proc, &packed[start..start + len], VirtAddr::new(sp))
        {
            restore_addrspace(kern, &proc, &mut old_space);
            return Err(e);
        }
        user_ptrs[i] = sp as u32;
    }

    // Align down to 8, then lay out the pointer array: NULL sentinel first
    // (highest address), argv[0] last, so the final stack pointer addresses
    // argv[0] and the array reads upward.
    sp &= !7;
    for i in (0..=argc).rev() {
        sp -= UPTR_SIZE;
        if let Err(e) = usercopy::copyout_uword(kern, &proc, user_ptrs[i], VirtAddr::new(sp)) {
            restore_addrspace(kern, &proc, &mut old_space);
            return Err(e);
        }
    }
    let argv_user = sp as u32;

    // Point of no return: the caller's old image goes away.
    if let Some(old) = old_space {
        old.destroy(&kern.coremap);
    }

    log::debug!("process {} exec {} (argc={})", proc.pid, path, argc);
    Ok(enter_new_process(
        argc,
        argv_user,
        sp as u32,
        entry.as_usize() as u32,
    ))
}

/// A single over-long argument string counts as an over-long argument
/// list.
fn too_big(e: Errno) -> Errno {
    if e == Errno::Enametoolong {
        Errno::E2big
    } else {
        e
    }
}

/// Swap a failed execv's new address space back out and revive the old
/// one.
fn restore_addrspace(kern: &Kernel, proc: &Arc<Process>, old: &mut Option<AddressSpace>) {
    let failed = proc.setas(old.take());
    kern.tlb.flush();
    if let Some(space) = failed {
        space.destroy(&kern.coremap);
    }
}
