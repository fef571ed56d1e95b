//! Shared scaffolding for the scenario tests: boot a kernel, spawn user
//! processes with a scratch data region, and move bytes in and out of user
//! memory.

#![allow(dead_code)]

use std::sync::Arc;

use obsidian_kernel::mm::addrspace::{AddressSpace, RegionFlags};
use obsidian_kernel::mm::usercopy;
use obsidian_kernel::mm::{VirtAddr, PAGE_SIZE};
use obsidian_kernel::process::creation::proc_create_runprogram;
use obsidian_kernel::process::thread::{proc_addthread, Thread};
use obsidian_kernel::process::Process;
use obsidian_kernel::{Kernel, KernelConfig};

/// Base of the scratch read/write data region every test process gets.
pub const UDATA: usize = 0x1000_0000;

/// Pages in the scratch region.
pub const UDATA_PAGES: usize = 64;

pub fn boot() -> Kernel {
    Kernel::bootstrap(KernelConfig::default())
}

pub fn boot_thread(kern: &Kernel) -> Arc<Thread> {
    kern.kproc().threads.lock()[0].clone()
}

/// Create a console-wired user process with its own thread and a writable
/// scratch region plus a stack, ready for syscalls.
pub fn spawn_user_proc(kern: &Kernel, name: &str) -> (Arc<Process>, Arc<Thread>) {
    let boot_td = boot_thread(kern);
    let proc = proc_create_runprogram(kern, &boot_td, name).expect("proc_create_runprogram");

    let mut space = AddressSpace::new();
    space
        .define_region(
            VirtAddr::new(UDATA),
            UDATA_PAGES * PAGE_SIZE,
            RegionFlags::READ | RegionFlags::WRITE,
        )
        .expect("scratch region");
    space.define_stack();
    proc.setas(Some(space));

    let td = Thread::new(name);
    proc_addthread(&proc, &td).expect("attach thread");
    (proc, td)
}

/// The (single) thread of a process, e.g. a forked child's.
pub fn thread_of(proc: &Arc<Process>) -> Arc<Thread> {
    proc.threads.lock()[0].clone()
}

pub fn uwrite(kern: &Kernel, proc: &Process, addr: usize, data: &[u8]) {
    usercopy::copyout(kern, proc, data, VirtAddr::new(addr)).expect("copyout");
}

/// Write a NUL-terminated string into user memory.
pub fn uwrite_str(kern: &Kernel, proc: &Process, addr: usize, s: &str) {
    let mut bytes = Vec::from(s.as_bytes());
    bytes.push(0);
    uwrite(kern, proc, addr, &bytes);
}

/// Write a 4-byte user word.
pub fn uwrite_word(kern: &Kernel, proc: &Process, addr: usize, word: u32) {
    usercopy::copyout_uword(kern, proc, word, VirtAddr::new(addr)).expect("copyout_uword");
}

pub fn uread(kern: &Kernel, proc: &Process, addr: usize, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    usercopy::copyin(kern, proc, VirtAddr::new(addr), &mut buf).expect("copyin");
    buf
}

pub fn uread_word(kern: &Kernel, proc: &Process, addr: usize) -> u32 {
    usercopy::copyin_uword(kern, proc, VirtAddr::new(addr)).expect("copyin_uword")
}

/// Install an executable image named `name` on the root volume.
pub fn install_program(kern: &Kernel, name: &str, image: &[u8]) {
    use obsidian_kernel::fs::uio::{Uio, UioRw};
    let root = kern.root_volume();
    let vnode = root.create(name).expect("create program file");
    let mut staged = Vec::from(image);
    let mut uio = Uio::kernel(&mut staged, 0, UioRw::Write);
    vnode.write(&mut uio).expect("write program image");
}

/// Seed a data file on the root volume.
pub fn install_file(kern: &Kernel, name: &str, contents: &[u8]) {
    install_program(kern, name, contents);
}
