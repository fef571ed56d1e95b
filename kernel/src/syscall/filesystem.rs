//! File system calls
//!
//! `open`, `close`, `read`, `write`, `lseek`, `dup2`, `chdir`, and
//! `__getcwd`. All of them share one shape: validate the descriptor under
//! the table lock, take a reference to the open file, then do the real work
//! under the file's own lock so concurrent users of a shared session
//! serialize on its offset.

use alloc::string::String;

use super::file_for;
use crate::bootstrap::Kernel;
use crate::error::{Errno, KernelResult};
use crate::fs::file::{OpenFile, OpenFlags};
use crate::fs::uio::{Uio, UioRw};
use crate::fs::PATH_MAX;
use crate::mm::usercopy;
use crate::mm::VirtAddr;
use crate::process::thread::Thread;

/// Seek relative to the start of the file.
pub const SEEK_SET: i32 = 0;
/// Seek relative to the current position.
pub const SEEK_CUR: i32 = 1;
/// Seek relative to end-of-file.
pub const SEEK_END: i32 = 2;

/// Copy a pathname in from user space.
fn copyin_path(kern: &Kernel, proc: &crate::process::Process, upath: VirtAddr) -> KernelResult<String> {
    let bytes = usercopy::copyinstr(kern, proc, upath, PATH_MAX)?;
    String::from_utf8(bytes).map_err(|_| Errno::Einval)
}

/// open(path, flags, mode): resolve the path, wrap the vnode in a fresh
/// open-file session at offset 0, and hand back the lowest free descriptor.
pub fn sys_open(
    kern: &Kernel,
    td: &Thread,
    upath: VirtAddr,
    flags: u32,
    _mode: u32,
) -> KernelResult<i32> {
    let proc = td.current_proc()?;
    let flags = OpenFlags::from_bits(flags).ok_or(Errno::Einval)?;
    let path = copyin_path(kern, &proc, upath)?;

    let vnode = kern.vfs.open(proc.cwd().as_ref(), &path, flags)?;
    let file = OpenFile::new(vnode, flags);

    let fd = proc.file_table.insert(file)?;
    Ok(fd as i32)
}

/// close(fd): clear the slot and drop its reference; the session (and
/// vnode) close when the last sharer lets go.
pub fn sys_close(td: &Thread, fd: i32) -> KernelResult<()> {
    let proc = td.current_proc()?;
    if fd < 0 {
        return Err(Errno::Ebadf);
    }
    proc.file_table.close(fd as usize)
}

/// read(fd, buf, buflen): transfer up to `buflen` bytes from the file's
/// current offset into user memory. Returns bytes read; 0 means EOF.
pub fn sys_read(
    kern: &Kernel,
    td: &Thread,
    fd: i32,
    ubuf: VirtAddr,
    buflen: usize,
) -> KernelResult<usize> {
    let proc = td.current_proc()?;
    let file = file_for(&proc, fd)?;

    if !file.flags().read {
        return Err(Errno::Ebadf);
    }

    file.lock.acquire(td.tid);
    let mut uio = Uio::user(kern, &proc, ubuf, buflen, file.offset(), UioRw::Read);
    let result = file.vnode().read(&mut uio);
    match result {
        Ok(()) => {
            let transferred = buflen - uio.resid;
            file.set_offset(uio.offset);
            file.lock.release(td.tid);
            Ok(transferred)
        }
        Err(e) => {
            file.lock.release(td.tid);
            Err(e)
        }
    }
}

/// write(fd, buf, nbytes): transfer user bytes to the file at its current
/// offset (or end-of-file in append mode) and advance the shared offset.
pub fn sys_write(
    kern: &Kernel,
    td: &Thread,
    fd: i32,
    ubuf: VirtAddr,
    nbytes: usize,
) -> KernelResult<usize> {
    let proc = td.current_proc()?;
    let file = file_for(&proc, fd)?;

    if !file.flags().write {
        return Err(Errno::Ebadf);
    }

    file.lock.acquire(td.tid);

    let mut offset = file.offset();
    if file.flags().append {
        // Append mode writes at the current end regardless of the offset.
        match file.vnode().stat() {
            Ok(st) => offset = st.size,
            Err(e) => {
                file.lock.release(td.tid);
                return Err(e);
            }
        }
    }

    let mut uio = Uio::user(kern, &proc, ubuf, nbytes, offset, UioRw::Write);
    let result = file.vnode().write(&mut uio);
    match result {
        Ok(()) => {
            let transferred = nbytes - uio.resid;
            file.set_offset(uio.offset);
            file.lock.release(td.tid);
            Ok(transferred)
        }
        Err(e) => {
            file.lock.release(td.tid);
            Err(e)
        }
    }
}

/// lseek(fd, pos, whence): reposition the shared offset. Only seekable
/// objects allow it, and the final offset may not be negative.
pub fn sys_lseek(td: &Thread, fd: i32, pos: i64, whence: i32) -> KernelResult<i64> {
    let proc = td.current_proc()?;
    let file = file_for(&proc, fd)?;

    file.lock.acquire(td.tid);

    let finish = |r: KernelResult<i64>| {
        file.lock.release(td.tid);
        r
    };

    if !file.vnode().is_seekable() {
        return finish(Err(Errno::Espipe));
    }

    let new_offset = match whence {
        SEEK_SET => pos,
        SEEK_CUR => file.offset() + pos,
        SEEK_END => {
            let st = match file.vnode().stat() {
                Ok(st) => st,
                Err(e) => return finish(Err(e)),
            };
            st.size + pos
        }
        _ => return finish(Err(Errno::Einval)),
    };

    if new_offset < 0 {
        return finish(Err(Errno::Einval));
    }

    file.set_offset(new_offset);
    finish(Ok(new_offset))
}

/// dup2(oldfd, newfd): make `newfd` another name for `oldfd`'s session,
/// closing whatever `newfd` previously held. Returns `newfd`.
pub fn sys_dup2(td: &Thread, oldfd: i32, newfd: i32) -> KernelResult<i32> {
    let proc = td.current_proc()?;
    if oldfd < 0 || newfd < 0 {
        return Err(Errno::Ebadf);
    }
    let fd = proc.file_table.dup2(oldfd as usize, newfd as usize)?;
    Ok(fd as i32)
}

/// chdir(path): change the working directory. The new directory is
/// resolved before the old reference is dropped, so failure changes
/// nothing.
pub fn sys_chdir(kern: &Kernel, td: &Thread, upath: VirtAddr) -> KernelResult<()> {
    let proc = td.current_proc()?;
    let path = copyin_path(kern, &proc, upath)?;
    let newdir = kern.vfs.chdir(proc.cwd().as_ref(), &path)?;
    proc.set_cwd(Some(newdir));
    Ok(())
}

/// __getcwd(buf, buflen): write the current directory's name (not
/// NUL-terminated) into the user buffer and return its length.
pub fn sys___getcwd(
    kern: &Kernel,
    td: &Thread,
    ubuf: VirtAddr,
    buflen: usize,
) -> KernelResult<usize> {
    let proc = td.current_proc()?;
    let mut uio = Uio::user(kern, &proc, ubuf, buflen, 0, UioRw::Read);
    kern.vfs.getcwd(proc.cwd().as_ref(), &mut uio)?;
    Ok(buflen - uio.resid)
}
