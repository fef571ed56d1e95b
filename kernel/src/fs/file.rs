//! Open files and the per-process file table
//!
//! An [`OpenFile`] is one session on a vnode: the open flags, the shared
//! seek offset, and a lock serializing I/O on the session. File-table slots
//! in any number of processes may point at the same session (`fork`,
//! `dup2`); the `Arc` count is the session's reference count, and the vnode
//! closes when the last reference drops.

use alloc::sync::Arc;

use core::sync::atomic::{AtomicI64, Ordering};

use spin::Mutex;

use super::Vnode;
use crate::error::{Errno, KernelResult};
use crate::sync::Lock;

/// Size of each process's descriptor table.
pub const OPEN_MAX: usize = 128;

/// Open-mode constants, the ABI the `open` syscall accepts.
pub mod fcntl {
    pub const O_RDONLY: u32 = 0;
    pub const O_WRONLY: u32 = 1;
    pub const O_RDWR: u32 = 2;
    pub const O_ACCMODE: u32 = 3;
    pub const O_CREAT: u32 = 4;
    pub const O_EXCL: u32 = 8;
    pub const O_TRUNC: u32 = 16;
    pub const O_APPEND: u32 = 32;
}

/// Decoded open flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
    pub excl: bool,
}

impl OpenFlags {
    /// Read-only mode.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Write-only mode.
    pub fn write_only() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    /// Decode raw syscall flag bits. An access mode of `O_ACCMODE` itself
    /// is invalid.
    pub fn from_bits(bits: u32) -> Option<Self> {
        use fcntl::*;
        let accmode = bits & O_ACCMODE;
        if accmode == O_ACCMODE {
            return None;
        }
        Some(Self {
            read: accmode == O_RDONLY || accmode == O_RDWR,
            write: accmode == O_WRONLY || accmode == O_RDWR,
            append: bits & O_APPEND != 0,
            create: bits & O_CREAT != 0,
            truncate: bits & O_TRUNC != 0,
            excl: bits & O_EXCL != 0,
        })
    }
}

/// One open session on a vnode.
pub struct OpenFile {
    vnode: Arc<dyn Vnode>,
    flags: OpenFlags,
    /// Shared seek position. Mutated only while holding `lock`, so
    /// concurrent readers and writers of the same session serialize.
    offset: AtomicI64,
    /// Serializes the vnode operation together with the offset update.
    pub lock: Lock,
}

impl OpenFile {
    /// Wrap a freshly opened vnode. The session starts at offset 0 with one
    /// reference (the returned `Arc`).
    pub fn new(vnode: Arc<dyn Vnode>, flags: OpenFlags) -> Arc<Self> {
        Arc::new(Self {
            vnode,
            flags,
            offset: AtomicI64::new(0),
            lock: Lock::new("file_lock"),
        })
    }

    pub fn vnode(&self) -> &Arc<dyn Vnode> {
        &self.vnode
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Store the offset. Callers hold `lock`.
    pub fn set_offset(&self, off: i64) {
        self.offset.store(off, Ordering::Release);
    }
}

/// Fixed-size descriptor table, one per process.
pub struct FileTable {
    files: Mutex<[Option<Arc<OpenFile>>; OPEN_MAX]>,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    /// An empty table; all descriptors closed.
    pub fn new() -> Self {
        Self {
            files: Mutex::new([const { None }; OPEN_MAX]),
        }
    }

    /// Install `file` in the lowest free slot and return its descriptor,
    /// or EMFILE when the table is full.
    pub fn insert(&self, file: Arc<OpenFile>) -> KernelResult<usize> {
        let mut files = self.files.lock();
        for (fd, slot) in files.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(fd);
            }
        }
        Err(Errno::Emfile)
    }

    /// The session behind `fd`, with a reference taken for the caller.
    pub fn get(&self, fd: usize) -> Option<Arc<OpenFile>> {
        if fd >= OPEN_MAX {
            return None;
        }
        self.files.lock()[fd].clone()
    }

    /// Close `fd`: clear the slot and drop its reference.
    pub fn close(&self, fd: usize) -> KernelResult<()> {
        if fd >= OPEN_MAX {
            return Err(Errno::Ebadf);
        }
        let released = self.files.lock()[fd].take();
        match released {
            Some(_file) => Ok(()),
            None => Err(Errno::Ebadf),
        }
    }

    /// Clone descriptor `oldfd` onto `newfd`, closing whatever `newfd` held.
    /// Cloning a descriptor onto itself is a no-op. Returns `newfd`.
    pub fn dup2(&self, oldfd: usize, newfd: usize) -> KernelResult<usize> {
        if oldfd >= OPEN_MAX || newfd >= OPEN_MAX {
            return Err(Errno::Ebadf);
        }
        let mut files = self.files.lock();
        let old = files[oldfd].clone().ok_or(Errno::Ebadf)?;
        if oldfd == newfd {
            return Ok(newfd);
        }
        if let Some(existing) = &files[newfd] {
            if Arc::ptr_eq(existing, &old) {
                return Ok(newfd);
            }
        }
        // The displaced session's reference drops here; if it was the last
        // one, the vnode closes.
        files[newfd] = Some(old);
        Ok(newfd)
    }

    /// Populate this (empty) table with the same sessions as `src`, taking a
    /// reference to each. Used by fork: parent and child then share offsets.
    pub fn copy_from(&self, src: &FileTable) {
        let src_files = src.files.lock();
        let mut dst_files = self.files.lock();
        for (dst, s) in dst_files.iter_mut().zip(src_files.iter()) {
            debug_assert!(dst.is_none(), "copying into a non-empty file table");
            *dst = s.clone();
        }
    }

    /// Drop every reference this table holds.
    pub fn close_all(&self) {
        let mut files = self.files.lock();
        for slot in files.iter_mut() {
            *slot = None;
        }
    }

    /// Number of open descriptors.
    pub fn open_count(&self) -> usize {
        self.files.lock().iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::super::{NodeType, VStat, Vnode};
    use super::*;
    use crate::fs::uio::Uio;

    struct NullNode;

    impl Vnode for NullNode {
        fn node_type(&self) -> NodeType {
            NodeType::File
        }
        fn read(&self, _uio: &mut Uio<'_>) -> KernelResult<()> {
            Ok(())
        }
        fn write(&self, _uio: &mut Uio<'_>) -> KernelResult<()> {
            Ok(())
        }
        fn stat(&self) -> KernelResult<VStat> {
            Ok(VStat {
                size: 0,
                node_type: NodeType::File,
            })
        }
    }

    fn open_null() -> Arc<OpenFile> {
        OpenFile::new(Arc::new(NullNode), OpenFlags::read_only())
    }

    #[test]
    fn test_flags_decode() {
        use fcntl::*;
        let f = OpenFlags::from_bits(O_RDONLY).unwrap();
        assert!(f.read && !f.write);
        let f = OpenFlags::from_bits(O_WRONLY | O_APPEND | O_CREAT).unwrap();
        assert!(!f.read && f.write && f.append && f.create);
        let f = OpenFlags::from_bits(O_RDWR | O_TRUNC).unwrap();
        assert!(f.read && f.write && f.truncate);
        assert!(OpenFlags::from_bits(O_ACCMODE).is_none());
    }

    #[test]
    fn test_insert_uses_lowest_free_slot() {
        let table = FileTable::new();
        assert_eq!(table.insert(open_null()).unwrap(), 0);
        assert_eq!(table.insert(open_null()).unwrap(), 1);
        table.close(0).unwrap();
        assert_eq!(table.insert(open_null()).unwrap(), 0);
        assert_eq!(table.open_count(), 2);
    }

    #[test]
    fn test_table_fills_to_open_max() {
        let table = FileTable::new();
        for fd in 0..OPEN_MAX {
            assert_eq!(table.insert(open_null()).unwrap(), fd);
        }
        assert_eq!(table.insert(open_null()).unwrap_err(), Errno::Emfile);
    }

    #[test]
    fn test_close_invalid_descriptors() {
        let table = FileTable::new();
        assert_eq!(table.close(0).unwrap_err(), Errno::Ebadf);
        assert_eq!(table.close(OPEN_MAX).unwrap_err(), Errno::Ebadf);
    }

    #[test]
    fn test_dup2_shares_one_session() {
        let table = FileTable::new();
        let fd = table.insert(open_null()).unwrap();
        assert_eq!(table.dup2(fd, 10).unwrap(), 10);
        let a = table.get(fd).unwrap();
        let b = table.get(10).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // Self-dup is a no-op; dup from a closed fd is EBADF.
        assert_eq!(table.dup2(fd, fd).unwrap(), fd);
        assert_eq!(table.dup2(99, 3).unwrap_err(), Errno::Ebadf);
    }

    #[test]
    fn test_copy_from_shares_sessions() {
        let parent = FileTable::new();
        let fd = parent.insert(open_null()).unwrap();
        let child = FileTable::new();
        child.copy_from(&parent);
        let a = parent.get(fd).unwrap();
        let b = child.get(fd).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        // One session, referenced by two tables and two locals.
        assert_eq!(Arc::strong_count(&a), 4);
    }
}
