//! In-memory filesystem
//!
//! A small mountable filesystem holding directories and regular files in
//! kernel memory. It backs path resolution, working directories, and the
//! file syscalls; a disk-backed filesystem would slot in behind the same
//! [`Vnode`] trait.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::uio::Uio;
use super::{FileSystem, NodeType, VStat, Vnode, NAME_MAX};
use crate::error::{Errno, KernelResult};

/// A regular file: a growable byte vector.
pub struct RamFile {
    data: Mutex<Vec<u8>>,
}

impl RamFile {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(Vec::new()),
        })
    }

    pub fn size(&self) -> usize {
        self.data.lock().len()
    }
}

impl Vnode for RamFile {
    fn node_type(&self) -> NodeType {
        NodeType::File
    }

    fn read(&self, uio: &mut Uio<'_>) -> KernelResult<()> {
        let data = self.data.lock();
        let pos = uio.offset.max(0) as usize;
        let avail = if pos < data.len() { &data[pos..] } else { &[] };
        // Stage through a copy so the file lock is not held while the uio
        // touches user memory.
        let staged: Vec<u8> = avail.iter().copied().collect();
        drop(data);
        uio.move_out(&staged)?;
        Ok(())
    }

    fn write(&self, uio: &mut Uio<'_>) -> KernelResult<()> {
        let pos = uio.offset.max(0) as usize;
        let mut staged = alloc::vec![0u8; uio.resid];
        let n = uio.move_in(&mut staged)?;

        let mut data = self.data.lock();
        let end = pos + n;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[pos..end].copy_from_slice(&staged[..n]);
        Ok(())
    }

    fn stat(&self) -> KernelResult<VStat> {
        Ok(VStat {
            size: self.data.lock().len() as i64,
            node_type: NodeType::File,
        })
    }

    fn truncate(&self, size: usize) -> KernelResult<()> {
        let mut data = self.data.lock();
        data.resize(size, 0);
        Ok(())
    }
}

enum RamEntry {
    Dir(Arc<RamDir>),
    File(Arc<RamFile>),
}

impl RamEntry {
    fn as_vnode(&self) -> Arc<dyn Vnode> {
        match self {
            Self::Dir(d) => Arc::clone(d) as Arc<dyn Vnode>,
            Self::File(f) => Arc::clone(f) as Arc<dyn Vnode>,
        }
    }
}

/// A directory node. Knows its own full path so `__getcwd` is a lookup, not
/// a reverse walk.
pub struct RamDir {
    path: String,
    entries: Mutex<BTreeMap<String, RamEntry>>,
}

impl RamDir {
    fn new(path: String) -> Arc<Self> {
        Arc::new(Self {
            path,
            entries: Mutex::new(BTreeMap::new()),
        })
    }

    fn child_path(&self, name: &str) -> String {
        if self.path.ends_with(':') {
            format!("{}{}", self.path, name)
        } else {
            format!("{}/{}", self.path, name)
        }
    }

    fn check_name(name: &str) -> KernelResult<()> {
        if name.is_empty() || name.len() > NAME_MAX || name.contains(['/', ':']) {
            return Err(Errno::Einval);
        }
        Ok(())
    }

    /// Seed a file with contents, for boot-time population and tests.
    pub fn add_file(self: &Arc<Self>, name: &str, contents: &[u8]) -> Arc<RamFile> {
        let file = RamFile::new();
        file.data.lock().extend_from_slice(contents);
        self.entries
            .lock()
            .insert(String::from(name), RamEntry::File(Arc::clone(&file)));
        file
    }

    /// Seed a subdirectory.
    pub fn add_dir(self: &Arc<Self>, name: &str) -> KernelResult<Arc<RamDir>> {
        Self::check_name(name)?;
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            return Err(Errno::Eexist);
        }
        let dir = RamDir::new(self.child_path(name));
        entries.insert(String::from(name), RamEntry::Dir(Arc::clone(&dir)));
        Ok(dir)
    }

    /// Names in this directory, sorted.
    pub fn list(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

impl Vnode for RamDir {
    fn node_type(&self) -> NodeType {
        NodeType::Directory
    }

    fn read(&self, _uio: &mut Uio<'_>) -> KernelResult<()> {
        Err(Errno::Eisdir)
    }

    fn write(&self, _uio: &mut Uio<'_>) -> KernelResult<()> {
        Err(Errno::Eisdir)
    }

    fn stat(&self) -> KernelResult<VStat> {
        Ok(VStat {
            size: 0,
            node_type: NodeType::Directory,
        })
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn Vnode>> {
        Self::check_name(name)?;
        let entries = self.entries.lock();
        entries.get(name).map(RamEntry::as_vnode).ok_or(Errno::Enoent)
    }

    fn create(&self, name: &str) -> KernelResult<Arc<dyn Vnode>> {
        Self::check_name(name)?;
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            return Err(Errno::Eexist);
        }
        let file = RamFile::new();
        entries.insert(String::from(name), RamEntry::File(Arc::clone(&file)));
        Ok(file)
    }

    fn mkdir(&self, name: &str) -> KernelResult<Arc<dyn Vnode>> {
        Self::check_name(name)?;
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            return Err(Errno::Eexist);
        }
        let dir = RamDir::new(self.child_path(name));
        entries.insert(String::from(name), RamEntry::Dir(Arc::clone(&dir)));
        Ok(dir)
    }

    fn name_path(&self) -> KernelResult<String> {
        Ok(self.path.clone())
    }
}

/// The mountable in-memory volume.
pub struct RamFs {
    volname: String,
    root: Arc<RamDir>,
}

impl RamFs {
    pub fn new(volname: &str) -> Self {
        Self {
            volname: String::from(volname),
            root: RamDir::new(format!("{}:", volname)),
        }
    }

    /// Direct handle on the root directory, for seeding.
    pub fn root_dir(&self) -> &Arc<RamDir> {
        &self.root
    }
}

impl FileSystem for RamFs {
    fn root(&self) -> Arc<dyn Vnode> {
        Arc::clone(&self.root) as Arc<dyn Vnode>
    }

    fn volname(&self) -> &str {
        &self.volname
    }
}
