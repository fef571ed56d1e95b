//! Virtual filesystem layer
//!
//! The kernel sees every file-like object through the [`Vnode`] trait; the
//! [`Vfs`] resolves path names onto vnodes across a device table (`con:`)
//! and mounted volumes (`volume:path`). Vnode sharing is reference counting:
//! cloning an `Arc<dyn Vnode>` takes a reference, dropping it releases one,
//! and the object (and any underlying storage session) closes with the last
//! drop.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{Errno, KernelResult};

pub mod devfs;
pub mod file;
pub mod ramfs;
pub mod uio;

pub use file::{FileTable, OpenFile, OpenFlags, OPEN_MAX};
pub use uio::{Uio, UioRw};

/// Maximum path length, including the terminator.
pub const PATH_MAX: usize = 1024;

/// Maximum length of a single path component.
pub const NAME_MAX: usize = 255;

/// Filesystem node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
    CharDevice,
}

/// File metadata as reported by [`Vnode::stat`].
#[derive(Debug, Clone, Copy)]
pub struct VStat {
    pub size: i64,
    pub node_type: NodeType,
}

/// Operations every file-like object supports.
///
/// Offsets live in the caller's [`Uio`], not in the vnode: a vnode is
/// position-less, and the open-file layer above decides where to read or
/// write.
impl core::fmt::Debug for dyn Vnode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Vnode({:?})", self.node_type())
    }
}

pub trait Vnode: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// Transfer data from the object into the uio's buffer, starting at the
    /// uio's offset. Moving nothing signals end-of-file.
    fn read(&self, uio: &mut Uio<'_>) -> KernelResult<()>;

    /// Transfer data from the uio's buffer into the object at the uio's
    /// offset.
    fn write(&self, uio: &mut Uio<'_>) -> KernelResult<()>;

    fn stat(&self) -> KernelResult<VStat>;

    /// Whether seek offsets mean anything for this object.
    fn is_seekable(&self) -> bool {
        true
    }

    /// Look up a child by name (directories only).
    fn lookup(&self, _name: &str) -> KernelResult<Arc<dyn Vnode>> {
        Err(Errno::Enotdir)
    }

    /// Create a regular file in this directory.
    fn create(&self, _name: &str) -> KernelResult<Arc<dyn Vnode>> {
        Err(Errno::Enotdir)
    }

    /// Create a subdirectory in this directory.
    fn mkdir(&self, _name: &str) -> KernelResult<Arc<dyn Vnode>> {
        Err(Errno::Enotdir)
    }

    /// Truncate a regular file to `size` bytes.
    fn truncate(&self, _size: usize) -> KernelResult<()> {
        Err(Errno::Einval)
    }

    /// Full path of this node, for `__getcwd`. Only directories answer.
    fn name_path(&self) -> KernelResult<String> {
        Err(Errno::Enosys)
    }
}

/// A mountable filesystem.
pub trait FileSystem: Send + Sync {
    /// Root directory of the volume.
    fn root(&self) -> Arc<dyn Vnode>;

    /// Volume name this filesystem is addressed by (`name:path`).
    fn volname(&self) -> &str;
}

/// Path-name resolution over devices and mounted volumes.
pub struct Vfs {
    devices: Mutex<BTreeMap<String, Arc<dyn Vnode>>>,
    mounts: Mutex<BTreeMap<String, Arc<dyn FileSystem>>>,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(BTreeMap::new()),
            mounts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a device vnode under `name` (opened as `"name:"`).
    pub fn register_device(&self, name: &str, vnode: Arc<dyn Vnode>) {
        self.devices.lock().insert(String::from(name), vnode);
    }

    /// Mount a filesystem under its volume name.
    pub fn mount(&self, fs: Arc<dyn FileSystem>) -> KernelResult<()> {
        let mut mounts = self.mounts.lock();
        let name = String::from(fs.volname());
        if mounts.contains_key(&name) {
            return Err(Errno::Eexist);
        }
        mounts.insert(name, fs);
        Ok(())
    }

    /// Open `path`, honoring the create/excl/truncate flags. Relative paths
    /// resolve against `cwd`.
    pub fn open(
        &self,
        cwd: Option<&Arc<dyn Vnode>>,
        path: &str,
        flags: OpenFlags,
    ) -> KernelResult<Arc<dyn Vnode>> {
        if path.is_empty() {
            return Err(Errno::Einval);
        }

        let (start, rest) = self.resolve_start(cwd, path)?;
        let comps: Vec<&str> = rest
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();

        let node = if comps.is_empty() {
            start
        } else {
            let mut dir = start;
            for comp in &comps[..comps.len() - 1] {
                dir = dir.lookup(comp)?;
            }
            let last = comps[comps.len() - 1];
            match dir.lookup(last) {
                Ok(found) => {
                    if flags.create && flags.excl {
                        return Err(Errno::Eexist);
                    }
                    found
                }
                Err(Errno::Enoent) if flags.create => dir.create(last)?,
                Err(e) => return Err(e),
            }
        };

        if flags.write && node.node_type() == NodeType::Directory {
            return Err(Errno::Eisdir);
        }
        if flags.truncate && node.node_type() == NodeType::File {
            node.truncate(0)?;
        }
        Ok(node)
    }

    /// Resolve `path` to an existing vnode (no creation).
    pub fn lookup(
        &self,
        cwd: Option<&Arc<dyn Vnode>>,
        path: &str,
    ) -> KernelResult<Arc<dyn Vnode>> {
        self.open(cwd, path, OpenFlags::read_only())
    }

    /// Resolve `path` for chdir: it must name a directory.
    pub fn chdir(
        &self,
        cwd: Option<&Arc<dyn Vnode>>,
        path: &str,
    ) -> KernelResult<Arc<dyn Vnode>> {
        let node = self.lookup(cwd, path)?;
        if node.node_type() != NodeType::Directory {
            return Err(Errno::Enotdir);
        }
        Ok(node)
    }

    /// Write the name of `cwd` into `uio`. The result is not
    /// NUL-terminated; the transferred length is the answer.
    pub fn getcwd(&self, cwd: Option<&Arc<dyn Vnode>>, uio: &mut Uio<'_>) -> KernelResult<()> {
        let dir = cwd.ok_or(Errno::Enoent)?;
        let path = dir.name_path()?;
        uio.move_out(path.as_bytes())?;
        Ok(())
    }

    fn resolve_start<'p>(
        &self,
        cwd: Option<&Arc<dyn Vnode>>,
        path: &'p str,
    ) -> KernelResult<(Arc<dyn Vnode>, &'p str)> {
        match path.split_once(':') {
            Some((vol, rest)) => {
                if let Some(dev) = self.devices.lock().get(vol) {
                    // Devices have no interior structure to resolve into.
                    if !rest.is_empty() {
                        return Err(Errno::Enodev);
                    }
                    return Ok((Arc::clone(dev), rest));
                }
                let mounts = self.mounts.lock();
                let fs = mounts.get(vol).ok_or(Errno::Enodev)?;
                Ok((fs.root(), rest))
            }
            None => {
                let dir = cwd.ok_or(Errno::Enoent)?;
                Ok((Arc::clone(dir), path))
            }
        }
    }
}
