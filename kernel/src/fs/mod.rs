//! Virtual filesystem
//!
//! A polymorphic node interface over trait objects, a mount table that
//! transparently forwards a directory to another subtree, and absolute
//! path resolution. Concrete filesystems implement [`VfsNode`]; the core
//! ships [`ramfs`] (mounted at `/` when no external filesystem is
//! supplied) and the serial-backed [`console`] character device. Disk
//! filesystems and `/dev`/`/proc` providers are external collaborators
//! that plug in through the same trait.

pub mod block;
pub mod console;
pub mod fd;
pub mod pipe;
pub mod ramfs;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::error::FsError;

/// What a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
    CharDevice,
}

/// One directory entry as returned by `readdir`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub node_type: NodeType,
}

pub type VfsNodeRef = Arc<dyn VfsNode>;

/// The polymorphic node interface.
///
/// Defaults return `NotSupported` so concrete types implement only the
/// operations their kind admits (files skip the directory family and
/// vice versa).
pub trait VfsNode: Send + Sync + core::fmt::Debug {
    /// Stable node identity; keys the mount table.
    fn id(&self) -> u64;

    fn node_type(&self) -> NodeType;

    fn len(&self) -> u64 {
        0
    }

    fn read(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    fn write(&self, _offset: u64, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    fn truncate(&self, _len: u64) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    /// Entry at position `index`, or `Ok(None)` past the end.
    fn readdir(&self, _index: usize) -> Result<Option<DirEntry>, FsError> {
        Err(FsError::NotADirectory)
    }

    fn finddir(&self, _name: &str) -> Result<VfsNodeRef, FsError> {
        Err(FsError::NotADirectory)
    }

    fn create(&self, _name: &str) -> Result<VfsNodeRef, FsError> {
        Err(FsError::NotSupported)
    }

    fn mkdir(&self, _name: &str) -> Result<VfsNodeRef, FsError> {
        Err(FsError::NotSupported)
    }

    fn unlink(&self, _name: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn rmdir(&self, _name: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn rename(&self, _old: &str, _new: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }
}

static NODE_IDS: AtomicU64 = AtomicU64::new(1);

/// Allocate a node id; every concrete node takes one at construction.
pub fn next_node_id() -> u64 {
    NODE_IDS.fetch_add(1, Ordering::Relaxed)
}

/// Mount table plus root. Resolution redirects through mounts at every
/// step, so a mounted directory transparently becomes the mounted
/// filesystem's root.
pub struct Vfs {
    root: Mutex<Option<VfsNodeRef>>,
    mounts: Mutex<BTreeMap<u64, VfsNodeRef>>,
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(None),
            mounts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Install the root filesystem.
    pub fn mount_root(&self, node: VfsNodeRef) {
        *self.root.lock() = Some(node);
    }

    pub fn root(&self) -> Result<VfsNodeRef, FsError> {
        self.root.lock().clone().ok_or(FsError::NotFound)
    }

    /// Mount `fs_root` over the directory at `path`.
    pub fn mount(&self, path: &str, fs_root: VfsNodeRef) -> Result<(), FsError> {
        let at = self.resolve(path)?;
        if at.node_type() != NodeType::Directory {
            return Err(FsError::NotADirectory);
        }
        let mut mounts = self.mounts.lock();
        if mounts.contains_key(&at.id()) {
            return Err(FsError::AlreadyExists);
        }
        mounts.insert(at.id(), fs_root);
        Ok(())
    }

    /// Remove the mount covering the directory at `path`.
    pub fn unmount(&self, path: &str) -> Result<(), FsError> {
        // Resolve the mount point itself, not the mounted root: walk to
        // the parent and look the final component up un-forwarded.
        let (parent, name) = self.resolve_parent(path)?;
        let at = parent.finddir(&name)?;
        self.mounts
            .lock()
            .remove(&at.id())
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }

    fn forward(&self, node: VfsNodeRef) -> VfsNodeRef {
        match self.mounts.lock().get(&node.id()) {
            Some(mounted) => mounted.clone(),
            None => node,
        }
    }

    /// Resolve an absolute path to a node, following mounts.
    pub fn resolve(&self, path: &str) -> Result<VfsNodeRef, FsError> {
        let mut node = self.forward(self.root()?);
        for component in components(path) {
            node = self.forward(node.finddir(component)?);
        }
        Ok(node)
    }

    /// Resolve to the parent directory of `path`, returning it and the
    /// final component. Used by create/unlink/rename-style operations.
    pub fn resolve_parent(&self, path: &str) -> Result<(VfsNodeRef, String), FsError> {
        let parts: Vec<&str> = components(path).collect();
        let (last, dirs) = parts.split_last().ok_or(FsError::InvalidArgument)?;
        let mut node = self.forward(self.root()?);
        for component in dirs {
            node = self.forward(node.finddir(component)?);
        }
        if node.node_type() != NodeType::Directory {
            return Err(FsError::NotADirectory);
        }
        Ok((node, String::from(*last)))
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use alloc::vec;

    fn fixture() -> Vfs {
        let vfs = Vfs::new();
        let root = ramfs::RamFs::new_root();
        vfs.mount_root(root.clone());
        let etc = root.mkdir("etc").expect("mkdir etc");
        let f = etc.create("motd").expect("create motd");
        f.write(0, b"hello").expect("write motd");
        vfs
    }

    #[test]
    fn resolve_walks_components() {
        let vfs = fixture();
        let node = vfs.resolve("/etc/motd").expect("path exists");
        assert_eq!(node.node_type(), NodeType::File);
        assert_eq!(node.len(), 5);
    }

    #[test]
    fn resolve_missing_is_not_found() {
        let vfs = fixture();
        assert_eq!(vfs.resolve("/no/such").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn resolve_parent_splits_final_component() {
        let vfs = fixture();
        let (parent, name) = vfs.resolve_parent("/etc/new.txt").expect("parent exists");
        assert_eq!(parent.node_type(), NodeType::Directory);
        assert_eq!(name, "new.txt");
    }

    #[test]
    fn mount_forwards_into_subtree() {
        let vfs = fixture();
        let other = ramfs::RamFs::new_root();
        other.create("inner").expect("create inner");
        vfs.mount("/etc", other).expect("mount over /etc");

        // /etc now shows the mounted filesystem, not the original.
        assert!(vfs.resolve("/etc/inner").is_ok());
        assert_eq!(vfs.resolve("/etc/motd").unwrap_err(), FsError::NotFound);

        vfs.unmount("/etc").expect("unmount");
        assert!(vfs.resolve("/etc/motd").is_ok());
    }

    #[test]
    fn dot_and_duplicate_slashes_are_tolerated() {
        let vfs = fixture();
        assert!(vfs.resolve("//etc/./motd").is_ok());
        let roots = vec!["/", "//", "/."];
        for r in roots {
            assert_eq!(
                vfs.resolve(r).expect("root resolves").node_type(),
                NodeType::Directory
            );
        }
    }
}
