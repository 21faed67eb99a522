//! In-memory filesystem
//!
//! Backs `/` when no external filesystem is mounted: boot modules, exec
//! images, and the test suites all go through it. Directories map names
//! to nodes; files are growable byte vectors.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::{next_node_id, DirEntry, NodeType, VfsNode, VfsNodeRef};
use crate::error::FsError;

/// A ramfs directory.
#[derive(Debug)]
pub struct RamFs {
    id: u64,
    entries: Mutex<BTreeMap<String, VfsNodeRef>>,
}

/// A ramfs regular file.
#[derive(Debug)]
pub struct RamFile {
    id: u64,
    data: Mutex<Vec<u8>>,
}

impl RamFs {
    /// A fresh, empty directory usable as a filesystem root.
    pub fn new_root() -> Arc<RamFs> {
        Arc::new(RamFs {
            id: next_node_id(),
            entries: Mutex::new(BTreeMap::new()),
        })
    }

    /// Link a foreign node (console device, preloaded boot module) into
    /// this directory.
    pub fn link(&self, name: &str, node: VfsNodeRef) -> Result<(), FsError> {
        valid_name(name)?;
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        entries.insert(String::from(name), node);
        Ok(())
    }
}

impl RamFile {
    fn new() -> Arc<RamFile> {
        Arc::new(RamFile {
            id: next_node_id(),
            data: Mutex::new(Vec::new()),
        })
    }

    /// Create a file pre-filled with `data` (boot modules).
    pub fn with_data(data: Vec<u8>) -> Arc<RamFile> {
        Arc::new(RamFile {
            id: next_node_id(),
            data: Mutex::new(data),
        })
    }
}

fn valid_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        Err(FsError::InvalidArgument)
    } else {
        Ok(())
    }
}

impl VfsNode for RamFs {
    fn id(&self) -> u64 {
        self.id
    }

    fn node_type(&self) -> NodeType {
        NodeType::Directory
    }

    fn readdir(&self, index: usize) -> Result<Option<DirEntry>, FsError> {
        let entries = self.entries.lock();
        Ok(entries.iter().nth(index).map(|(name, node)| DirEntry {
            name: name.clone(),
            node_type: node.node_type(),
        }))
    }

    fn finddir(&self, name: &str) -> Result<VfsNodeRef, FsError> {
        self.entries
            .lock()
            .get(name)
            .cloned()
            .ok_or(FsError::NotFound)
    }

    fn create(&self, name: &str) -> Result<VfsNodeRef, FsError> {
        valid_name(name)?;
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let file = RamFile::new();
        entries.insert(String::from(name), file.clone());
        Ok(file)
    }

    fn mkdir(&self, name: &str) -> Result<VfsNodeRef, FsError> {
        valid_name(name)?;
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let dir = RamFs::new_root();
        entries.insert(String::from(name), dir.clone());
        Ok(dir)
    }

    fn unlink(&self, name: &str) -> Result<(), FsError> {
        let mut entries = self.entries.lock();
        match entries.get(name) {
            None => Err(FsError::NotFound),
            Some(node) if node.node_type() == NodeType::Directory => Err(FsError::IsADirectory),
            Some(_) => {
                entries.remove(name);
                Ok(())
            }
        }
    }

    fn rmdir(&self, name: &str) -> Result<(), FsError> {
        let mut entries = self.entries.lock();
        match entries.get(name) {
            None => Err(FsError::NotFound),
            Some(node) if node.node_type() != NodeType::Directory => Err(FsError::NotADirectory),
            Some(node) => {
                let empty = node.readdir(0).map(|e| e.is_none()).unwrap_or(false);
                if !empty {
                    return Err(FsError::NotEmpty);
                }
                entries.remove(name);
                Ok(())
            }
        }
    }

    fn rename(&self, old: &str, new: &str) -> Result<(), FsError> {
        valid_name(new)?;
        let mut entries = self.entries.lock();
        let node = entries.remove(old).ok_or(FsError::NotFound)?;
        // Rename replaces an existing target, like rename(2).
        entries.insert(String::from(new), node);
        Ok(())
    }
}

impl VfsNode for RamFile {
    fn id(&self) -> u64 {
        self.id
    }

    fn node_type(&self) -> NodeType {
        NodeType::File
    }

    fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let data = self.data.lock();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<usize, FsError> {
        let mut data = self.data.lock();
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn truncate(&self, len: u64) -> Result<(), FsError> {
        self.data.lock().resize(len as usize, 0);
        Ok(())
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn file_read_write_roundtrip() {
        let root = RamFs::new_root();
        let f = root.create("a").expect("create");
        assert_eq!(f.write(0, b"hello world").expect("write"), 11);
        let mut buf = [0u8; 5];
        assert_eq!(f.read(6, &mut buf).expect("read"), 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn read_past_end_returns_zero() {
        let root = RamFs::new_root();
        let f = root.create("a").expect("create");
        f.write(0, b"xy").expect("write");
        let mut buf = [0u8; 4];
        assert_eq!(f.read(2, &mut buf).expect("read at end"), 0);
        assert_eq!(f.read(100, &mut buf).expect("read past end"), 0);
    }

    #[test]
    fn sparse_write_zero_fills_the_gap() {
        let root = RamFs::new_root();
        let f = root.create("a").expect("create");
        f.write(4, b"zz").expect("write at offset");
        let mut buf = [0xFFu8; 6];
        assert_eq!(f.read(0, &mut buf).expect("read"), 6);
        assert_eq!(&buf, &[0, 0, 0, 0, b'z', b'z']);
    }

    #[test]
    fn create_duplicate_fails() {
        let root = RamFs::new_root();
        root.create("a").expect("create");
        assert_eq!(root.create("a").unwrap_err(), FsError::AlreadyExists);
    }

    #[test]
    fn unlink_refuses_directories() {
        let root = RamFs::new_root();
        root.mkdir("d").expect("mkdir");
        assert_eq!(root.unlink("d").unwrap_err(), FsError::IsADirectory);
        root.rmdir("d").expect("rmdir empty dir");
        assert_eq!(root.rmdir("d").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn rmdir_refuses_nonempty() {
        let root = RamFs::new_root();
        let d = root.mkdir("d").expect("mkdir");
        d.create("child").expect("create child");
        assert_eq!(root.rmdir("d").unwrap_err(), FsError::NotEmpty);
    }

    #[test]
    fn rename_moves_and_replaces() {
        let root = RamFs::new_root();
        let f = root.create("old").expect("create");
        f.write(0, b"data").expect("write");
        root.create("target").expect("create target");

        root.rename("old", "target").expect("rename replaces");
        assert_eq!(root.finddir("old").unwrap_err(), FsError::NotFound);
        let moved = root.finddir("target").expect("target exists");
        assert_eq!(moved.len(), 4);
    }

    #[test]
    fn readdir_enumerates_in_order() {
        let root = RamFs::new_root();
        root.create("b").expect("create");
        root.create("a").expect("create");
        root.mkdir("c").expect("mkdir");

        let names: alloc::vec::Vec<String> = (0..)
            .map_while(|i| root.readdir(i).expect("readdir").map(|e| e.name))
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}
