//! Console character device
//!
//! The device endpoint behind fd 0/1/2. Output goes to the serial
//! console; input is wired up by an external TTY driver replacing this
//! node, so reads here report end-of-input.

use alloc::sync::Arc;

use super::{next_node_id, NodeType, VfsNode};
use crate::error::FsError;

#[derive(Debug)]
pub struct Console {
    id: u64,
}

impl Console {
    pub fn new() -> Arc<Console> {
        Arc::new(Console {
            id: next_node_id(),
        })
    }
}

impl VfsNode for Console {
    fn id(&self) -> u64 {
        self.id
    }

    fn node_type(&self) -> NodeType {
        NodeType::CharDevice
    }

    fn read(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize, FsError> {
        Ok(0)
    }

    fn write(&self, _offset: u64, buf: &[u8]) -> Result<usize, FsError> {
        if let Ok(text) = core::str::from_utf8(buf) {
            crate::serial_print!("{}", text);
        } else {
            for b in buf {
                crate::serial_print!("{}", *b as char);
            }
        }
        Ok(buf.len())
    }
}
