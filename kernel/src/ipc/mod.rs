//! Inter-process communication: typed ports with bounded message queues,
//! a system-wide name registry, and refcounted shared memory regions.

pub mod message;
pub mod port;
pub mod registry;
pub mod shmem;

pub use message::Message;
pub use port::{Port, PortTable, MsgRing, IPC_BLOCK, IPC_NONBLOCK};
pub use registry::NameRegistry;
pub use shmem::{ShmemFlags, ShmemTable};
