//! IPC message record
//!
//! Fixed layout: kernel-assigned id, sender, optional reply port, payload
//! length, timestamp, and the inline payload. The kernel overwrites
//! `msg_id`, `sender`, and `timestamp` on send; the payload bytes cross
//! the ring bit-identical.

use crate::{config::IPC_MAX_MSG_SIZE, error::IpcError, sched::TaskId};

#[derive(Clone, Copy, Debug)]
pub struct Message {
    /// Kernel-assigned, monotonic per boot.
    pub msg_id: u64,
    pub sender: TaskId,
    /// Port the receiver may reply to (0 = none).
    pub reply_port: u64,
    pub payload_len: u32,
    /// Timer ticks at enqueue.
    pub timestamp: u64,
    payload: [u8; IPC_MAX_MSG_SIZE],
}

impl Message {
    /// Build an outgoing message from a user payload. Fails when the
    /// payload exceeds the inline capacity.
    pub fn new(payload: &[u8], reply_port: u64) -> Result<Self, IpcError> {
        if payload.len() > IPC_MAX_MSG_SIZE {
            return Err(IpcError::InvalidArgument);
        }
        let mut buf = [0u8; IPC_MAX_MSG_SIZE];
        buf[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            msg_id: 0,
            sender: 0,
            reply_port,
            payload_len: payload.len() as u32,
            timestamp: 0,
            payload: buf,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len as usize]
    }
}

impl Message {
    /// Const zero message; the port ring initializes its slots with it.
    pub(crate) const fn empty_const() -> Self {
        Self {
            msg_id: 0,
            sender: 0,
            reply_port: 0,
            payload_len: 0,
            timestamp: 0,
            payload: [0; IPC_MAX_MSG_SIZE],
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Self {
            msg_id: 0,
            sender: 0,
            reply_port: 0,
            payload_len: 0,
            timestamp: 0,
            payload: [0; IPC_MAX_MSG_SIZE],
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrips_bit_identical() {
        let data = [0xA5u8; 64];
        let msg = Message::new(&data, 7).expect("64 bytes fit");
        assert_eq!(msg.payload(), &data);
        assert_eq!(msg.reply_port, 7);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let data = [0u8; IPC_MAX_MSG_SIZE + 1];
        assert_eq!(Message::new(&data, 0).unwrap_err(), IpcError::InvalidArgument);
    }

    #[test]
    fn max_payload_is_accepted() {
        let data = [1u8; IPC_MAX_MSG_SIZE];
        let msg = Message::new(&data, 0).expect("exactly max fits");
        assert_eq!(msg.payload().len(), IPC_MAX_MSG_SIZE);
    }
}
