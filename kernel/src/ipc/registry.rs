//! Port name registry
//!
//! System-wide unique names (<= 31 bytes) bound to port ids. Registering
//! a new name for a port replaces that port's previous name; binding a
//! name already held by a different port fails.

use alloc::collections::BTreeMap;
use alloc::string::String;

use spin::Mutex;

use crate::{config::IPC_NAME_MAX_LEN, error::IpcError};

pub struct NameRegistry {
    names: Mutex<BTreeMap<String, u64>>,
}

impl NameRegistry {
    pub const fn new() -> Self {
        Self {
            names: Mutex::new(BTreeMap::new()),
        }
    }

    /// Bind `name` to `port`.
    pub fn register(&self, port: u64, name: &str) -> Result<(), IpcError> {
        if name.is_empty() || name.len() > IPC_NAME_MAX_LEN {
            return Err(IpcError::InvalidArgument);
        }
        let mut names = self.names.lock();
        if let Some(&bound) = names.get(name) {
            if bound != port {
                return Err(IpcError::NameUnavailable);
            }
            return Ok(());
        }
        // A port holds at most one name; re-registration replaces it.
        names.retain(|_, &mut p| p != port);
        names.insert(String::from(name), port);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<u64, IpcError> {
        self.names
            .lock()
            .get(name)
            .copied()
            .ok_or(IpcError::NameUnavailable)
    }

    /// Drop any name bound to `port` (port destruction).
    pub fn unregister_port(&self, port: u64) {
        self.names.lock().retain(|_, &mut p| p != port);
    }

    pub fn count(&self) -> usize {
        self.names.lock().len()
    }
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_roundtrip() {
        let reg = NameRegistry::new();
        reg.register(3, "svc.echo").expect("fresh name binds");
        assert_eq!(reg.lookup("svc.echo").expect("bound"), 3);
        assert_eq!(reg.lookup("svc.other"), Err(IpcError::NameUnavailable));
    }

    #[test]
    fn name_bound_elsewhere_is_rejected() {
        let reg = NameRegistry::new();
        reg.register(1, "svc.echo").expect("binds");
        assert_eq!(reg.register(2, "svc.echo"), Err(IpcError::NameUnavailable));
        // Same port re-registering its own name is a no-op success.
        reg.register(1, "svc.echo").expect("idempotent");
    }

    #[test]
    fn new_name_replaces_ports_previous_name() {
        let reg = NameRegistry::new();
        reg.register(4, "svc.old").expect("binds");
        reg.register(4, "svc.new").expect("rebinding replaces");
        assert_eq!(reg.lookup("svc.old"), Err(IpcError::NameUnavailable));
        assert_eq!(reg.lookup("svc.new").expect("bound"), 4);
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn length_limits_enforced() {
        let reg = NameRegistry::new();
        assert_eq!(reg.register(1, ""), Err(IpcError::InvalidArgument));
        let long = "x".repeat(IPC_NAME_MAX_LEN + 1);
        assert_eq!(reg.register(1, &long), Err(IpcError::InvalidArgument));
        let max = "x".repeat(IPC_NAME_MAX_LEN);
        reg.register(1, &max).expect("max length binds");
    }

    #[test]
    fn unregister_port_clears_its_binding() {
        let reg = NameRegistry::new();
        reg.register(9, "svc.gone").expect("binds");
        reg.unregister_port(9);
        assert_eq!(reg.lookup("svc.gone"), Err(IpcError::NameUnavailable));
    }
}
