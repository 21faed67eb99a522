//! Kernel-wide tunables and boot-time configuration
//!
//! Compile-time constants live at the top; everything that can be overridden
//! from the bootloader command line is collected in [`BootConfig`], parsed
//! once during bootstrap and stored in the kernel context.

/// Maximum number of task slots in the global task table.
pub const MAX_TASKS: usize = 256;

/// Maximum number of CPUs the scheduler allocates state for.
/// Only the bootstrap CPU is brought up by the core; the rest of the
/// per-CPU state exists for the SMP bring-up path supplied by boot glue.
pub const MAX_CPUS: usize = 16;

/// Entries in a per-task file descriptor table.
pub const FD_TABLE_SIZE: usize = 64;

/// Messages a single IPC port can queue before send fails with QueueFull.
pub const IPC_PORT_QUEUE_SIZE: usize = 16;

/// Inline payload bytes carried by one IPC message.
pub const IPC_MAX_MSG_SIZE: usize = 128;

/// Maximum simultaneously live IPC ports.
pub const IPC_MAX_PORTS: usize = 128;

/// Longest registrable port name, in bytes.
pub const IPC_NAME_MAX_LEN: usize = 31;

/// Maximum simultaneously live shared memory regions.
pub const SHMEM_MAX_REGIONS: usize = 64;

/// Kernel stack size per task (16 KiB).
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// User stack VMA size (8 MiB).
pub const USER_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Top of the user stack; the VMA spans [top - USER_STACK_SIZE, top).
pub const USER_STACK_TOP: u64 = 0x0000_7FFF_FFFF_F000;

/// Lowest mappable user address. Everything below stays unmapped so null
/// dereferences fault.
pub const USER_SPACE_BASE: u64 = 0x0000_0000_0040_0000;

/// Exclusive upper bound of the user canonical lower half.
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// Base of the region `find_free_region` hands out for mmap and shmem
/// mappings.
pub const MMAP_REGION_BASE: u64 = 0x0000_1000_0000_0000;

/// Kernel heap window.
pub const KERNEL_HEAP_START: u64 = 0xFFFF_8800_0000_0000;
pub const KERNEL_HEAP_SIZE: usize = 16 * 1024 * 1024;

/// Timer interrupt frequency in Hz.
pub const TIMER_HZ: u64 = 100;

/// Scheduling quantum, in timer ticks.
pub const TIME_SLICE_TICKS: u32 = 5;

/// Longest string a syscall will copy from user space (paths, names).
pub const USER_STR_MAX: usize = 4096;

/// Boot-time configuration parsed from the bootloader command line.
///
/// Flags are `key=value` pairs separated by whitespace. Unknown keys are
/// ignored so newer bootloaders can pass flags this kernel predates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Maximum log level actually emitted to the serial console.
    pub loglevel: log::LevelFilter,
    /// Run the in-kernel self checks during bootstrap.
    pub selftest: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            loglevel: log::LevelFilter::Info,
            selftest: false,
        }
    }
}

impl BootConfig {
    /// Parse a bootloader command line.
    pub fn parse(cmdline: &str) -> Self {
        let mut cfg = Self::default();
        for word in cmdline.split_ascii_whitespace() {
            let (key, value) = match word.split_once('=') {
                Some(kv) => kv,
                None => (word, ""),
            };
            match key {
                "loglevel" => {
                    cfg.loglevel = match value {
                        "error" => log::LevelFilter::Error,
                        "warn" => log::LevelFilter::Warn,
                        "info" => log::LevelFilter::Info,
                        "debug" => log::LevelFilter::Debug,
                        "trace" => log::LevelFilter::Trace,
                        _ => cfg.loglevel,
                    };
                }
                "selftest" => cfg.selftest = value.is_empty() || value == "1" || value == "on",
                _ => {}
            }
        }
        cfg
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_on_empty_cmdline() {
        let cfg = BootConfig::parse("");
        assert_eq!(cfg, BootConfig::default());
    }

    #[test]
    fn parse_loglevel_and_selftest() {
        let cfg = BootConfig::parse("loglevel=debug selftest");
        assert_eq!(cfg.loglevel, log::LevelFilter::Debug);
        assert!(cfg.selftest);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = BootConfig::parse("acpi=off loglevel=warn video=vesa");
        assert_eq!(cfg.loglevel, log::LevelFilter::Warn);
        assert!(!cfg.selftest);
    }
}
