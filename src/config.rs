//! Process-management configuration.
//!
//! Compile-time limits live here as constants; the values a booting kernel
//! may want to tune are collected in [`KernelConfig`].

/// Number of child slots in every process record.
pub const MAX_CHILDREN: usize = 256;

/// Default capacity of the process table, root included.
pub const MAX_PROCESSES: usize = 64;

/// Width in bytes of the trapping syscall instruction (`int $0x30`, `cd 30`).
///
/// A syscall that cannot complete yet is rewound by this much so the
/// process re-executes it when it next runs.
pub const SYSCALL_INSN_LEN: u64 = 2;

/// Lowest user virtual address a syscall payload may reference.
pub const USER_LO: u64 = 0x4000_0000;

/// One past the highest user virtual address a syscall payload may reference.
pub const USER_HI: u64 = 0xF000_0000;

/// Longest string the debug print syscall copies in.
pub const CONSOLE_MAX: usize = 256;

/// Lines the in-kernel console buffer holds before it starts dropping.
pub const CONSOLE_BUFFER_LINES: usize = 128;

/// GDT index of the user code segment.
pub const USER_CODE_INDEX: u16 = 3;

/// GDT index of the user data segment.
pub const USER_DATA_INDEX: u16 = 4;

/// Runtime-tunable limits for a [`Kernel`](crate::Kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Process table capacity, root included.
    pub max_processes: usize,
    /// Start of the user window syscall payloads must lie in.
    pub user_lo: u64,
    /// End (exclusive) of the user window.
    pub user_hi: u64,
    /// Maximum debug print length.
    pub console_max: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_processes: MAX_PROCESSES,
            user_lo: USER_LO,
            user_hi: USER_HI,
            console_max: CONSOLE_MAX,
        }
    }
}

impl KernelConfig {
    /// Returns `true` if `[uva, uva + size)` lies inside the user window.
    pub fn is_user_range(&self, uva: u64, size: usize) -> bool {
        let Some(end) = uva.checked_add(size as u64) else {
            return false;
        };
        uva >= self.user_lo && end <= self.user_hi
    }
}
