// Memory collaborators: physical pages and user address-space copies
use alloc::string::String;
use core::fmt;

use crate::process::context::SavedContext;

/// Handle to one physical page handed out by a [`PageAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageRef {
    frame: usize,
}

impl PageRef {
    pub const fn new(frame: usize) -> Self {
        Self { frame }
    }

    /// Physical frame number.
    pub fn frame(&self) -> usize {
        self.frame
    }
}

/// Physical page allocator.
///
/// Pages come back zeroed with a reference count of zero; whoever keeps one
/// takes a reference with [`incref`](PageAllocator::incref).
pub trait PageAllocator: Send + Sync {
    fn alloc_page(&self) -> Option<PageRef>;
    fn incref(&self, page: &PageRef);
}

/// A user memory access that could not be completed.
///
/// Carries the trap the access raised so it can be reflected to the
/// parent as if the process itself had caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserFault {
    pub trapno: u64,
    pub err: u64,
}

impl fmt::Display for UserFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "user access fault (trap {}, err {:#x})", self.trapno, self.err)
    }
}

/// Copies between the kernel and the current process's address space.
///
/// The core validates the address range against the user window before
/// calling in; implementations only report faults on unmapped memory.
pub trait UserMemory: Send + Sync {
    fn read_context(&self, uva: u64) -> Result<SavedContext, UserFault>;
    fn write_context(&self, uva: u64, ctx: &SavedContext) -> Result<(), UserFault>;
    /// Reads a NUL-terminated string, stopping after `max_len` bytes.
    fn read_str(&self, uva: u64, max_len: usize) -> Result<String, UserFault>;
}
