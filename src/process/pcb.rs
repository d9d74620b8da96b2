// Process Control Block (PCB) for EMOS
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::{Mutex, MutexGuard, Once};

use crate::config::MAX_CHILDREN;
use crate::cpu::CpuId;
use crate::mem::PageRef;
use crate::process::context::SavedContext;

/// Index of a process record in the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub usize);

impl ProcessId {
    /// The root process always occupies the first slot.
    pub const ROOT: ProcessId = ProcessId(0);
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stop,  // Not running; initial and resting state
    Ready, // Runnable, in the ready queue
    Run,   // Executing on exactly one CPU
    Wait,  // Blocked until a specific child stops
}

/// Process management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    OutOfMemory,
    TableFull,
    InvalidChildIndex,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessError::OutOfMemory => write!(f, "Out of memory"),
            ProcessError::TableFull => write!(f, "Process table full"),
            ProcessError::InvalidChildIndex => write!(f, "Invalid child index"),
        }
    }
}

/// Fields set once when a record is allocated.
#[derive(Debug)]
pub struct ProcessMeta {
    /// Position in the process tree, e.g. `[0][3]`. Root is empty.
    pub identity: String,
    pub parent: Option<ProcessId>,
    /// Backing page; the root has none.
    pub page: Option<PageRef>,
}

/// Lock-protected part of a process record.
#[derive(Debug)]
pub struct ProcessInner {
    pub state: ProcessState,
    /// Child this process is blocked on; `Some` iff `state == Wait`.
    pub waiting_on: Option<ProcessId>,
    /// CPU running this process; `Some` iff `state == Run`.
    pub run_cpu: Option<CpuId>,
    /// Valid whenever the process is not running.
    pub saved: SavedContext,
}

impl ProcessInner {
    fn new() -> Self {
        Self {
            state: ProcessState::Stop,
            waiting_on: None,
            run_cpu: None,
            saved: SavedContext::user(),
        }
    }
}

/// Process Control Block - one slot of the process table
pub struct ProcessControlBlock {
    claimed: AtomicBool,
    meta: Once<ProcessMeta>,
    children: Box<[Once<ProcessId>]>,
    inner: Mutex<ProcessInner>,
}

impl ProcessControlBlock {
    fn empty() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            meta: Once::new(),
            children: (0..MAX_CHILDREN).map(|_| Once::new()).collect(),
            inner: Mutex::new(ProcessInner::new()),
        }
    }

    /// Allocation-time fields, or `None` while the slot is free.
    pub fn meta(&self) -> Option<&ProcessMeta> {
        self.meta.get()
    }

    pub fn identity(&self) -> &str {
        self.meta().map(|m| m.identity.as_str()).unwrap_or("?")
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.meta().and_then(|m| m.parent)
    }

    pub fn page(&self) -> Option<PageRef> {
        self.meta().and_then(|m| m.page)
    }

    /// Child in slot `cn`, if one was ever allocated there.
    pub fn child(&self, cn: usize) -> Option<ProcessId> {
        self.children.get(cn).and_then(|slot| slot.get().copied())
    }

    pub fn lock(&self) -> MutexGuard<'_, ProcessInner> {
        self.inner.lock()
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }
}

/// Arena of process records. Slots are claimed once and never freed.
pub struct ProcessTable {
    slots: Box<[ProcessControlBlock]>,
}

impl ProcessTable {
    /// Creates a table of `capacity` slots with the root in slot 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "process table needs room for the root");
        let slots: Box<[ProcessControlBlock]> =
            (0..capacity).map(|_| ProcessControlBlock::empty()).collect();
        let root = &slots[ProcessId::ROOT.0];
        root.claimed.store(true, Ordering::Release);
        root.meta.call_once(|| ProcessMeta {
            identity: String::new(),
            parent: None,
            page: None,
        });
        Self { slots }
    }

    /// Record for `pid`. An id that was never handed out is a kernel bug.
    pub fn get(&self, pid: ProcessId) -> &ProcessControlBlock {
        match self.slots.get(pid.0) {
            Some(pcb) if pcb.meta.get().is_some() => pcb,
            _ => panic!("process {} is not allocated", pid),
        }
    }

    /// Reserves a free slot.
    pub fn claim(&self) -> Option<ProcessId> {
        self.slots.iter().position(|pcb| {
            pcb.claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
        .map(ProcessId)
    }

    /// Gives back a slot whose allocation failed before it was initialized.
    pub fn release(&self, pid: ProcessId) {
        let pcb = &self.slots[pid.0];
        debug_assert!(pcb.meta.get().is_none());
        pcb.claimed.store(false, Ordering::Release);
    }

    /// Publishes a claimed slot as a stopped process and links it under
    /// its parent.
    pub fn init(&self, pid: ProcessId, parent: Option<ProcessId>, cn: usize, page: PageRef) {
        let identity = match parent {
            Some(p) => format!("{}[{}]", self.get(p).identity(), cn),
            None => format!("[{}]", cn),
        };
        let pcb = &self.slots[pid.0];
        *pcb.inner.lock() = ProcessInner::new();
        pcb.meta.call_once(|| ProcessMeta {
            identity,
            parent,
            page: Some(page),
        });
        if let Some(p) = parent {
            let linked = *self.get(p).children[cn].call_once(|| pid);
            assert_eq!(
                linked, pid,
                "child slot {} of {} was already taken",
                cn,
                self.get(p).identity()
            );
        }
    }

    /// Allocated records in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ProcessId, &ProcessControlBlock)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, pcb)| pcb.meta.get().is_some())
            .map(|(i, pcb)| (ProcessId(i), pcb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preallocated() {
        let table = ProcessTable::new(4);
        let root = table.get(ProcessId::ROOT);
        assert_eq!(root.identity(), "");
        assert_eq!(root.parent(), None);
        assert_eq!(root.state(), ProcessState::Stop);
        assert_eq!(table.iter().count(), 1);
    }

    #[test]
    fn init_links_child_and_builds_identity() {
        let table = ProcessTable::new(4);
        let a = table.claim().unwrap();
        table.init(a, Some(ProcessId::ROOT), 2, PageRef::new(10));
        let b = table.claim().unwrap();
        table.init(b, Some(a), 7, PageRef::new(11));

        assert_eq!(table.get(a).identity(), "[2]");
        assert_eq!(table.get(b).identity(), "[2][7]");
        assert_eq!(table.get(ProcessId::ROOT).child(2), Some(a));
        assert_eq!(table.get(a).child(7), Some(b));
        assert_eq!(table.get(b).parent(), Some(a));
        assert_eq!(table.get(ProcessId::ROOT).child(3), None);
    }

    #[test]
    fn orphan_identity_is_bare_index() {
        let table = ProcessTable::new(2);
        let a = table.claim().unwrap();
        table.init(a, None, 5, PageRef::new(1));
        assert_eq!(table.get(a).identity(), "[5]");
    }

    #[test]
    fn claim_exhausts_and_release_frees() {
        let table = ProcessTable::new(2);
        let a = table.claim().unwrap();
        assert_eq!(table.claim(), None);
        table.release(a);
        assert_eq!(table.claim(), Some(a));
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn unallocated_lookup_panics() {
        let table = ProcessTable::new(2);
        table.get(ProcessId(1));
    }
}
