// System context handle shared by every CPU
use log::{debug, trace, warn};

use crate::config::{KernelConfig, MAX_CHILDREN};
use crate::console::Console;
use crate::cpu::{Cpu, Machine};
use crate::mem::{PageAllocator, PageRef, UserMemory};
use crate::process::context::{SavedContext, TrapFrame};
use crate::process::pcb::{ProcessControlBlock, ProcessError, ProcessId, ProcessState, ProcessTable};
use crate::process::scheduler::ReadyQueue;

/// Everything the core needs from the rest of the kernel.
pub trait Platform: PageAllocator + UserMemory + Console {}

impl<T: PageAllocator + UserMemory + Console> Platform for T {}

/// What a CPU does when the kernel is done with a trap.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Return to the current process with this frame.
    Resume(TrapFrame),
    /// The CPU gave up its process; enter the scheduler.
    Reschedule,
}

/// Proof that the current CPU no longer owns a process.
///
/// Returned by the transitions that never resume their caller; the only
/// thing to do with it is hand it to [`Kernel::trap_exit`].
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct Resched(());

impl Resched {
    pub(crate) fn new() -> Self {
        Resched(())
    }
}

impl From<Resched> for Dispatch {
    fn from(_: Resched) -> Self {
        Dispatch::Reschedule
    }
}

/// Process table, ready queue and platform hooks for one machine.
pub struct Kernel<P: Platform> {
    pub(crate) config: KernelConfig,
    pub(crate) table: ProcessTable,
    pub(crate) ready: ReadyQueue,
    pub(crate) platform: P,
}

impl<P: Platform> Kernel<P> {
    pub fn new(config: KernelConfig, platform: P) -> Self {
        debug!("process table: {} slots", config.max_processes);
        Self {
            table: ProcessTable::new(config.max_processes),
            ready: ReadyQueue::new(),
            config,
            platform,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn root(&self) -> ProcessId {
        ProcessId::ROOT
    }

    /// Loads the root's initial context and makes it runnable.
    pub fn start_root(&self, ctx: &SavedContext) {
        {
            let mut root = self.pcb(ProcessId::ROOT).lock();
            assert_eq!(root.state, ProcessState::Stop, "root started twice");
            root.saved = *ctx;
        }
        self.ready(ProcessId::ROOT);
    }

    /// Allocates a stopped process as child `cn` of `parent`.
    ///
    /// The caller fills in its registers and readies it.
    pub fn alloc(&self, parent: Option<ProcessId>, cn: usize) -> Result<ProcessId, ProcessError> {
        if cn >= MAX_CHILDREN {
            return Err(ProcessError::InvalidChildIndex);
        }
        let pid = self.table.claim().ok_or(ProcessError::TableFull)?;
        let Some(page) = self.platform.alloc_page() else {
            self.table.release(pid);
            warn!("alloc child {} failed: {}", cn, ProcessError::OutOfMemory);
            return Err(ProcessError::OutOfMemory);
        };
        self.platform.incref(&page);
        self.table.init(pid, parent, cn, page);
        trace!("alloc {} as {}", self.identity(pid), pid);
        Ok(pid)
    }

    pub(crate) fn pcb(&self, pid: ProcessId) -> &ProcessControlBlock {
        self.table.get(pid)
    }

    pub fn identity(&self, pid: ProcessId) -> &str {
        self.pcb(pid).identity()
    }

    pub fn parent(&self, pid: ProcessId) -> Option<ProcessId> {
        self.pcb(pid).parent()
    }

    /// Page backing `pid`; the root has none.
    pub fn page(&self, pid: ProcessId) -> Option<PageRef> {
        self.pcb(pid).page()
    }

    pub fn child(&self, pid: ProcessId, cn: usize) -> Option<ProcessId> {
        self.pcb(pid).child(cn)
    }

    pub fn state(&self, pid: ProcessId) -> ProcessState {
        self.pcb(pid).state()
    }

    pub fn waiting_on(&self, pid: ProcessId) -> Option<ProcessId> {
        self.pcb(pid).lock().waiting_on
    }

    /// Copy of the saved context. Only meaningful while `pid` is not running.
    pub fn saved_context(&self, pid: ProcessId) -> SavedContext {
        self.pcb(pid).lock().saved
    }

    /// Ids queued for the CPU, head first.
    pub fn ready_snapshot(&self) -> alloc::vec::Vec<ProcessId> {
        self.ready.snapshot()
    }

    /// Leaves the kernel: back to user mode, or into the scheduler.
    pub fn trap_exit<M: Machine>(&self, cpu: &mut Cpu, machine: &M, dispatch: Dispatch) -> ! {
        match dispatch {
            Dispatch::Resume(tf) => machine.trap_return(&tf, cpu.fx()),
            Dispatch::Reschedule => self.scheduler(cpu, machine),
        }
    }
}
