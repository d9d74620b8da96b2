// Per-CPU descriptor and the trap-exit hooks the scheduler drives
use core::fmt;

use crate::process::context::{FxSave, TrapFrame};
use crate::process::pcb::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(pub usize);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Per-CPU descriptor.
///
/// Owned by the CPU's own run loop and handed to the kernel by `&mut`, so
/// it needs no lock.
#[derive(Debug)]
pub struct Cpu {
    id: CpuId,
    current: Option<ProcessId>,
    fx: FxSave,
}

impl Cpu {
    pub fn new(id: CpuId) -> Self {
        Self {
            id,
            current: None,
            fx: FxSave::default(),
        }
    }

    pub fn id(&self) -> CpuId {
        self.id
    }

    /// Process this CPU is running, if any.
    pub fn current(&self) -> Option<ProcessId> {
        self.current
    }

    pub fn set_current(&mut self, pid: Option<ProcessId>) {
        self.current = pid;
    }

    /// x87/SSE state of the process on this CPU.
    ///
    /// Trap entry stores the `fxsave` image here before calling into the
    /// kernel; trap exit loads it back with `fxrstor`.
    pub fn fx(&self) -> &FxSave {
        &self.fx
    }

    pub fn fx_mut(&mut self) -> &mut FxSave {
        &mut self.fx
    }
}

/// Hardware side of leaving the kernel.
pub trait Machine {
    /// Loads `fx` into the FPU, installs `tf` and returns to user mode.
    fn trap_return(&self, tf: &TrapFrame, fx: &FxSave) -> !;

    /// Waits for something to happen (e.g. `pause`/`hlt`) before the
    /// scheduler polls the ready queue again.
    fn pause(&self);
}
