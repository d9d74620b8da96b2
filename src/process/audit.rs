// Whole-system consistency checks over the process table and ready queue
use alloc::collections::BTreeMap;
use core::fmt;

use crate::cpu::CpuId;
use crate::kernel::{Kernel, Platform};
use crate::process::pcb::{ProcessId, ProcessState};

/// First inconsistency found by [`Kernel::audit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// `Ready` record queued `queued` times, or a non-`Ready` one queued.
    QueueMembership { pid: ProcessId, state: ProcessState, queued: usize },
    /// Queue holds an id that is not an allocated record.
    UnknownQueued(ProcessId),
    /// `run_cpu` set without `Run`, or `Run` without `run_cpu`.
    RunOwner { pid: ProcessId, state: ProcessState, cpu: Option<CpuId> },
    /// Two records claim the same CPU.
    SharedCpu { cpu: CpuId, first: ProcessId, second: ProcessId },
    /// `waiting_on` set without `Wait`, or `Wait` without `waiting_on`.
    WaitTarget { pid: ProcessId, state: ProcessState, waiting_on: Option<ProcessId> },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InvariantViolation::QueueMembership { pid, state, queued } => {
                write!(f, "{} is {:?} but queued {} times", pid, state, queued)
            }
            InvariantViolation::UnknownQueued(pid) => {
                write!(f, "ready queue holds unallocated {}", pid)
            }
            InvariantViolation::RunOwner { pid, state, cpu } => {
                write!(f, "{} is {:?} with run cpu {:?}", pid, state, cpu)
            }
            InvariantViolation::SharedCpu { cpu, first, second } => {
                write!(f, "{} claimed by both {} and {}", cpu, first, second)
            }
            InvariantViolation::WaitTarget { pid, state, waiting_on } => {
                write!(f, "{} is {:?} waiting on {:?}", pid, state, waiting_on)
            }
        }
    }
}

impl<P: Platform> Kernel<P> {
    /// Checks the process-table invariants against the ready queue.
    ///
    /// Takes the queue lock, then each record lock in turn, the same order
    /// the scheduler uses. Only meaningful at a quiescent point: a `ready`
    /// in flight on another CPU is briefly `Ready` without being queued.
    pub fn audit(&self) -> Result<(), InvariantViolation> {
        let queue = self.ready.lock();
        let mut queued: BTreeMap<ProcessId, usize> = BTreeMap::new();
        for &pid in queue.iter() {
            if self.table.iter().all(|(p, _)| p != pid) {
                return Err(InvariantViolation::UnknownQueued(pid));
            }
            *queued.entry(pid).or_insert(0) += 1;
        }

        let mut owners: BTreeMap<CpuId, ProcessId> = BTreeMap::new();
        for (pid, pcb) in self.table.iter() {
            let inner = pcb.lock();
            let state = inner.state;
            let count = queued.get(&pid).copied().unwrap_or(0);
            let expected = usize::from(state == ProcessState::Ready);
            if count != expected {
                return Err(InvariantViolation::QueueMembership { pid, state, queued: count });
            }
            if (state == ProcessState::Run) != inner.run_cpu.is_some() {
                return Err(InvariantViolation::RunOwner { pid, state, cpu: inner.run_cpu });
            }
            if let Some(cpu) = inner.run_cpu {
                if let Some(&first) = owners.get(&cpu) {
                    return Err(InvariantViolation::SharedCpu { cpu, first, second: pid });
                }
                owners.insert(cpu, pid);
            }
            if (state == ProcessState::Wait) != inner.waiting_on.is_some() {
                return Err(InvariantViolation::WaitTarget {
                    pid,
                    state,
                    waiting_on: inner.waiting_on,
                });
            }
        }
        Ok(())
    }
}
