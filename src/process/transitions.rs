// Process state transitions that give up the CPU
use log::{trace, warn};

use crate::cpu::Cpu;
use crate::kernel::{Kernel, Platform, Resched};
use crate::process::context::{save, SaveMode, TrapFrame};
use crate::process::pcb::{ProcessId, ProcessState};

impl<P: Platform> Kernel<P> {
    pub(crate) fn current(&self, cpu: &Cpu) -> ProcessId {
        match cpu.current() {
            Some(pid) => pid,
            None => panic!("{} has no current process", cpu.id()),
        }
    }

    /// Blocks the current process until `child` stops.
    ///
    /// The pending syscall is rewound, so the process re-issues it once it
    /// is woken.
    pub fn wait(&self, cpu: &mut Cpu, child: ProcessId, tf: &TrapFrame) -> Resched {
        let pid = self.current(cpu);
        let pcb = self.pcb(pid);
        {
            let mut inner = pcb.lock();
            assert_eq!(
                inner.state,
                ProcessState::Run,
                "{}: waits while not running",
                pcb.identity()
            );
            save(&mut inner.saved, tf, cpu.fx(), SaveMode::SyscallAbort);
            inner.state = ProcessState::Wait;
            inner.waiting_on = Some(child);
            inner.run_cpu = None;
        }
        cpu.set_current(None);
        trace!("{} waits on {}", pcb.identity(), self.identity(child));

        // The child may have stopped before we published Wait; it would
        // have seen us running and not woken us.
        if self.state(child) == ProcessState::Stop {
            self.wake(pid, child);
        }
        Resched::new()
    }

    /// Stops the current process and returns control to its parent.
    ///
    /// Used for the RET syscall and, with [`SaveMode::TrapEntry`], for
    /// traps the process could not handle itself.
    pub fn ret(&self, cpu: &mut Cpu, tf: &TrapFrame, mode: SaveMode) -> Resched {
        let pid = self.current(cpu);
        let pcb = self.pcb(pid);
        {
            let mut inner = pcb.lock();
            assert_ne!(
                inner.state,
                ProcessState::Stop,
                "{}: returns while stopped",
                pcb.identity()
            );
            save(&mut inner.saved, tf, cpu.fx(), mode);
            inner.state = ProcessState::Stop;
            inner.run_cpu = None;
        }
        cpu.set_current(None);
        trace!("{} stops ({:?})", pcb.identity(), mode);

        match pcb.parent() {
            Some(parent) => self.wake(parent, pid),
            None => warn!("root process stopped"),
        }
        Resched::new()
    }

    /// Preempts the current process and puts it back in the ready queue.
    pub fn yield_cpu(&self, cpu: &mut Cpu, tf: &TrapFrame) -> Resched {
        let pid = self.current(cpu);
        let pcb = self.pcb(pid);
        {
            let mut inner = pcb.lock();
            assert_eq!(
                inner.state,
                ProcessState::Run,
                "{}: yields while not running",
                pcb.identity()
            );
            save(&mut inner.saved, tf, cpu.fx(), SaveMode::SyscallComplete);
        }
        cpu.set_current(None);
        self.ready(pid);
        Resched::new()
    }

    /// Readies `pid` if it is waiting on exactly `child`.
    ///
    /// Both the waiter and the stopping child call this; only the first to
    /// find `pid` in `Wait` moves it, so it is queued once.
    pub(crate) fn wake(&self, pid: ProcessId, child: ProcessId) {
        let pcb = self.pcb(pid);
        {
            let mut inner = pcb.lock();
            if inner.state != ProcessState::Wait || inner.waiting_on != Some(child) {
                return;
            }
            inner.state = ProcessState::Ready;
            inner.waiting_on = None;
        }
        self.ready.push(pid);
        trace!("{} woken by {}", pcb.identity(), self.identity(child));
    }

    /// Reflects a trap raised on behalf of the current process's syscall.
    ///
    /// The frame is made to look as if the syscall instruction itself had
    /// trapped, and the process returns to its parent.
    pub fn systrap(&self, cpu: &mut Cpu, tf: &TrapFrame, trapno: u64, err: u64) -> Resched {
        let mut tf = *tf;
        tf.trapno = trapno;
        tf.err = err;
        self.ret(cpu, &tf, SaveMode::SyscallAbort)
    }
}
