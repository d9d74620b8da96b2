// Ready-queue scheduler for EMOS
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use log::{debug, trace};
use spin::{Mutex, MutexGuard};

use crate::cpu::{Cpu, Machine};
use crate::kernel::{Kernel, Platform};
use crate::process::context::TrapFrame;
use crate::process::pcb::{ProcessId, ProcessState};

/// FIFO of runnable processes shared by all CPUs.
pub struct ReadyQueue {
    queue: Mutex<VecDeque<ProcessId>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, pid: ProcessId) {
        self.queue.lock().push_back(pid);
    }

    pub fn lock(&self) -> MutexGuard<'_, VecDeque<ProcessId>> {
        self.queue.lock()
    }

    pub fn snapshot(&self) -> Vec<ProcessId> {
        self.queue.lock().iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> Kernel<P> {
    /// Marks `pid` runnable and queues it at the tail.
    pub fn ready(&self, pid: ProcessId) {
        let pcb = self.pcb(pid);
        {
            let mut inner = pcb.lock();
            assert_ne!(
                inner.state,
                ProcessState::Ready,
                "{}: readied twice",
                pcb.identity()
            );
            inner.state = ProcessState::Ready;
            inner.run_cpu = None;
            inner.waiting_on = None;
        }
        self.ready.push(pid);
        trace!("ready {}", pcb.identity());
    }

    /// Takes the head of the ready queue and makes it this CPU's process.
    ///
    /// Returns the frame to resume, or `None` if nothing is runnable. The
    /// saved FPU state is loaded into `cpu`. The queue lock is held until the
    /// process is installed and dropped just before returning.
    pub fn dispatch_next(&self, cpu: &mut Cpu) -> Option<TrapFrame> {
        assert!(
            cpu.current().is_none(),
            "{} scheduling while it still runs {:?}",
            cpu.id(),
            cpu.current()
        );
        let mut queue = self.ready.lock();
        let pid = queue.pop_front()?;
        let pcb = self.pcb(pid);
        let saved = {
            let mut inner = pcb.lock();
            assert_eq!(
                inner.state,
                ProcessState::Ready,
                "{}: dequeued in wrong state",
                pcb.identity()
            );
            inner.state = ProcessState::Run;
            inner.run_cpu = Some(cpu.id());
            inner.saved
        };
        *cpu.fx_mut() = saved.fx;
        cpu.set_current(Some(pid));
        let tf = saved.tf;
        drop(queue);
        debug!("{} runs {} at {:#x}", cpu.id(), pcb.identity(), tf.rip);
        Some(tf)
    }

    /// Scheduler loop each CPU runs once it has no process of its own.
    pub fn scheduler<M: Machine>(&self, cpu: &mut Cpu, machine: &M) -> ! {
        loop {
            match self.dispatch_next(cpu) {
                Some(tf) => machine.trap_return(&tf, cpu.fx()),
                None => machine.pause(),
            }
        }
    }
}
