//! EMOS process management: process records, the shared ready queue, and
//! the PUT/GET/RET control protocol a parent uses to create, run, inspect
//! and reap its children on a multiprocessor.
//!
//! Everything is reached through a [`Kernel`] handle shared by all CPUs.
//! Each CPU owns a [`Cpu`] descriptor and, after every trap, hands the
//! [`Dispatch`] it got back to [`Kernel::trap_exit`], which either returns
//! to user mode or enters the scheduler.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod cpu;
pub mod kernel;
pub mod mem;
pub mod process;
pub mod syscalls;

#[cfg(test)]
mod sim;

pub use config::KernelConfig;
pub use console::{Console, ConsoleBuffer};
pub use cpu::{Cpu, CpuId, Machine};
pub use kernel::{Dispatch, Kernel, Platform, Resched};
pub use mem::{PageAllocator, PageRef, UserFault, UserMemory};
pub use process::{
    InvariantViolation, ProcessError, ProcessId, ProcessState, SaveMode, SavedContext, TrapFrame,
};
pub use syscalls::{command, SyscallFlags, SyscallNumber};
