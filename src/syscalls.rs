// Control-protocol system calls: PUT, GET, RET and CPUTS
use core::mem::size_of;

use bitflags::bitflags;
use log::{debug, warn};

use crate::config::MAX_CHILDREN;
use crate::cpu::Cpu;
use crate::kernel::{Dispatch, Kernel, Platform};
use crate::mem::UserFault;
use crate::process::context::{SaveMode, SavedContext, TrapFrame, T_GPFLT};
use crate::process::pcb::ProcessState;

/// Mask selecting the call type in `rax`.
pub const SYS_TYPE: u64 = 0xf;

/// System call numbers
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNumber {
    Cputs = 0,
    Put = 1,
    Get = 2,
    Ret = 3,
}

impl SyscallNumber {
    pub fn from_command(cmd: u64) -> Option<Self> {
        match cmd & SYS_TYPE {
            0 => Some(SyscallNumber::Cputs),
            1 => Some(SyscallNumber::Put),
            2 => Some(SyscallNumber::Get),
            3 => Some(SyscallNumber::Ret),
            _ => None,
        }
    }
}

bitflags! {
    /// Option bits carried next to the call type in `rax`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyscallFlags: u64 {
        /// PUT: make the child runnable.
        const START = 0x10;
        /// PUT/GET: transfer the register block at `rbx`.
        const REGS = 0x1000;
    }
}

/// Builds the `rax` value for a call.
pub fn command(num: SyscallNumber, flags: SyscallFlags) -> u64 {
    num as u64 | flags.bits()
}

impl<P: Platform> Kernel<P> {
    /// Handles a syscall trap from the current process.
    ///
    /// Returns `None` for commands this layer does not know; the trap layer
    /// then treats the trap like any other unhandled one.
    pub fn syscall(&self, cpu: &mut Cpu, tf: &TrapFrame) -> Option<Dispatch> {
        let cmd = tf.regs.rax;
        let num = SyscallNumber::from_command(cmd)?;
        let flags = SyscallFlags::from_bits_truncate(cmd);
        Some(match num {
            SyscallNumber::Cputs => self.do_cputs(cpu, tf),
            SyscallNumber::Put => self.do_put(cpu, tf, flags),
            SyscallNumber::Get => self.do_get(cpu, tf, flags),
            SyscallNumber::Ret => self.ret(cpu, tf, SaveMode::SyscallComplete).into(),
        })
    }

    /// Validates a user block before handing it to the platform.
    fn check_user(&self, uva: u64, size: usize) -> Result<(), UserFault> {
        if self.config.is_user_range(uva, size) {
            Ok(())
        } else {
            Err(UserFault { trapno: T_GPFLT, err: 0 })
        }
    }

    fn copy_in_context(&self, uva: u64) -> Result<SavedContext, UserFault> {
        self.check_user(uva, size_of::<SavedContext>())?;
        self.platform.read_context(uva)
    }

    fn copy_out_context(&self, uva: u64, ctx: &SavedContext) -> Result<(), UserFault> {
        self.check_user(uva, size_of::<SavedContext>())?;
        self.platform.write_context(uva, ctx)
    }

    fn reflect(&self, cpu: &mut Cpu, tf: &TrapFrame, fault: UserFault) -> Dispatch {
        debug!(
            "{}: reflecting {} to parent",
            self.identity(self.current(cpu)),
            fault
        );
        self.systrap(cpu, tf, fault.trapno, fault.err).into()
    }

    fn do_cputs(&self, cpu: &mut Cpu, tf: &TrapFrame) -> Dispatch {
        let uva = tf.regs.rbx;
        // The string may end anywhere; never read past the user window.
        let text = self.check_user(uva, 1).and_then(|()| {
            let left = (self.config.user_hi - uva) as usize;
            self.platform.read_str(uva, self.config.console_max.min(left))
        });
        match text {
            Ok(text) => {
                self.platform.write_str(&text);
                Dispatch::Resume(*tf)
            }
            Err(fault) => self.reflect(cpu, tf, fault),
        }
    }

    fn do_put(&self, cpu: &mut Cpu, tf: &TrapFrame, flags: SyscallFlags) -> Dispatch {
        let parent = self.current(cpu);
        let cn = tf.regs.rdx as usize;
        if cn >= MAX_CHILDREN {
            return self.reflect(cpu, tf, UserFault { trapno: T_GPFLT, err: 0 });
        }
        let child = match self.child(parent, cn) {
            Some(child) => child,
            None => match self.alloc(Some(parent), cn) {
                Ok(child) => child,
                Err(e) => {
                    warn!("{}: PUT child {}: {}", self.identity(parent), cn, e);
                    return self.reflect(cpu, tf, UserFault { trapno: T_GPFLT, err: 0 });
                }
            },
        };

        if self.state(child) != ProcessState::Stop {
            return self.wait(cpu, child, tf).into();
        }

        if flags.contains(SyscallFlags::REGS) {
            let ctx = match self.copy_in_context(tf.regs.rbx) {
                Ok(ctx) => ctx,
                Err(fault) => return self.reflect(cpu, tf, fault),
            };
            self.pcb(child).lock().saved.install_user(&ctx);
        }
        if flags.contains(SyscallFlags::START) {
            self.ready(child);
        }
        debug!("{}: PUT {} {:?}", self.identity(parent), self.identity(child), flags);
        Dispatch::Resume(*tf)
    }

    fn do_get(&self, cpu: &mut Cpu, tf: &TrapFrame, flags: SyscallFlags) -> Dispatch {
        let parent = self.current(cpu);
        let cn = tf.regs.rdx as usize;
        let Some(child) = (cn < MAX_CHILDREN).then(|| self.child(parent, cn)).flatten() else {
            return self.reflect(cpu, tf, UserFault { trapno: T_GPFLT, err: 0 });
        };

        if self.state(child) != ProcessState::Stop {
            return self.wait(cpu, child, tf).into();
        }

        if flags.contains(SyscallFlags::REGS) {
            let ctx = self.saved_context(child);
            if let Err(fault) = self.copy_out_context(tf.regs.rbx, &ctx) {
                return self.reflect(cpu, tf, fault);
            }
        }
        debug!("{}: GET {} {:?}", self.identity(parent), self.identity(child), flags);
        Dispatch::Resume(*tf)
    }
}
