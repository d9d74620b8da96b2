// Register context save/restore for EMOS processes
use core::fmt;

use x86_64::registers::rflags::RFlags;
use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

use crate::config::{SYSCALL_INSN_LEN, USER_CODE_INDEX, USER_DATA_INDEX};

/// Interrupt vector of the syscall instruction.
pub const T_SYSCALL: u64 = 0x30;
/// General protection fault.
pub const T_GPFLT: u64 = 13;
/// Page fault.
pub const T_PGFLT: u64 = 14;

/// RFLAGS bits user code is allowed to set through a register install.
pub const FL_USER: RFlags = RFlags::CARRY_FLAG
    .union(RFlags::PARITY_FLAG)
    .union(RFlags::AUXILIARY_CARRY_FLAG)
    .union(RFlags::ZERO_FLAG)
    .union(RFlags::SIGN_FLAG)
    .union(RFlags::DIRECTION_FLAG)
    .union(RFlags::OVERFLOW_FLAG);

/// General purpose registers, in the order trap entry pushes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct GeneralRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// Register snapshot captured by trap entry and consumed by trap exit.
///
/// The core copies it around verbatim; the only field it ever edits on its
/// own is `rip`, when a syscall is rewound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
    pub regs: GeneralRegisters,
    pub ds: u64,
    pub es: u64,
    pub trapno: u64,
    pub err: u64,
    pub rip: u64, // Instruction pointer
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// Fresh user-mode frame: user selectors, interrupts enabled.
    pub fn user() -> Self {
        let code = u64::from(SegmentSelector::new(USER_CODE_INDEX, PrivilegeLevel::Ring3).0);
        let data = u64::from(SegmentSelector::new(USER_DATA_INDEX, PrivilegeLevel::Ring3).0);
        Self {
            ds: data,
            es: data,
            cs: code,
            ss: data,
            rflags: RFlags::INTERRUPT_FLAG.bits(),
            ..Self::default()
        }
    }
}

/// FXSAVE area: x87/SSE state, opaque to the scheduler.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct FxSave(pub [u8; 512]);

impl Default for FxSave {
    fn default() -> Self {
        FxSave([0; 512])
    }
}

impl fmt::Debug for FxSave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.0.iter().filter(|b| **b != 0).count();
        write!(f, "FxSave({} non-zero bytes)", used)
    }
}

/// Everything needed to resume a process, and the register block PUT and
/// GET move between a parent and its child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SavedContext {
    pub tf: TrapFrame,
    pub fx: FxSave,
}

impl SavedContext {
    /// Context of a process that has never run.
    pub fn user() -> Self {
        Self {
            tf: TrapFrame::user(),
            fx: FxSave::default(),
        }
    }

    /// Installs the parts of `from` a parent may set on its child.
    ///
    /// General registers, instruction and stack pointer and the FPU area are
    /// taken as given; of `rflags` only the [`FL_USER`] bits are. Segment
    /// selectors and trap metadata stay as the kernel set them.
    pub fn install_user(&mut self, from: &SavedContext) {
        self.tf.regs = from.tf.regs;
        self.tf.rip = from.tf.rip;
        self.tf.rsp = from.tf.rsp;
        let user = FL_USER.bits();
        self.tf.rflags = (self.tf.rflags & !user) | (from.tf.rflags & user);
        self.fx = from.fx;
    }
}

/// How the kernel was entered, which decides how a frame is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Entered via a trap before an instruction executed.
    TrapEntry,
    /// Entered via a syscall that must be re-executed later.
    SyscallAbort,
    /// Entered via a syscall that is finished.
    SyscallComplete,
}

/// Copies the state captured at kernel entry into `ctx` according to `mode`.
///
/// Callers pass the context out of a locked process record, so holding the
/// record lock is enforced by the borrow.
pub fn save(ctx: &mut SavedContext, tf: &TrapFrame, fx: &FxSave, mode: SaveMode) {
    ctx.tf = *tf;
    ctx.fx = *fx;
    if mode == SaveMode::SyscallAbort {
        ctx.tf.rip = tf.rip.wrapping_sub(SYSCALL_INSN_LEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(rip: u64, rax: u64) -> TrapFrame {
        let mut tf = TrapFrame::user();
        tf.rip = rip;
        tf.regs.rax = rax;
        tf.trapno = T_SYSCALL;
        tf
    }

    #[test]
    fn user_frame_has_ring3_selectors() {
        let tf = TrapFrame::user();
        assert_eq!(tf.cs, 0x1b);
        assert_eq!(tf.ss, 0x23);
        assert_eq!(tf.ds, 0x23);
        assert_eq!(tf.es, 0x23);
        assert_eq!(tf.rflags, 0x200);
    }

    #[test]
    fn install_masks_flags_and_keeps_selectors() {
        let mut child = SavedContext::user();
        let mut from = SavedContext::default();
        from.tf.regs.rbx = 7;
        from.tf.rip = 0x4000_1000;
        from.tf.rsp = 0x4000_8000;
        from.tf.cs = 0x08;
        from.tf.rflags = RFlags::IOPL_HIGH.bits()
            | RFlags::CARRY_FLAG.bits()
            | RFlags::ZERO_FLAG.bits();
        from.fx.0[0] = 0x7f;

        child.install_user(&from);

        assert_eq!(child.tf.regs.rbx, 7);
        assert_eq!(child.tf.rip, 0x4000_1000);
        assert_eq!(child.tf.rsp, 0x4000_8000);
        assert_eq!(child.tf.cs, 0x1b);
        assert_eq!(
            child.tf.rflags,
            (RFlags::INTERRUPT_FLAG | RFlags::CARRY_FLAG | RFlags::ZERO_FLAG).bits()
        );
        assert_eq!(child.fx.0[0], 0x7f);
    }

    #[test]
    fn trap_entry_copies_verbatim() {
        let mut ctx = SavedContext::user();
        let tf = frame(0x4000_0010, 3);
        let mut fx = FxSave::default();
        fx.0[24] = 0x80;
        save(&mut ctx, &tf, &fx, SaveMode::TrapEntry);
        assert_eq!(ctx.tf, tf);
        assert_eq!(ctx.fx, fx);
    }

    proptest! {
        #[test]
        fn complete_save_round_trips(rip in any::<u64>(), rax in any::<u64>(), rsp in any::<u64>(), mxcsr in any::<u32>()) {
            let mut tf = frame(rip, rax);
            tf.rsp = rsp;
            let mut fx = FxSave::default();
            fx.0[24..28].copy_from_slice(&mxcsr.to_le_bytes());
            let mut ctx = SavedContext::user();
            save(&mut ctx, &tf, &fx, SaveMode::SyscallComplete);
            prop_assert_eq!(ctx.tf, tf);
            prop_assert_eq!(ctx.fx, fx);
        }

        #[test]
        fn abort_rewinds_by_instruction_width(rip in SYSCALL_INSN_LEN..u64::MAX, rax in any::<u64>()) {
            let tf = frame(rip, rax);
            let mut ctx = SavedContext::user();
            save(&mut ctx, &tf, &FxSave::default(), SaveMode::SyscallAbort);
            prop_assert_eq!(ctx.tf.rip, rip - SYSCALL_INSN_LEN);
            prop_assert_eq!(ctx.tf.regs, tf.regs);
            prop_assert_eq!(TrapFrame { rip, ..ctx.tf }, tf);
        }
    }
}
