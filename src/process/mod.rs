// Process Management Module for EMOS
pub mod audit;
pub mod context;
pub mod pcb;
pub mod scheduler;
pub mod transitions;

pub use audit::InvariantViolation;
pub use context::{save, FxSave, GeneralRegisters, SaveMode, SavedContext, TrapFrame};
pub use pcb::{ProcessError, ProcessId, ProcessState};
pub use scheduler::ReadyQueue;
