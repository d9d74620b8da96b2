// Simulated platform for driving the kernel from host tests
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::console::{Console, ConsoleBuffer};
use crate::cpu::Machine;
use crate::mem::{PageAllocator, PageRef, UserFault, UserMemory};
use crate::process::context::{FxSave, SavedContext, TrapFrame, T_PGFLT};

/// Page-fault error code for a user-mode access to a missing page.
const PF_USER: u64 = 0x4;

/// Allocator with a fixed page budget, a flat user memory of typed blocks,
/// and a buffered console.
pub struct SimPlatform {
    free_pages: AtomicUsize,
    next_frame: AtomicUsize,
    refcounts: Mutex<BTreeMap<usize, u32>>,
    contexts: Mutex<BTreeMap<u64, SavedContext>>,
    strings: Mutex<BTreeMap<u64, String>>,
    console: ConsoleBuffer,
}

impl SimPlatform {
    pub fn with_pages(pages: usize) -> Self {
        Self {
            free_pages: AtomicUsize::new(pages),
            next_frame: AtomicUsize::new(0),
            refcounts: Mutex::new(BTreeMap::new()),
            contexts: Mutex::new(BTreeMap::new()),
            strings: Mutex::new(BTreeMap::new()),
            console: ConsoleBuffer::new(),
        }
    }

    pub fn add_pages(&self, pages: usize) {
        self.free_pages.fetch_add(pages, Ordering::SeqCst);
    }

    pub fn refcount(&self, frame: usize) -> u32 {
        self.refcounts.lock().unwrap().get(&frame).copied().unwrap_or(0)
    }

    pub fn store_context(&self, uva: u64, ctx: SavedContext) {
        self.contexts.lock().unwrap().insert(uva, ctx);
    }

    pub fn load_context(&self, uva: u64) -> Option<SavedContext> {
        self.contexts.lock().unwrap().get(&uva).copied()
    }

    pub fn store_str(&self, uva: u64, s: &str) {
        self.strings.lock().unwrap().insert(uva, s.to_string());
    }

    pub fn console(&self) -> &ConsoleBuffer {
        &self.console
    }
}

impl PageAllocator for SimPlatform {
    fn alloc_page(&self) -> Option<PageRef> {
        self.free_pages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()?;
        let frame = self.next_frame.fetch_add(1, Ordering::SeqCst);
        self.refcounts.lock().unwrap().insert(frame, 0);
        Some(PageRef::new(frame))
    }

    fn incref(&self, page: &PageRef) {
        *self.refcounts.lock().unwrap().entry(page.frame()).or_insert(0) += 1;
    }
}

impl UserMemory for SimPlatform {
    fn read_context(&self, uva: u64) -> Result<SavedContext, UserFault> {
        self.load_context(uva).ok_or(UserFault { trapno: T_PGFLT, err: PF_USER })
    }

    fn write_context(&self, uva: u64, ctx: &SavedContext) -> Result<(), UserFault> {
        self.store_context(uva, *ctx);
        Ok(())
    }

    fn read_str(&self, uva: u64, max_len: usize) -> Result<String, UserFault> {
        let strings = self.strings.lock().unwrap();
        let s = strings.get(&uva).ok_or(UserFault { trapno: T_PGFLT, err: PF_USER })?;
        let mut end = s.len().min(max_len);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        Ok(s[..end].to_string())
    }
}

impl Console for SimPlatform {
    fn write_str(&self, s: &str) {
        self.console.write_str(s);
    }
}

/// Panic payload carrying the state a CPU returned to user mode with.
#[derive(Debug)]
pub struct Resumed(pub SavedContext);

/// Machine whose trap return unwinds back to the test with the frame, and
/// whose idle loop gives up after a set number of pauses.
pub struct SimMachine {
    pauses: AtomicUsize,
    idle_limit: AtomicUsize,
}

impl SimMachine {
    pub fn new() -> Self {
        Self {
            pauses: AtomicUsize::new(0),
            idle_limit: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn idle_limit(&self, pauses: usize) {
        self.idle_limit.store(pauses, Ordering::SeqCst);
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumed_context(payload: Box<dyn Any + Send>) -> SavedContext {
        match payload.downcast::<Resumed>() {
            Ok(resumed) => resumed.0,
            Err(_) => panic!("CPU did not return to user mode"),
        }
    }

    pub fn resumed_frame(payload: Box<dyn Any + Send>) -> TrapFrame {
        Self::resumed_context(payload).tf
    }
}

impl Machine for SimMachine {
    fn trap_return(&self, tf: &TrapFrame, fx: &FxSave) -> ! {
        std::panic::panic_any(Resumed(SavedContext { tf: *tf, fx: *fx }))
    }

    fn pause(&self) {
        let pauses = self.pauses.fetch_add(1, Ordering::SeqCst) + 1;
        if pauses >= self.idle_limit.load(Ordering::SeqCst) {
            panic!("idle after {} pauses", pauses);
        }
    }
}
