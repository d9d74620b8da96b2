// Console sink for the debug print syscall
use alloc::string::String;
use core::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_queue::ArrayQueue;

use crate::config::CONSOLE_BUFFER_LINES;

/// Where debug output from processes ends up.
pub trait Console: Send + Sync {
    fn write_str(&self, s: &str);
}

/// Bounded line buffer drained by whatever owns the real console device.
///
/// Writers never block: when the buffer is full the line is dropped and
/// counted.
pub struct ConsoleBuffer {
    lines: ArrayQueue<String>,
    dropped: AtomicUsize,
}

impl ConsoleBuffer {
    pub fn new() -> Self {
        Self::with_capacity(CONSOLE_BUFFER_LINES)
    }

    pub fn with_capacity(lines: usize) -> Self {
        Self {
            lines: ArrayQueue::new(lines),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Takes the oldest buffered line.
    pub fn pop(&self) -> Option<String> {
        self.lines.pop()
    }

    /// Lines lost to a full buffer so far.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for ConsoleBuffer {
    fn write_str(&self, s: &str) {
        if self.lines.push(String::from(s)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_come_out_in_order() {
        let console = ConsoleBuffer::new();
        console.write_str("in child 0 count 0\n");
        console.write_str("in child 1 count 0\n");
        assert_eq!(console.pop().as_deref(), Some("in child 0 count 0\n"));
        assert_eq!(console.pop().as_deref(), Some("in child 1 count 0\n"));
        assert_eq!(console.pop(), None);
    }

    #[test]
    fn overflow_drops_newest() {
        let console = ConsoleBuffer::with_capacity(2);
        console.write_str("a");
        console.write_str("b");
        console.write_str("c");
        assert_eq!(console.dropped(), 1);
        assert_eq!(console.pop().as_deref(), Some("a"));
        assert_eq!(console.pop().as_deref(), Some("b"));
    }
}
