//! # Stack Allocation
//!
//! Each kernel thread owns a stack allocated from the kernel heap. The lowest
//! word of every stack holds [`THREAD_MAGIC`]: the stack grows down toward it,
//! so an overflow tramples the guard before anything else and the next
//! registry lookup of that thread halts the kernel.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;

use crate::thread::THREAD_MAGIC;

/// Default stack size: 64 KB
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Minimum stack size: 4 KB (one page)
pub const MIN_STACK_SIZE: usize = 4 * 1024;

/// Maximum stack size: 1 MB
pub const MAX_STACK_SIZE: usize = 1024 * 1024;

/// Bytes at the bottom reserved for the guard word.
const GUARD_BYTES: u64 = 16;

/// A thread's stack allocation
pub struct Stack {
    bottom: NonNull<u8>,
    size: usize,
}

// Safety: the allocation is exclusively owned by the Stack and only touched
// through it or by the thread running on it.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl Stack {
    /// Allocate a new stack with the default size
    pub fn new() -> Option<Self> {
        Self::with_size(DEFAULT_STACK_SIZE)
    }

    /// Allocate a new stack with a specific size
    ///
    /// The size is clamped to MIN/MAX and rounded up to 16 bytes. Returns
    /// `None` when the heap is exhausted.
    pub fn with_size(size: usize) -> Option<Self> {
        let size = size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
        let size = (size + 15) & !15;

        let layout = Layout::from_size_align(size, 16).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };

        NonNull::new(ptr).map(|bottom| {
            // Safety: the allocation is at least MIN_STACK_SIZE bytes, 16-aligned.
            unsafe { (bottom.as_ptr() as *mut u32).write(THREAD_MAGIC) };
            Stack { bottom, size }
        })
    }

    /// Get the bottom (low address) of the stack
    pub fn bottom(&self) -> u64 {
        self.bottom.as_ptr() as u64
    }

    /// Get the top (high address) of the stack
    ///
    /// The stack grows downward, so this is bottom + size
    pub fn top(&self) -> u64 {
        self.bottom() + self.size as u64
    }

    /// Get the size of the stack in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Check if an address is within this stack
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.bottom() && addr < self.top()
    }

    /// True while the guard word at the bottom is untouched.
    pub fn guard_intact(&self) -> bool {
        // Safety: the guard lives inside our own allocation.
        unsafe { (self.bottom.as_ptr() as *const u32).read_volatile() == THREAD_MAGIC }
    }

    /// Push one word below `sp` and return the new stack pointer.
    ///
    /// # Panics
    /// If the word would land outside the stack or on the guard.
    pub(crate) fn push(&mut self, sp: u64, word: u64) -> u64 {
        let sp = sp - 8;
        assert!(
            sp >= self.bottom() + GUARD_BYTES && sp + 8 <= self.top(),
            "stack push at {:#x} outside [{:#x}, {:#x})",
            sp,
            self.bottom(),
            self.top()
        );
        // Safety: bounds checked above, and sp stays 8-aligned.
        unsafe { (sp as *mut u64).write(word) };
        sp
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // with_size already built this layout once, so it is valid.
        if let Ok(layout) = Layout::from_size_align(self.size, 16) {
            unsafe {
                dealloc(self.bottom.as_ptr(), layout);
            }
        }
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Stack({:#x}..{:#x})", self.bottom(), self.top())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_allocation() {
        let stack = Stack::new().expect("Failed to allocate stack");
        assert_eq!(stack.size(), DEFAULT_STACK_SIZE);
        assert_eq!(stack.top() - stack.bottom(), DEFAULT_STACK_SIZE as u64);
        assert_eq!(stack.bottom() % 16, 0);
    }

    #[test]
    fn test_size_clamping() {
        let stack = Stack::with_size(100).expect("Failed to allocate");
        assert_eq!(stack.size(), MIN_STACK_SIZE);

        let stack = Stack::with_size(10 * 1024 * 1024).expect("Failed to allocate");
        assert_eq!(stack.size(), MAX_STACK_SIZE);

        let stack = Stack::with_size(8193).expect("Failed to allocate");
        assert_eq!(stack.size(), 8208);
    }

    #[test]
    fn test_contains() {
        let stack = Stack::new().expect("Failed to allocate");
        let bottom = stack.bottom();
        let top = stack.top();

        assert!(stack.contains(bottom));
        assert!(stack.contains(top - 1));
        assert!(!stack.contains(top));
        assert!(!stack.contains(bottom - 1));
    }

    #[test]
    fn test_guard_written_and_checked() {
        let stack = Stack::new().expect("Failed to allocate");
        assert!(stack.guard_intact());

        unsafe { (stack.bottom() as *mut u32).write(0) };
        assert!(!stack.guard_intact());
    }

    #[test]
    fn test_push_writes_below_sp() {
        let mut stack = Stack::new().expect("Failed to allocate");
        let top = stack.top();
        let sp = stack.push(top, 0x1234);
        assert_eq!(sp, top - 8);
        assert_eq!(unsafe { (sp as *const u64).read() }, 0x1234);
    }

    #[test]
    #[should_panic(expected = "stack push")]
    fn test_push_refuses_to_touch_the_guard() {
        let mut stack = Stack::new().expect("Failed to allocate");
        let floor = stack.bottom() + GUARD_BYTES;
        stack.push(floor, 0);
    }
}
