//! # Thread Context
//!
//! The saved state of a thread that is not on the CPU. Only the callee-saved
//! registers, the stack pointer and the resume address are kept: a switch is
//! always a function call from the dispatcher, so the caller-saved registers
//! are already spilled by the compiler.
//!
//! A brand-new thread has never been switched away from, so its context is
//! fabricated by [`InitialFrame`]: it "resumes" at the architecture's thread
//! trampoline with the entry function and its argument parked in r12/r13.

use crate::stack::Stack;
use crate::thread::ThreadFunc;

/// Callee-saved register file of a suspended thread.
///
/// The field offsets are part of the contract with the assembly switch
/// routine and must not be reordered.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadContext {
    pub r15: u64, // 0x00
    pub r14: u64, // 0x08
    pub r13: u64, // 0x10
    pub r12: u64, // 0x18
    pub rbp: u64, // 0x20
    pub rbx: u64, // 0x28
    pub rsp: u64, // 0x30
    pub rip: u64, // 0x38
}

impl ThreadContext {
    /// Create an empty context (all zeros)
    pub const fn empty() -> Self {
        ThreadContext {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbp: 0,
            rbx: 0,
            rsp: 0,
            rip: 0,
        }
    }
}

/// First frame of a new kernel thread.
pub struct InitialFrame {
    entry: ThreadFunc,
    aux: usize,
}

impl InitialFrame {
    pub fn new(entry: ThreadFunc, aux: usize) -> Self {
        Self { entry, aux }
    }

    /// Lay the frame out on `stack` and return the context that starts it.
    ///
    /// The stack pointer ends 16-byte aligned with two zero words above it: a
    /// null return address for backtraces and the padding that keeps the
    /// trampoline's `call` ABI-aligned.
    pub fn build(self, stack: &mut Stack, trampoline: usize) -> ThreadContext {
        let top = stack.top() & !15;
        let sp = stack.push(top, 0);
        let sp = stack.push(sp, 0);

        ThreadContext {
            r12: self.entry as usize as u64,
            r13: self.aux as u64,
            rsp: sp,
            rip: trampoline as u64,
            ..ThreadContext::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    fn entry(_aux: usize) {}

    #[test]
    fn test_context_layout() {
        assert_eq!(size_of::<ThreadContext>(), 0x40);
        assert_eq!(offset_of!(ThreadContext, r15), 0x00);
        assert_eq!(offset_of!(ThreadContext, rbx), 0x28);
        assert_eq!(offset_of!(ThreadContext, rsp), 0x30);
        assert_eq!(offset_of!(ThreadContext, rip), 0x38);
    }

    #[test]
    fn test_initial_frame() {
        let mut stack = Stack::new().expect("Failed to allocate stack");
        let ctx = InitialFrame::new(entry, 0xabc).build(&mut stack, 0x4000);

        assert_eq!(ctx.rip, 0x4000);
        assert_eq!(ctx.r12, entry as usize as u64);
        assert_eq!(ctx.r13, 0xabc);
        assert_eq!(ctx.rsp % 16, 0);
        assert_eq!(ctx.rsp, (stack.top() & !15) - 16);
        assert!(stack.contains(ctx.rsp));

        let words = unsafe { core::slice::from_raw_parts(ctx.rsp as *const u64, 2) };
        assert_eq!(words, &[0, 0]);
        assert!(stack.guard_intact());
    }
}
