//! # x86-64 Context Switching
//!
//! The raw switch lives in assembly. It is entered by an ordinary call from
//! the dispatcher, so only the callee-saved registers and the stack pointer
//! need preserving; the resume address of a suspended thread is the `ret`
//! that returns it into the dispatcher.
//!
//! Register layout must match [`ThreadContext`]:
//! r15 0x00, r14 0x08, r13 0x10, r12 0x18, rbp 0x20, rbx 0x28, rsp 0x30, rip 0x38.

use ::x86_64::instructions::interrupts;

use super::Cpu;
use crate::context::ThreadContext;
use crate::thread::ThreadId;

core::arch::global_asm!(
    ".global loom_switch_threads",
    "loom_switch_threads:",
    // rdi = from, rsi = to
    "mov [rdi + 0x00], r15",
    "mov [rdi + 0x08], r14",
    "mov [rdi + 0x10], r13",
    "mov [rdi + 0x18], r12",
    "mov [rdi + 0x20], rbp",
    "mov [rdi + 0x28], rbx",
    "mov [rdi + 0x30], rsp",
    "lea rax, [rip + 2f]",
    "mov [rdi + 0x38], rax",
    "mov r15, [rsi + 0x00]",
    "mov r14, [rsi + 0x08]",
    "mov r13, [rsi + 0x10]",
    "mov r12, [rsi + 0x18]",
    "mov rbp, [rsi + 0x20]",
    "mov rbx, [rsi + 0x28]",
    "mov rsp, [rsi + 0x30]",
    "jmp qword ptr [rsi + 0x38]",
    "2:",
    "ret",
    "",
    // First instruction of every new thread. InitialFrame parked the entry
    // function in r12 and its argument in r13.
    ".global loom_thread_entry",
    "loom_thread_entry:",
    "mov rdi, r12",
    "mov rsi, r13",
    "call loom_kernel_thread",
    "ud2",
);

extern "C" {
    fn loom_switch_threads(from: *mut ThreadContext, to: *const ThreadContext);
    fn loom_thread_entry();
}

/// The bootstrap processor, driven through real instructions.
#[derive(Debug, Default, Clone, Copy)]
pub struct X86_64Cpu;

impl X86_64Cpu {
    pub const fn new() -> Self {
        X86_64Cpu
    }
}

impl Cpu for X86_64Cpu {
    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }

    fn disable_interrupts(&mut self) {
        interrupts::disable();
    }

    fn enable_interrupts(&mut self) {
        interrupts::enable();
    }

    fn thread_entry(&self) -> usize {
        loom_thread_entry as usize
    }

    unsafe fn switch_threads(
        &mut self,
        _prev: ThreadId,
        from: *mut ThreadContext,
        _next: ThreadId,
        to: *const ThreadContext,
    ) {
        loom_switch_threads(from, to);
    }

    fn wait_for_interrupt() {
        // sti takes effect after the next instruction, so no tick can slip
        // in between unmasking and halting.
        interrupts::enable_and_hlt();
    }
}
