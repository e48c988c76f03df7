//! # Architecture Boundary
//!
//! Everything the scheduler needs from the hardware, behind one trait:
//! interrupt masking, the raw register switch, and the hooks that run when a
//! thread is activated or a user process exits.
//!
//! The scheduler is generic over [`Cpu`]. On bare metal it runs on
//! `x86_64::X86_64Cpu`; everywhere else [`SimulatedCpu`] stands in, which is
//! how the whole scheduler is exercised by ordinary host tests.

mod simulated;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;

pub use simulated::SimulatedCpu;

use crate::context::ThreadContext;
use crate::thread::{Thread, ThreadId};

/// The hardware seam of the scheduler.
pub trait Cpu {
    fn interrupts_enabled(&self) -> bool;

    fn disable_interrupts(&mut self);

    fn enable_interrupts(&mut self);

    /// Address a brand-new thread resumes at. The trampoline finds the entry
    /// function in r12 and its argument in r13.
    fn thread_entry(&self) -> usize;

    /// Save the running registers into `from` and resume the thread whose
    /// registers are in `to`.
    ///
    /// Returns when some later switch resumes `prev`. Implementations that
    /// do not own a real register file (the simulation) return at once, and
    /// the caller carries on as `next`.
    ///
    /// # Safety
    /// Interrupts must be masked. `from` must be valid for writes and `to`
    /// must hold a context produced by a previous switch or by
    /// [`InitialFrame`](crate::context::InitialFrame), on a stack that is
    /// still allocated.
    unsafe fn switch_threads(
        &mut self,
        prev: ThreadId,
        from: *mut ThreadContext,
        next: ThreadId,
        to: *const ThreadContext,
    );

    /// Called when `thread` becomes the running thread, to reactivate any
    /// execution context it owns (address space, kernel stack pointer).
    fn activate(&mut self, _thread: &Thread) {}

    /// Called when a user thread exits, before it is marked dying.
    fn process_exit(&mut self, _thread: &Thread) {}

    /// Sleep until the next interrupt. Called by the idle thread with the
    /// scheduler unlocked.
    fn wait_for_interrupt()
    where
        Self: Sized;
}
