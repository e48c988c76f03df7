//! Host stand-in for the CPU.
//!
//! Models the interrupt flag and records what the scheduler asked of the
//! hardware. A switch does not transfer control: the caller simply continues
//! as the thread switched to, which lets a test play the part of whichever
//! thread is current.

use alloc::vec::Vec;

use super::Cpu;
use crate::context::ThreadContext;
use crate::thread::{Thread, ThreadId};

#[derive(Debug, Default)]
pub struct SimulatedCpu {
    interrupts: bool,
    switches: Vec<(ThreadId, ThreadId)>,
    activations: Vec<ThreadId>,
    exits: Vec<ThreadId>,
}

impl SimulatedCpu {
    /// A CPU fresh out of boot: interrupts masked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(from, to)` pair switched so far, oldest first.
    pub fn switches(&self) -> &[(ThreadId, ThreadId)] {
        &self.switches
    }

    pub fn activations(&self) -> &[ThreadId] {
        &self.activations
    }

    /// User threads whose process teardown hook ran.
    pub fn process_exits(&self) -> &[ThreadId] {
        &self.exits
    }
}

fn never_entered() {
    unreachable!("simulated threads are never entered");
}

impl Cpu for SimulatedCpu {
    fn interrupts_enabled(&self) -> bool {
        self.interrupts
    }

    fn disable_interrupts(&mut self) {
        self.interrupts = false;
    }

    fn enable_interrupts(&mut self) {
        self.interrupts = true;
    }

    fn thread_entry(&self) -> usize {
        never_entered as usize
    }

    unsafe fn switch_threads(
        &mut self,
        prev: ThreadId,
        _from: *mut ThreadContext,
        next: ThreadId,
        _to: *const ThreadContext,
    ) {
        self.switches.push((prev, next));
    }

    fn activate(&mut self, thread: &Thread) {
        self.activations.push(thread.id());
    }

    fn process_exit(&mut self, thread: &Thread) {
        self.exits.push(thread.id());
    }

    fn wait_for_interrupt() {
        core::hint::spin_loop();
    }
}
