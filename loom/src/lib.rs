//! # The Loom
//!
//! The preemptive thread scheduler of the kernel.
//!
//! The Loom owns every thread from creation to destruction. It keeps the
//! ready, sleeping and all-threads registries, picks the next thread to run,
//! sequences the context switch, wakes sleepers when their deadline passes,
//! and runs one of two priority policies chosen at boot:
//!
//! - **Priority donation**: threads carry a base priority set by their owner;
//!   a thread blocked on a lock lends its priority to the holder (and to the
//!   holder's holder, up to a bounded depth) until the lock is released.
//! - **MLFQS**: priorities are derived from each thread's `nice` value and its
//!   decayed CPU usage, recomputed from 17.14 fixed-point statistics.
//!
//! ## Architecture
//! - [`Scheduler`] is the whole scheduling context. Every registry mutation
//!   takes an [`IntrOff`] token, which only exists while interrupts are masked.
//! - [`arch::Cpu`] is the hardware seam: interrupt masking, the raw register
//!   switch, and the activation hooks. [`arch::SimulatedCpu`] drives the
//!   scheduler on a host; `arch::x86_64::X86_64Cpu` runs it on bare metal.
//! - [`global`] wraps one scheduler in a process-wide singleton for kernel code
//!   and interrupt handlers.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod alarm;
pub mod arch;
pub mod config;
pub mod context;
pub mod donation;
pub mod fixed_point;
pub mod global;
pub mod interrupt_lock;
pub mod interrupts;
pub mod mlfqs;
pub mod scheduler;
pub mod stack;
pub mod sync;
pub mod thread;
pub mod timer;


pub use config::{SchedPolicy, SchedulerConfig};
pub use donation::LockId;
pub use fixed_point::Fixed;
pub use interrupts::{IntrLevel, IntrOff};
pub use scheduler::{Scheduler, SchedulerStats};
pub use thread::{Thread, ThreadFlags, ThreadFunc, ThreadId, ThreadInfo, ThreadState};
pub use thread::{NICE_DEFAULT, NICE_MAX, NICE_MIN, PRI_DEFAULT, PRI_MAX, PRI_MIN};

use core::fmt;

/// Operational failures the Loom reports to its callers.
///
/// Contract violations (unblocking a thread that is not blocked, a corrupted
/// thread guard, sleeping the idle thread) are not errors: they halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoomError {
    /// The thread table already holds `SchedulerConfig::max_threads` threads.
    OutOfThreads,
    /// No memory was available for a new thread's stack.
    StackAllocationFailed,
    /// No live thread carries the requested id.
    ThreadNotFound,
}

impl fmt::Display for LoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoomError::OutOfThreads => f.write_str("thread table is full"),
            LoomError::StackAllocationFailed => f.write_str("could not allocate a thread stack"),
            LoomError::ThreadNotFound => f.write_str("no such thread"),
        }
    }
}
