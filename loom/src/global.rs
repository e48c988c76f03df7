//! # The Global Loom
//!
//! The kernel has one CPU and therefore one scheduler. This module keeps it
//! in a process-wide singleton so that kernel code and interrupt handlers can
//! reach it without threading a reference through every call.
//!
//! ## Lifecycle
//! 1. [`init`] with interrupts still off, adopting the boot context as "main";
//! 2. [`start`] to create the idle thread and let ticks in;
//! 3. call [`timer_interrupt`] from the timer handler once per tick;
//! 4. [`teardown`] drops the scheduler (and every TCB it owns). Only meaningful
//!    on a host, where tests build one scheduler after another.
//!
//! The singleton lock masks interrupts while held. A context switch happens
//! inside it; see [`InterruptSafeLock`] for how ownership of the lock follows
//! the CPU from thread to thread.

use heapless::String;

use crate::arch::Cpu;
use crate::config::SchedulerConfig;
use crate::donation::LockId;
use crate::interrupt_lock::InterruptSafeLock;
use crate::interrupts;
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::thread::{Thread, ThreadFunc, ThreadId, ThreadInfo};
use crate::LoomError;

/// The CPU the global scheduler drives on this target.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub type Platform = crate::arch::x86_64::X86_64Cpu;

/// The CPU the global scheduler drives on this target.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub type Platform = crate::arch::SimulatedCpu;

static LOOM: InterruptSafeLock<Option<Scheduler<Platform>>> = InterruptSafeLock::new(None, "LOOM");

/// Build the global scheduler.
///
/// # Panics
/// If it already exists, or if interrupts are on.
pub fn init(config: SchedulerConfig) {
    let mut loom = LOOM.lock();
    assert!(loom.is_none(), "the Loom is already initialized");
    *loom = Some(Scheduler::new(Platform::new(), config));
}

/// Drop the global scheduler and every thread it owns.
pub fn teardown() {
    let old = LOOM.lock().take();
    if old.is_some() {
        log::info!("[Loom] torn down");
    }
}

pub fn is_initialized() -> bool {
    LOOM.lock().is_some()
}

/// Run `f` against the global scheduler with interrupts masked.
///
/// # Panics
/// If [`init`] has not run.
pub fn with_loom<R>(f: impl FnOnce(&mut Scheduler<Platform>) -> R) -> R {
    let mut loom = LOOM.lock();
    match loom.as_mut() {
        Some(scheduler) => f(scheduler),
        None => panic!("the Loom is not initialized"),
    }
}

/// Create the idle thread and turn interrupts on.
pub fn start() -> Result<(), LoomError> {
    with_loom(|s| s.spawn_idle())?;
    enable_ticks();
    Ok(())
}

// On hardware a tick taken while the singleton is locked would spin forever,
// so interrupts go on only after the lock is released.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
fn enable_ticks() {
    interrupts::enable();
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
fn enable_ticks() {
    with_loom(|s| {
        s.intr_enable();
    });
}

pub fn spawn(name: &str, priority: i32, entry: ThreadFunc, aux: usize) -> Result<ThreadId, LoomError> {
    with_loom(|s| s.create(name, priority, entry, aux))
}

pub fn yield_now() {
    with_loom(|s| s.yield_current());
}

/// Block the current thread until another thread unblocks it.
pub fn block() {
    with_loom(|s| s.without_interrupts(|s, tok| s.block(tok)));
}

pub fn unblock(tid: ThreadId) {
    with_loom(|s| s.unblock(tid));
}

/// Terminate the current thread.
pub fn exit() -> ! {
    with_loom(|s| s.exit());
    unreachable!("a dying thread was scheduled again");
}

pub fn current() -> ThreadId {
    with_loom(|s| s.current())
}

pub fn current_name() -> String<16> {
    with_loom(|s| s.current_thread().name.clone())
}

pub fn set_priority(priority: i32) {
    with_loom(|s| s.set_priority(priority));
}

pub fn get_priority() -> i32 {
    with_loom(|s| s.get_priority())
}

pub fn set_nice(nice: i32) {
    with_loom(|s| s.set_nice(nice));
}

pub fn get_nice() -> i32 {
    with_loom(|s| s.get_nice())
}

pub fn get_load_avg() -> i32 {
    with_loom(|s| s.get_load_avg())
}

pub fn get_recent_cpu() -> i32 {
    with_loom(|s| s.get_recent_cpu())
}

/// Sleep for `ticks` timer ticks.
pub fn sleep(ticks: i64) {
    with_loom(|s| s.timer_sleep(ticks));
}

pub fn ticks() -> u64 {
    with_loom(|s| s.timer_ticks())
}

/// The timer interrupt hook. Call once per tick from the timer handler,
/// after acknowledging the interrupt.
pub fn timer_interrupt() {
    if with_loom(|s| s.timer_interrupt()) {
        yield_now();
    }
}

pub fn stats() -> SchedulerStats {
    with_loom(|s| s.stats())
}

pub fn print_stats() {
    with_loom(|s| s.print_stats());
}

pub fn thread_info(tid: ThreadId) -> Option<ThreadInfo> {
    with_loom(|s| s.thread_info(tid))
}

/// Visit every live thread. `f` runs with the scheduler locked and must not
/// call back into this module.
pub fn for_each_thread(f: impl FnMut(&Thread)) {
    with_loom(|s| s.without_interrupts(|s, tok| s.for_each_thread(tok, f)));
}

pub(crate) fn lock_create() -> LockId {
    with_loom(|s| s.lock_create())
}

/// First Rust code of every new kernel thread, called by the architecture
/// trampoline with the entry function and its argument.
#[no_mangle]
extern "C" fn loom_kernel_thread(func: usize, aux: usize) -> ! {
    // Safety: the switch that brought us here left the singleton locked on
    // our behalf, and interrupts are still masked, so nothing else can be
    // inside it.
    unsafe { LOOM.force_unlock() };
    with_loom(|s| s.finish_switch());
    interrupts::enable();

    // Safety: InitialFrame stored a ThreadFunc in this register.
    let func: ThreadFunc = unsafe { core::mem::transmute::<usize, ThreadFunc>(func) };
    func(aux);
    exit()
}

/// Body of the idle thread: give the CPU away, and halt whenever nobody
/// wants it.
pub(crate) fn idle_thread(_aux: usize) {
    loop {
        with_loom(|s| s.without_interrupts(|s, tok| s.block(tok)));
        Platform::wait_for_interrupt();
    }
}
