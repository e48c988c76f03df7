//! The Scheduler - the core of the Loom
//!
//! One [`Scheduler`] owns every TCB and the three registries:
//!
//! - **ready**: `Ready` threads, highest effective priority first, FIFO among
//!   equals. The idle thread never appears here.
//! - **sleeping**: threads blocked in the alarm clock, earliest deadline first.
//! - **all**: every thread from creation until it exits.
//!
//! A thread is in at most one of ready and sleeping. Registry mutators take an
//! [`IntrOff`] token; there is no other lock.
//!
//! The dispatcher runs whenever the current thread stops being `Running`. It
//! picks the ready head (or idle), hands the CPU over through
//! [`Cpu::switch_threads`], and then finishes the switch in
//! [`schedule_tail`](Scheduler::schedule_tail) on behalf of the thread that
//! now runs. A `Dying` thread's TCB and stack are released there, never
//! earlier: until the switch completes the CPU is still on that stack.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::cmp::Reverse;

use crate::arch::Cpu;
use crate::config::SchedulerConfig;
use crate::context::{InitialFrame, ThreadContext};
use crate::donation::{LockId, LockState};
use crate::fixed_point::Fixed;
use crate::interrupts::{IntrLevel, IntrOff};
use crate::stack::Stack;
use crate::thread::{Thread, ThreadFlags, ThreadFunc, ThreadId, ThreadInfo, ThreadState};
use crate::thread::{PRI_DEFAULT, PRI_MAX, PRI_MIN};
use crate::LoomError;

pub struct Scheduler<C: Cpu> {
    pub(crate) cpu: C,
    pub(crate) config: SchedulerConfig,

    /// Owns every live TCB. Boxed so saved contexts keep their address while
    /// the map rebalances.
    pub(crate) threads: BTreeMap<ThreadId, Box<Thread>>,
    pub(crate) ready: VecDeque<ThreadId>,
    pub(crate) sleeping: VecDeque<ThreadId>,
    pub(crate) all: Vec<ThreadId>,

    pub(crate) running: ThreadId,
    initial: ThreadId,
    pub(crate) idle: Option<ThreadId>,
    /// Thread the CPU is being handed away from, read by whoever resumes.
    switching_from: Option<ThreadId>,
    next_tid: spin::Mutex<u64>,

    pub(crate) locks: BTreeMap<LockId, LockState>,
    pub(crate) next_lock: u32,

    pub(crate) load_avg: Fixed,

    pub(crate) idle_ticks: u64,
    pub(crate) kernel_ticks: u64,
    pub(crate) user_ticks: u64,
    /// Ticks since the running thread was last switched in.
    pub(crate) thread_ticks: u32,
    pub(crate) ticks: u64,

    pub(crate) in_interrupt: bool,
    pub(crate) yield_on_return: bool,
    context_switches: u64,
}

impl<C: Cpu> Scheduler<C> {
    /// Adopt the code that is already running as the thread "main".
    ///
    /// # Panics
    /// If interrupts are enabled: nothing may preempt the scheduler while it
    /// is half built.
    pub fn new(cpu: C, config: SchedulerConfig) -> Self {
        assert!(
            !cpu.interrupts_enabled(),
            "scheduler must be initialized with interrupts off"
        );

        let mut scheduler = Self {
            cpu,
            config,
            threads: BTreeMap::new(),
            ready: VecDeque::new(),
            sleeping: VecDeque::new(),
            all: Vec::new(),
            running: ThreadId(0),
            initial: ThreadId(0),
            idle: None,
            switching_from: None,
            next_tid: spin::Mutex::new(1),
            locks: BTreeMap::new(),
            next_lock: 0,
            load_avg: Fixed::ZERO,
            idle_ticks: 0,
            kernel_ticks: 0,
            user_ticks: 0,
            thread_ticks: 0,
            ticks: 0,
            in_interrupt: false,
            yield_on_return: false,
            context_switches: 0,
        };

        let tid = scheduler.allocate_tid();
        let mut main = Thread::new(tid, "main", PRI_DEFAULT, ThreadFlags::INITIAL, None);
        main.state = ThreadState::Running;
        scheduler.threads.insert(tid, Box::new(main));
        scheduler.all.push(tid);
        scheduler.running = tid;
        scheduler.initial = tid;

        log::info!("[Loom] scheduler initialized ({:?} policy)", scheduler.config.policy);
        scheduler
    }

    /// Create the idle thread and turn interrupts on.
    pub fn start(&mut self) -> Result<(), LoomError> {
        self.spawn_idle()?;
        self.intr_enable();
        Ok(())
    }

    /// First half of [`start`](Self::start): everything except unmasking.
    pub(crate) fn spawn_idle(&mut self) -> Result<(), LoomError> {
        assert!(self.idle.is_none(), "scheduler already started");

        let idle = self.without_interrupts(|s, tok| {
            s.build_thread("idle", PRI_MIN, crate::global::idle_thread, 0, ThreadFlags::IDLE, tok)
        })?;
        self.idle = Some(idle);
        self.load_avg = Fixed::ZERO;

        log::info!("[Loom] idle thread {} ready, scheduler started", idle);
        Ok(())
    }

    // === Lifecycle ===

    /// Create a kernel thread that runs `entry(aux)` and make it ready.
    ///
    /// The new thread may run, and even exit, before this returns: it
    /// preempts the creator at once if it has the higher priority.
    ///
    /// # Panics
    /// If `priority` is outside `[PRI_MIN, PRI_MAX]`.
    pub fn create(
        &mut self,
        name: &str,
        priority: i32,
        entry: ThreadFunc,
        aux: usize,
    ) -> Result<ThreadId, LoomError> {
        let tid = self.without_interrupts(|s, tok| {
            s.build_thread(name, priority, entry, aux, ThreadFlags::empty(), tok)
        })?;

        self.unblock(tid);
        self.validate_priority();
        Ok(tid)
    }

    fn build_thread(
        &mut self,
        name: &str,
        priority: i32,
        entry: ThreadFunc,
        aux: usize,
        flags: ThreadFlags,
        _tok: IntrOff,
    ) -> Result<ThreadId, LoomError> {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {} outside [{}, {}]",
            priority,
            PRI_MIN,
            PRI_MAX
        );

        if self.threads.len() >= self.config.max_threads {
            log::warn!("[Loom] cannot create '{}': {} threads live", name, self.threads.len());
            return Err(LoomError::OutOfThreads);
        }

        let mut stack = Stack::with_size(self.config.stack_size).ok_or_else(|| {
            log::warn!("[Loom] cannot create '{}': no memory for its stack", name);
            LoomError::StackAllocationFailed
        })?;
        let context = InitialFrame::new(entry, aux).build(&mut stack, self.cpu.thread_entry());

        let tid = self.allocate_tid();
        let mut thread = Thread::new(tid, name, priority, flags, Some(stack));
        thread.context = context;

        if !flags.contains(ThreadFlags::IDLE) {
            let parent = self.running;
            thread.parent = Some(parent);
            lookup_mut(&mut self.threads, parent).children.push(tid);
        }

        log::debug!("[Loom] created thread {} '{}' at priority {}", tid, thread.name(), priority);

        self.threads.insert(tid, Box::new(thread));
        self.all.push(tid);
        Ok(tid)
    }

    fn allocate_tid(&self) -> ThreadId {
        let mut next = self.next_tid.lock();
        let tid = ThreadId(*next);
        *next += 1;
        tid
    }

    /// Put the current thread to sleep until someone unblocks it.
    ///
    /// # Panics
    /// From interrupt context.
    pub fn block(&mut self, tok: IntrOff) {
        assert!(!self.in_interrupt, "block() called from interrupt context");
        self.check_intr_off(tok);

        lookup_mut(&mut self.threads, self.running).state = ThreadState::Blocked;
        self.schedule(tok);
    }

    /// Move a blocked thread to the ready registry.
    ///
    /// Never preempts the caller, so it is safe to call while the caller
    /// keeps other invariants of its own open.
    ///
    /// # Panics
    /// If `tid` is not blocked, or is the idle thread.
    pub fn unblock(&mut self, tid: ThreadId) {
        self.without_interrupts(|s, tok| s.make_ready(tid, tok));
    }

    pub(crate) fn make_ready(&mut self, tid: ThreadId, tok: IntrOff) {
        let thread = lookup_mut(&mut self.threads, tid);
        assert!(
            thread.state == ThreadState::Blocked,
            "unblock: thread {} is not blocked ({:?})",
            tid,
            thread.state
        );
        assert!(!thread.is_idle(), "unblock: the idle thread never becomes ready");

        thread.state = ThreadState::Ready;
        self.ready_insert(tid, tok);
    }

    /// Give up the CPU. The current thread goes back into the ready registry
    /// behind every ready thread of equal priority.
    pub fn yield_current(&mut self) {
        assert!(!self.in_interrupt, "yield from interrupt context");

        self.without_interrupts(|s, tok| {
            let cur = s.running;
            let thread = lookup_mut(&mut s.threads, cur);
            thread.yields += 1;

            if thread.is_idle() {
                thread.state = ThreadState::Blocked;
            } else {
                thread.state = ThreadState::Ready;
                s.ready_insert(cur, tok);
            }
            s.schedule(tok);
        });
    }

    /// Terminate the current thread.
    ///
    /// On real hardware this never returns. On a simulated CPU it returns
    /// with the caller now acting as the next thread.
    ///
    /// # Panics
    /// From interrupt context, for the idle thread, or while the thread still
    /// holds a lock.
    pub fn exit(&mut self) {
        assert!(!self.in_interrupt, "exit from interrupt context");

        let old = self.intr_disable();
        let tok = self.intr_off();

        let cur = self.running;
        let thread = lookup(&self.threads, cur);
        assert!(!thread.is_idle(), "the idle thread cannot exit");
        if let Some((lock, _)) = self.locks.iter().find(|(_, state)| state.holder == Some(cur)) {
            panic!("thread {} exiting while holding {:?}", cur, lock);
        }
        log::debug!("[Loom] thread {} '{}' exiting", cur, thread.name());
        if thread.is_user() {
            self.cpu.process_exit(thread);
        }

        self.all.retain(|&id| id != cur);
        lookup_mut(&mut self.threads, cur).state = ThreadState::Dying;
        self.schedule(tok);

        self.intr_set_level(old);
    }

    // === Dispatcher ===

    /// Switch to the next thread to run.
    ///
    /// # Panics
    /// If interrupts are on, or the current thread is still `Running`.
    pub(crate) fn schedule(&mut self, tok: IntrOff) {
        assert!(!self.cpu.interrupts_enabled(), "schedule() with interrupts on");

        let cur = self.running;
        let cur_state = lookup(&self.threads, cur).state;
        assert!(
            cur_state != ThreadState::Running,
            "schedule(): current thread {} is still running",
            cur
        );

        let next = self.next_thread_to_run(tok);
        if next == cur {
            self.schedule_tail(None, tok);
            return;
        }

        log::trace!("[Loom] switch {} ({:?}) -> {}", cur, cur_state, next);
        self.context_switches += 1;
        self.switching_from = Some(cur);
        self.running = next;

        let from = &mut lookup_mut(&mut self.threads, cur).context as *mut ThreadContext;
        let to = &lookup(&self.threads, next).context as *const ThreadContext;

        // Safety: interrupts are off and both contexts live in boxed TCBs that
        // stay in the table until schedule_tail runs.
        unsafe { self.cpu.switch_threads(cur, from, next, to) };

        let prev = self.switching_from.take();
        self.schedule_tail(prev, tok);
    }

    fn next_thread_to_run(&mut self, _tok: IntrOff) -> ThreadId {
        match self.ready.pop_front() {
            Some(tid) => tid,
            None => match self.idle {
                Some(idle) => idle,
                None => panic!("no thread to run and no idle thread (start() not called?)"),
            },
        }
    }

    /// Complete a switch on behalf of the thread now running.
    ///
    /// Marks it `Running`, starts a fresh time slice, lets the CPU reactivate
    /// its context, and destroys `prev` if it was dying.
    pub(crate) fn schedule_tail(&mut self, prev: Option<ThreadId>, _tok: IntrOff) {
        let cur = self.running;
        let thread = lookup_mut(&mut self.threads, cur);
        thread.state = ThreadState::Running;
        self.thread_ticks = 0;
        self.cpu.activate(thread);

        if let Some(prev) = prev.filter(|&p| p != cur) {
            if lookup(&self.threads, prev).state == ThreadState::Dying {
                self.destroy(prev);
            }
        }
    }

    /// Entry point for a thread that runs for the first time. It never
    /// returned from a switch, so it finishes the one that started it.
    pub fn finish_switch(&mut self) {
        let tok = self.intr_off();
        let prev = self.switching_from.take();
        self.schedule_tail(prev, tok);
    }

    fn destroy(&mut self, tid: ThreadId) {
        let Some(thread) = self.threads.remove(&tid) else {
            return;
        };

        if let Some(parent) = thread.parent {
            if let Some(p) = self.threads.get_mut(&parent) {
                p.children.retain(|&c| c != tid);
            }
        }
        for child in &thread.children {
            if let Some(c) = self.threads.get_mut(child) {
                c.parent = None;
            }
        }
        // Dropping the box frees the stack.
    }

    // === Ready registry ===

    /// Insert behind every ready thread of greater or equal priority.
    pub(crate) fn ready_insert(&mut self, tid: ThreadId, tok: IntrOff) {
        self.check_intr_off(tok);
        let threads = &self.threads;
        let priority = lookup(threads, tid).priority;
        let pos = self
            .ready
            .iter()
            .position(|&other| lookup(threads, other).priority < priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, tid);
    }

    pub(crate) fn ready_remove(&mut self, tid: ThreadId, tok: IntrOff) -> bool {
        self.check_intr_off(tok);
        match self.ready.iter().position(|&id| id == tid) {
            Some(pos) => {
                self.ready.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Restore the ordering after priorities changed in bulk. The sort is
    /// stable, so equal priorities keep their relative order.
    pub(crate) fn resort_ready(&mut self, tok: IntrOff) {
        self.check_intr_off(tok);
        let threads = &self.threads;
        self.ready
            .make_contiguous()
            .sort_by_key(|&id| Reverse(lookup(threads, id).priority));
    }

    pub(crate) fn ready_head_priority(&self) -> Option<i32> {
        self.ready.front().map(|&id| lookup(&self.threads, id).priority)
    }

    // === Interrupt control ===

    pub fn intr_get_level(&self) -> IntrLevel {
        IntrLevel::from_enabled(self.cpu.interrupts_enabled())
    }

    /// Mask interrupts, returning the previous level.
    pub fn intr_disable(&mut self) -> IntrLevel {
        let old = self.intr_get_level();
        self.cpu.disable_interrupts();
        old
    }

    /// Unmask interrupts, returning the previous level.
    pub fn intr_enable(&mut self) -> IntrLevel {
        assert!(!self.in_interrupt, "enabling interrupts inside an interrupt handler");
        let old = self.intr_get_level();
        self.cpu.enable_interrupts();
        old
    }

    pub fn intr_set_level(&mut self, level: IntrLevel) -> IntrLevel {
        match level {
            IntrLevel::On => self.intr_enable(),
            IntrLevel::Off => self.intr_disable(),
        }
    }

    /// Token for a section that already runs with interrupts masked.
    ///
    /// # Panics
    /// If interrupts are on.
    pub fn intr_off(&self) -> IntrOff {
        assert!(
            !self.cpu.interrupts_enabled(),
            "operation requires interrupts to be disabled"
        );
        IntrOff::new_unchecked()
    }

    /// Re-check a token where it is spent. Tokens are `Copy`, so one can
    /// outlive the section that produced it.
    ///
    /// # Panics
    /// If interrupts are on.
    pub(crate) fn check_intr_off(&self, _tok: IntrOff) {
        assert!(
            !self.cpu.interrupts_enabled(),
            "IntrOff token used with interrupts enabled"
        );
    }

    /// True while the timer interrupt is being handled.
    pub fn intr_context(&self) -> bool {
        self.in_interrupt
    }

    /// Run `f` with interrupts masked, then restore the previous level.
    pub fn without_interrupts<R>(&mut self, f: impl FnOnce(&mut Self, IntrOff) -> R) -> R {
        let old = self.intr_disable();
        let tok = self.intr_off();
        let result = f(self, tok);
        self.intr_set_level(old);
        result
    }

    // === Queries ===

    pub fn current(&self) -> ThreadId {
        self.running
    }

    /// The running thread's TCB, guard-checked.
    pub fn current_thread(&self) -> &Thread {
        lookup(&self.threads, self.running)
    }

    pub fn name(&self) -> &str {
        self.current_thread().name()
    }

    pub fn tid(&self) -> ThreadId {
        self.running
    }

    pub fn idle_thread(&self) -> Option<ThreadId> {
        self.idle
    }

    /// The thread adopted from the boot context.
    pub fn initial_thread(&self) -> ThreadId {
        self.initial
    }

    /// Look a thread up by id. Destroyed threads are gone.
    ///
    /// # Panics
    /// If the TCB's guard is corrupt.
    pub fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(&tid).map(|t| {
            assert!(t.is_thread(), "thread {} failed its guard check", tid);
            &**t
        })
    }

    /// A child of the current thread, if `tid` is one.
    pub fn child(&self, tid: ThreadId) -> Option<&Thread> {
        if self.current_thread().children.contains(&tid) {
            self.thread(tid)
        } else {
            None
        }
    }

    /// Flag a thread as backing a user process.
    pub fn mark_user(&mut self, tid: ThreadId) -> Result<(), LoomError> {
        let thread = self.threads.get_mut(&tid).ok_or(LoomError::ThreadNotFound)?;
        thread.flags.insert(ThreadFlags::USER);
        Ok(())
    }

    /// Visit every thread in the all-threads registry, in creation order.
    pub fn for_each_thread(&self, tok: IntrOff, mut f: impl FnMut(&Thread)) {
        self.check_intr_off(tok);
        for &tid in &self.all {
            f(lookup(&self.threads, tid));
        }
    }

    pub fn thread_info(&self, tid: ThreadId) -> Option<ThreadInfo> {
        self.thread(tid).map(Thread::info)
    }

    /// Ready thread ids, in the order they will run.
    pub fn ready_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.ready.iter().copied()
    }

    /// Sleeping thread ids, earliest deadline first.
    pub fn sleeping_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.sleeping.iter().copied()
    }

    pub fn all_threads(&self) -> &[ThreadId] {
        &self.all
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    pub fn stats(&self) -> SchedulerStats {
        let count = |state: ThreadState| {
            self.all
                .iter()
                .filter(|&&id| lookup(&self.threads, id).state == state)
                .count()
        };

        SchedulerStats {
            total_threads: self.all.len(),
            ready_threads: self.ready.len(),
            blocked_threads: count(ThreadState::Blocked),
            sleeping_threads: self.sleeping.len(),
            idle_ticks: self.idle_ticks,
            kernel_ticks: self.kernel_ticks,
            user_ticks: self.user_ticks,
            context_switches: self.context_switches,
            ticks: self.ticks,
        }
    }
}

/// Fetch a TCB and check its guards.
///
/// # Panics
/// If the thread does not exist or its guard is corrupt. Either means the
/// registries no longer describe memory we can trust.
pub(crate) fn lookup(threads: &BTreeMap<ThreadId, Box<Thread>>, tid: ThreadId) -> &Thread {
    match threads.get(&tid) {
        Some(thread) => {
            assert!(thread.is_thread(), "thread {} failed its guard check", tid);
            thread
        }
        None => panic!("no thread {} in the registry", tid),
    }
}

pub(crate) fn lookup_mut(
    threads: &mut BTreeMap<ThreadId, Box<Thread>>,
    tid: ThreadId,
) -> &mut Thread {
    match threads.get_mut(&tid) {
        Some(thread) => {
            assert!(thread.is_thread(), "thread {} failed its guard check", tid);
            thread
        }
        None => panic!("no thread {} in the registry", tid),
    }
}

/// Statistics about the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub total_threads: usize,
    pub ready_threads: usize,
    pub blocked_threads: usize,
    pub sleeping_threads: usize,
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub user_ticks: u64,
    pub context_switches: u64,
    pub ticks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::SimulatedCpu;
    use crate::tests::{booted, noop, spawn};

    #[test]
    fn test_new_adopts_main() {
        let s = Scheduler::new(SimulatedCpu::new(), SchedulerConfig::default());
        assert_eq!(s.name(), "main");
        assert_eq!(s.current(), ThreadId(1));
        assert_eq!(s.current_thread().state(), ThreadState::Running);
        assert_eq!(s.current_thread().priority(), PRI_DEFAULT);
        assert!(s.current_thread().flags().contains(ThreadFlags::INITIAL));
        assert_eq!(s.all_threads(), &[ThreadId(1)]);
    }

    #[test]
    #[should_panic(expected = "interrupts off")]
    fn test_new_with_interrupts_on_panics() {
        let mut cpu = SimulatedCpu::new();
        cpu.enable_interrupts();
        let _ = Scheduler::new(cpu, SchedulerConfig::default());
    }

    #[test]
    fn test_start_creates_idle_outside_ready() {
        let s = booted(SchedulerConfig::default());
        let idle = s.idle_thread().expect("idle thread");
        let t = s.thread(idle).unwrap();
        assert!(t.is_idle());
        assert_eq!(t.priority(), PRI_MIN);
        assert_eq!(t.state(), ThreadState::Blocked);
        assert_eq!(s.ready_threads().count(), 0);
        assert_eq!(s.intr_get_level(), IntrLevel::On);
    }

    #[test]
    fn test_ids_ascend_and_parent_is_linked() {
        let mut s = booted(SchedulerConfig::default());
        let a = spawn(&mut s, "a", 10);
        let b = spawn(&mut s, "b", 10);
        assert!(a < b);
        assert_eq!(s.thread(a).unwrap().parent(), Some(s.current()));
        assert!(s.child(a).is_some());
        assert!(s.current_thread().children().contains(&b));
    }

    #[test]
    fn test_ready_order_is_priority_then_fifo() {
        let mut s = booted(SchedulerConfig::default());
        let a = spawn(&mut s, "a", 20);
        let b = spawn(&mut s, "b", 25);
        let c = spawn(&mut s, "c", 20);
        let d = spawn(&mut s, "d", 30);
        let e = spawn(&mut s, "e", 25);
        assert_eq!(s.ready_threads().collect::<Vec<_>>(), vec![d, b, e, a, c]);
    }

    #[test]
    fn test_ready_order_holds_for_every_insertion_sequence() {
        // Every sequence of five priorities drawn from three levels, all below
        // main so nothing preempts.
        let levels = [10, 20, 30];
        let config = SchedulerConfig {
            stack_size: crate::stack::MIN_STACK_SIZE,
            ..SchedulerConfig::default()
        };

        for code in 0..levels.len().pow(5) {
            let mut s = booted(config);
            let mut n = code;
            let mut created = Vec::new();
            for _ in 0..5 {
                let priority = levels[n % levels.len()];
                n /= levels.len();
                created.push((spawn(&mut s, "t", priority), priority));
            }

            let mut expected = created.clone();
            expected.sort_by_key(|&(_, p)| Reverse(p));
            let expected: Vec<_> = expected.into_iter().map(|(tid, _)| tid).collect();
            assert_eq!(s.ready_threads().collect::<Vec<_>>(), expected, "sequence {:?}", created);
        }
    }

    #[test]
    fn test_higher_priority_create_preempts() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let t = spawn(&mut s, "urgent", 40);
        assert_eq!(s.current(), t);
        assert_eq!(s.thread(main).unwrap().state(), ThreadState::Ready);
        assert_eq!(s.cpu().switches(), &[(main, t)]);
    }

    #[test]
    fn test_yield_goes_behind_equal_priority() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let a = spawn(&mut s, "a", PRI_DEFAULT);
        let b = spawn(&mut s, "b", PRI_DEFAULT);

        s.yield_current();
        assert_eq!(s.current(), a);
        assert_eq!(s.ready_threads().collect::<Vec<_>>(), vec![b, main]);
        assert_eq!(s.thread(main).unwrap().yields(), 1);
    }

    #[test]
    fn test_yield_alone_keeps_running() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        s.yield_current();
        assert_eq!(s.current(), main);
        assert!(s.cpu().switches().is_empty());
    }

    #[test]
    fn test_block_with_empty_ready_runs_idle() {
        let mut s = booted(SchedulerConfig::default());
        let idle = s.idle_thread().unwrap();
        s.without_interrupts(|s, tok| s.block(tok));
        assert_eq!(s.current(), idle);
        assert_eq!(s.current_thread().state(), ThreadState::Running);
    }

    #[test]
    fn test_idle_yield_parks_instead_of_queueing() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        s.without_interrupts(|s, tok| s.block(tok));
        s.unblock(main);

        // Now playing idle; yielding hands back to main without queueing idle.
        s.yield_current();
        assert_eq!(s.current(), main);
        assert_eq!(s.ready_threads().count(), 0);
        let idle = s.idle_thread().unwrap();
        assert_eq!(s.thread(idle).unwrap().state(), ThreadState::Blocked);
    }

    #[test]
    fn test_unblock_does_not_preempt() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let t = spawn(&mut s, "waiter", 10);

        // Play t and block it, then wake it from main at a higher priority.
        s.without_interrupts(|s, tok| s.block(tok));
        assert_eq!(s.current(), t);
        s.without_interrupts(|s, tok| s.block(tok));
        assert_eq!(s.current(), s.idle_thread().unwrap());
        s.unblock(main);
        s.yield_current();
        assert_eq!(s.current(), main);

        s.threads.get_mut(&t).unwrap().priority = 50;
        s.unblock(t);
        assert_eq!(s.current(), main);
        assert_eq!(s.ready_threads().next(), Some(t));
    }

    #[test]
    #[should_panic(expected = "not blocked")]
    fn test_unblock_of_ready_thread_panics() {
        let mut s = booted(SchedulerConfig::default());
        let t = spawn(&mut s, "ready", 10);
        s.unblock(t);
    }

    #[test]
    #[should_panic(expected = "interrupts to be disabled")]
    fn test_token_requires_interrupts_off() {
        let s = booted(SchedulerConfig::default());
        let _ = s.intr_off();
    }

    #[test]
    fn test_exit_destroys_after_switch() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let t = spawn(&mut s, "short", 40);
        assert_eq!(s.current(), t);

        s.exit();
        assert_eq!(s.current(), main);
        assert!(s.thread(t).is_none());
        assert!(!s.all_threads().contains(&t));
        assert!(!s.current_thread().children().contains(&t));
    }

    #[test]
    #[should_panic(expected = "exiting while holding")]
    fn test_exit_while_holding_a_lock_panics() {
        let mut s = booted(SchedulerConfig::default());
        let lock = s.lock_create();
        let t = spawn(&mut s, "holder", 40);
        assert_eq!(s.current(), t);
        s.lock_acquire(lock);
        s.exit();
    }

    #[test]
    #[should_panic(expected = "idle thread cannot exit")]
    fn test_idle_cannot_exit() {
        let mut s = booted(SchedulerConfig::default());
        s.without_interrupts(|s, tok| s.block(tok));
        assert_eq!(Some(s.current()), s.idle_thread());
        s.exit();
    }

    #[test]
    #[should_panic(expected = "token used with interrupts enabled")]
    fn test_stale_token_is_rejected() {
        let mut s = booted(SchedulerConfig::default());
        let tok = s.without_interrupts(|_, tok| tok);
        assert_eq!(s.intr_get_level(), IntrLevel::On);
        s.for_each_thread(tok, |_| {});
    }

    #[test]
    fn test_user_thread_exit_runs_process_hook() {
        let mut s = booted(SchedulerConfig::default());
        let t = spawn(&mut s, "user", 40);
        s.mark_user(t).unwrap();
        s.exit();
        assert_eq!(s.cpu().process_exits(), &[t]);
        assert_eq!(s.mark_user(t), Err(LoomError::ThreadNotFound));
    }

    #[test]
    fn test_switch_activates_next_thread() {
        let mut s = booted(SchedulerConfig::default());
        let t = spawn(&mut s, "active", 40);
        assert_eq!(s.cpu().activations().last(), Some(&t));
    }

    #[test]
    fn test_out_of_threads() {
        let config = SchedulerConfig {
            max_threads: 4,
            ..SchedulerConfig::default()
        };
        let mut s = booted(config);
        spawn(&mut s, "a", 10);
        spawn(&mut s, "b", 10);
        assert_eq!(s.create("c", 10, noop, 0), Err(LoomError::OutOfThreads));
        assert_eq!(s.all_threads().len(), 4);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_create_with_bad_priority_panics() {
        let mut s = booted(SchedulerConfig::default());
        let _ = s.create("bad", PRI_MAX + 1, noop, 0);
    }

    #[test]
    fn test_stats_and_iteration() {
        let mut s = booted(SchedulerConfig::default());
        spawn(&mut s, "a", 10);
        spawn(&mut s, "b", 10);
        let stats = s.stats();
        assert_eq!(stats.total_threads, 4);
        assert_eq!(stats.ready_threads, 2);
        assert_eq!(stats.blocked_threads, 1); // idle

        let mut names = Vec::new();
        s.without_interrupts(|s, tok| s.for_each_thread(tok, |t| names.push(t.name().to_string())));
        assert_eq!(names, vec!["main", "idle", "a", "b"]);
    }

    #[test]
    #[should_panic(expected = "guard check")]
    fn test_corrupted_guard_halts_lookup() {
        let mut s = booted(SchedulerConfig::default());
        let t = spawn(&mut s, "victim", 10);
        let bottom = s.thread(t).unwrap().stack().unwrap().bottom();
        unsafe { (bottom as *mut u32).write(0) };
        s.yield_current();
    }
}
