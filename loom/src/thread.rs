//! Thread definitions - the threads the Loom weaves

use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use heapless::String;

use crate::context::ThreadContext;
use crate::donation::LockId;
use crate::fixed_point::Fixed;
use crate::stack::Stack;

/// Lowest priority.
pub const PRI_MIN: i32 = 0;
/// Priority given to threads that don't ask for one.
pub const PRI_DEFAULT: i32 = 31;
/// Highest priority.
pub const PRI_MAX: i32 = 63;

pub const NICE_MIN: i32 = -20;
pub const NICE_DEFAULT: i32 = 0;
pub const NICE_MAX: i32 = 20;

/// Marks a live TCB. Also written at the lowest word of every owned stack,
/// where an overflow clobbers it first.
pub const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Longest thread name kept, in bytes.
pub const NAME_MAX: usize = 15;

/// Entry point of a kernel thread. Receives the auxiliary word passed to
/// `create`.
pub type ThreadFunc = fn(usize);

/// A unique identifier for a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The state of a thread in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// On the CPU. Exactly one thread is running while interrupts are on.
    Running,
    /// Waiting in the ready registry for its turn.
    Ready,
    /// Waiting for an event: a lock, a deadline, or an explicit unblock.
    Blocked,
    /// Exited; destroyed by the dispatcher once the CPU has left it.
    Dying,
}

bitflags! {
    /// Roles a thread plays that the scheduler has to know about.
    pub struct ThreadFlags: u8 {
        /// Adopted from the boot context at initialization; runs on the boot
        /// stack and owns none.
        const INITIAL = 1 << 0;
        /// Runs only when nothing else is ready. Never enters the ready registry.
        const IDLE = 1 << 1;
        /// Backs a user process. Its ticks count as user time and its exit
        /// runs the process teardown hook.
        const USER = 1 << 2;
    }
}

/// A thread control block
pub struct Thread {
    pub(crate) magic: u32,
    pub(crate) id: ThreadId,
    pub(crate) name: String<16>,
    pub(crate) state: ThreadState,
    pub(crate) flags: ThreadFlags,

    /// Effective priority: the base raised by any live donation.
    pub(crate) priority: i32,
    pub(crate) priority_base: i32,

    /// Lock this thread is blocked acquiring, if any.
    pub(crate) waiting_on: Option<LockId>,
    /// Threads currently donating to this one. Their priorities are read
    /// through the registry whenever they matter.
    pub(crate) donors: Vec<ThreadId>,

    pub(crate) nice: i32,
    pub(crate) recent_cpu: Fixed,

    /// Deadline tick while in the sleep registry.
    pub(crate) wake_tick: Option<u64>,

    pub(crate) parent: Option<ThreadId>,
    pub(crate) children: Vec<ThreadId>,

    // CPU state (for context switching)
    pub(crate) context: ThreadContext,
    pub(crate) stack: Option<Stack>,

    pub(crate) ticks_run: u64,
    pub(crate) yields: u64,
}

impl Thread {
    /// Build a blocked TCB.
    ///
    /// `name` is cut to [`NAME_MAX`] bytes on a character boundary.
    pub(crate) fn new(
        id: ThreadId,
        name: &str,
        priority: i32,
        flags: ThreadFlags,
        stack: Option<Stack>,
    ) -> Self {
        Self {
            magic: THREAD_MAGIC,
            id,
            name: truncate_name(name),
            state: ThreadState::Blocked,
            flags,
            priority,
            priority_base: priority,
            waiting_on: None,
            donors: Vec::new(),
            nice: NICE_DEFAULT,
            recent_cpu: Fixed::ZERO,
            wake_tick: None,
            parent: None,
            children: Vec::new(),
            context: ThreadContext::empty(),
            stack,
            ticks_run: 0,
            yields: 0,
        }
    }

    /// True if both guards are intact: the magic in the TCB and the word at
    /// the bottom of the owned stack.
    pub fn is_thread(&self) -> bool {
        self.magic == THREAD_MAGIC && self.stack.as_ref().map_or(true, Stack::guard_intact)
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    pub fn is_idle(&self) -> bool {
        self.flags.contains(ThreadFlags::IDLE)
    }

    pub fn is_user(&self) -> bool {
        self.flags.contains(ThreadFlags::USER)
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn base_priority(&self) -> i32 {
        self.priority_base
    }

    pub fn nice(&self) -> i32 {
        self.nice
    }

    pub fn recent_cpu(&self) -> Fixed {
        self.recent_cpu
    }

    pub fn waiting_on(&self) -> Option<LockId> {
        self.waiting_on
    }

    pub fn donors(&self) -> &[ThreadId] {
        &self.donors
    }

    pub fn wake_tick(&self) -> Option<u64> {
        self.wake_tick
    }

    pub fn parent(&self) -> Option<ThreadId> {
        self.parent
    }

    pub fn children(&self) -> &[ThreadId] {
        &self.children
    }

    /// Get a reference to the thread's saved context
    pub fn context(&self) -> &ThreadContext {
        &self.context
    }

    pub fn stack(&self) -> Option<&Stack> {
        self.stack.as_ref()
    }

    pub fn ticks_run(&self) -> u64 {
        self.ticks_run
    }

    pub fn yields(&self) -> u64 {
        self.yields
    }

    /// Take a copyable snapshot for diagnostics.
    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            priority: self.priority,
            base_priority: self.priority_base,
            nice: self.nice,
            recent_cpu: self.recent_cpu,
            ticks_run: self.ticks_run,
            yields: self.yields,
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name.as_str())
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("base", &self.priority_base)
            .field("donors", &self.donors)
            .field("waiting_on", &self.waiting_on)
            .finish()
    }
}

/// Snapshot of a thread, detached from the registry.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String<16>,
    pub state: ThreadState,
    pub priority: i32,
    pub base_priority: i32,
    pub nice: i32,
    pub recent_cpu: Fixed,
    pub ticks_run: u64,
    pub yields: u64,
}

fn truncate_name(name: &str) -> String<16> {
    let mut out = String::new();
    for c in name.chars() {
        if out.len() + c.len_utf8() > NAME_MAX {
            break;
        }
        // Capacity is 16 and we stop at 15 bytes.
        let _ = out.push(c);
    }
    out
}
