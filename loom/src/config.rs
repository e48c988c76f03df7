//! # Scheduler Configuration
//!
//! The policy and every tuning constant of the scheduler, fixed when the
//! scheduler is built. Defaults are the classic values; the boot command line
//! may switch the policy with `-o mlfqs`.

use crate::stack::DEFAULT_STACK_SIZE;

/// Ticks a thread may run before it is preempted.
pub const TIME_SLICE: u32 = 4;

/// Timer interrupts per second.
pub const TIMER_FREQ: u64 = 100;

/// MLFQS priorities are recomputed every this many ticks.
pub const PRIORITY_INTERVAL: u64 = 4;

/// Longest lock-holder chain a donation is propagated along.
pub const DONATION_MAX_DEPTH: usize = 8;

/// Upper bound on live threads, idle and the initial thread included.
pub const MAX_THREADS: usize = 1024;

/// Which priority policy runs. Chosen once, at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    /// Owner-set priorities with donation through locks.
    #[default]
    Priority,
    /// Multi-level feedback queue: priorities derived from `nice` and
    /// recent CPU usage.
    Mlfqs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub policy: SchedPolicy,
    pub time_slice: u32,
    pub timer_freq: u64,
    pub priority_interval: u64,
    pub donation_max_depth: usize,
    pub max_threads: usize,
    pub stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SchedPolicy::Priority,
            time_slice: TIME_SLICE,
            timer_freq: TIMER_FREQ,
            priority_interval: PRIORITY_INTERVAL,
            donation_max_depth: DONATION_MAX_DEPTH,
            max_threads: MAX_THREADS,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl SchedulerConfig {
    /// Defaults, with the policy taken from the kernel command line.
    ///
    /// Recognizes `-o mlfqs` (and `-omlfqs`); every other word is left to
    /// whoever else parses the command line.
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut config = Self::default();
        let mut words = cmdline.split_whitespace();

        while let Some(word) = words.next() {
            let option = match word {
                "-o" => words.next(),
                _ => word.strip_prefix("-o").filter(|rest| !rest.is_empty()),
            };
            if option == Some("mlfqs") {
                config.policy = SchedPolicy::Mlfqs;
            }
        }

        if config.policy == SchedPolicy::Mlfqs {
            log::info!("[Loom] MLFQS selected on the command line");
        }
        config
    }

    pub fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_mlfqs(&self) -> bool {
        self.policy == SchedPolicy::Mlfqs
    }
}
