//! # Multi-Level Feedback Queue Scheduling
//!
//! When MLFQS is selected nobody sets priorities by hand. Each thread's
//! priority is derived from two numbers:
//!
//! - `nice`, a bias the thread chooses in `[-20, 20]`; nicer threads give way;
//! - `recent_cpu`, an exponentially decayed count of the ticks it has run.
//!
//! The decay rate follows the system load average, so on a busy system CPU
//! history is forgotten more slowly. All arithmetic is 17.14 fixed point.
//!
//! ## Cadence
//! - every tick: the running thread's `recent_cpu` grows by one;
//! - every second (`timer_freq` ticks): `load_avg`, then every `recent_cpu`;
//! - every `priority_interval` ticks: every priority, then the ready order.

use crate::arch::Cpu;
use crate::fixed_point::Fixed;
use crate::interrupts::IntrOff;
use crate::scheduler::{lookup, lookup_mut, Scheduler};
use crate::thread::{NICE_MAX, NICE_MIN, PRI_MAX, PRI_MIN};

/// `PRI_MAX - recent_cpu / 4 - 2 * nice`, rounded and clamped.
pub fn mlfqs_priority(recent_cpu: Fixed, nice: i32) -> i32 {
    recent_cpu
        .div_int(-4)
        .add_int(PRI_MAX - nice * 2)
        .to_int_round()
        .clamp(PRI_MIN, PRI_MAX)
}

/// `(2 * load_avg) / (2 * load_avg + 1) * recent_cpu + nice`
pub fn decayed_recent_cpu(recent_cpu: Fixed, load_avg: Fixed, nice: i32) -> Fixed {
    let twice_load = load_avg.mul_int(2);
    let coefficient = twice_load / twice_load.add_int(1);
    (coefficient * recent_cpu).add_int(nice)
}

/// `59/60 * load_avg + 1/60 * ready_threads`
pub fn next_load_avg(load_avg: Fixed, ready_threads: i32) -> Fixed {
    let keep = Fixed::from_int(59) / Fixed::from_int(60);
    let add = Fixed::from_int(1) / Fixed::from_int(60);
    keep * load_avg + add.mul_int(ready_threads)
}

impl<C: Cpu> Scheduler<C> {
    /// MLFQS bookkeeping for one tick. `self.ticks` has already advanced.
    pub(crate) fn mlfqs_tick(&mut self, tok: IntrOff) {
        let cur = lookup_mut(&mut self.threads, self.running);
        if !cur.is_idle() {
            cur.recent_cpu = cur.recent_cpu.add_int(1);
        }

        if self.ticks % self.config.timer_freq == 0 {
            self.update_load_avg(tok);
            self.update_recent_cpu_all(tok);
        }
        if self.ticks % self.config.priority_interval == 0 {
            self.update_priority_all(tok);
        }
    }

    fn update_load_avg(&mut self, _tok: IntrOff) {
        let running = usize::from(!self.current_thread().is_idle());
        let ready = (self.ready.len() + running) as i32;
        self.load_avg = next_load_avg(self.load_avg, ready);
        log::trace!("[Loom] load_avg now {}/100", self.get_load_avg());
    }

    fn update_recent_cpu_all(&mut self, _tok: IntrOff) {
        let load_avg = self.load_avg;
        for &tid in &self.all {
            let thread = lookup_mut(&mut self.threads, tid);
            if !thread.is_idle() {
                thread.recent_cpu = decayed_recent_cpu(thread.recent_cpu, load_avg, thread.nice);
            }
        }
    }

    fn update_priority_all(&mut self, tok: IntrOff) {
        for &tid in &self.all {
            let thread = lookup_mut(&mut self.threads, tid);
            if !thread.is_idle() {
                let priority = mlfqs_priority(thread.recent_cpu, thread.nice);
                thread.priority = priority;
                thread.priority_base = priority;
            }
        }
        self.resort_ready(tok);
        self.validate_priority();
    }

    /// Set the current thread's nice value, clamped to `[NICE_MIN, NICE_MAX]`.
    ///
    /// Under MLFQS the thread's priority follows at once, and it yields if
    /// that leaves it outranked.
    pub fn set_nice(&mut self, nice: i32) {
        let nice = nice.clamp(NICE_MIN, NICE_MAX);
        let mlfqs = self.config.is_mlfqs();

        let is_idle = self.without_interrupts(|s, tok| {
            let cur = s.running;
            let thread = lookup_mut(&mut s.threads, cur);
            thread.nice = nice;
            let is_idle = thread.is_idle();

            if mlfqs && !is_idle {
                let priority = mlfqs_priority(thread.recent_cpu, nice);
                thread.priority = priority;
                thread.priority_base = priority;
                s.resort_ready(tok);
            }
            is_idle
        });

        if mlfqs && !is_idle {
            self.validate_priority();
        }
    }

    pub fn get_nice(&self) -> i32 {
        self.current_thread().nice
    }

    /// System load average times 100, rounded to the nearest integer.
    pub fn get_load_avg(&self) -> i32 {
        self.load_avg.mul_int(100).to_int_round()
    }

    /// The current thread's `recent_cpu` times 100, rounded.
    pub fn get_recent_cpu(&self) -> i32 {
        lookup(&self.threads, self.running).recent_cpu.mul_int(100).to_int_round()
    }

    pub fn load_avg(&self) -> Fixed {
        self.load_avg
    }
}
