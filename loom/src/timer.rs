//! # Timer Tick
//!
//! Everything the scheduler does on a timer interrupt, and the tick-based
//! time helpers built on it. The interrupt controller and the timer hardware
//! belong to the kernel; it only has to call
//! [`Scheduler::timer_interrupt`] once per tick and yield when told to.

use crate::arch::Cpu;
use crate::interrupts::IntrOff;
use crate::scheduler::{lookup_mut, Scheduler};

impl<C: Cpu> Scheduler<C> {
    /// Handle one timer tick.
    ///
    /// In order: advance the clock, charge the tick to the running thread,
    /// run the MLFQS bookkeeping, wake due sleepers. Returns true when the
    /// interrupted thread must yield on the way out of the handler, either
    /// because its time slice ran out or because something now outranks it.
    pub fn timer_interrupt(&mut self) -> bool {
        let old = self.intr_disable();
        let tok = self.intr_off();
        self.in_interrupt = true;

        self.ticks += 1;
        self.thread_tick(tok);
        if self.config.is_mlfqs() {
            self.mlfqs_tick(tok);
        }
        if self.wake(self.ticks, tok) > 0 {
            self.validate_priority();
        }

        self.in_interrupt = false;
        self.intr_set_level(old);
        core::mem::take(&mut self.yield_on_return)
    }

    /// Charge the tick to the running thread and enforce its time slice.
    fn thread_tick(&mut self, _tok: IntrOff) {
        let cur = lookup_mut(&mut self.threads, self.running);
        cur.ticks_run += 1;

        if cur.is_idle() {
            self.idle_ticks += 1;
        } else if cur.is_user() {
            self.user_ticks += 1;
        } else {
            self.kernel_ticks += 1;
        }

        self.thread_ticks += 1;
        if self.thread_ticks >= self.config.time_slice {
            self.yield_on_return = true;
        }
    }

    /// Ticks since the scheduler was created.
    pub fn timer_ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks elapsed since `then`, a value returned by [`timer_ticks`](Self::timer_ticks).
    pub fn timer_elapsed(&self, then: u64) -> u64 {
        self.ticks.saturating_sub(then)
    }

    /// Sleep for about `ticks` timer ticks. Does nothing for `ticks <= 0`.
    pub fn timer_sleep(&mut self, ticks: i64) {
        if ticks <= 0 {
            return;
        }
        let deadline = self.ticks + ticks as u64;
        self.sleep_until(deadline);
    }

    /// Log the tick accounting.
    pub fn print_stats(&self) {
        log::info!(
            "[Loom] {} idle ticks, {} kernel ticks, {} user ticks",
            self.idle_ticks,
            self.kernel_ticks,
            self.user_ticks
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SchedulerConfig;
    use crate::tests::{booted, run_ticks, spawn};
    use crate::thread::PRI_DEFAULT;

    #[test]
    fn test_slice_expiry_requests_yield() {
        let mut s = booted(SchedulerConfig::default());
        assert!(!s.timer_interrupt());
        assert!(!s.timer_interrupt());
        assert!(!s.timer_interrupt());
        assert!(s.timer_interrupt());
        assert!(!s.intr_context());
    }

    #[test]
    fn test_round_robin_among_equals() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let a = spawn(&mut s, "a", PRI_DEFAULT);
        let b = spawn(&mut s, "b", PRI_DEFAULT);

        run_ticks(&mut s, 4);
        assert_eq!(s.current(), a);
        run_ticks(&mut s, 4);
        assert_eq!(s.current(), b);
        run_ticks(&mut s, 4);
        assert_eq!(s.current(), main);
    }

    #[test]
    fn test_lower_priority_never_gets_a_slice() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let low = spawn(&mut s, "low", 10);
        run_ticks(&mut s, 40);
        assert_eq!(s.current(), main);
        assert_eq!(s.thread(low).unwrap().ticks_run(), 0);
    }

    #[test]
    fn test_tick_accounting() {
        let mut s = booted(SchedulerConfig::default());
        let t = spawn(&mut s, "user", 40);
        s.mark_user(t).unwrap();
        run_ticks(&mut s, 3);
        s.without_interrupts(|s, tok| s.block(tok)); // back to main
        run_ticks(&mut s, 2);
        s.without_interrupts(|s, tok| s.block(tok)); // to idle
        run_ticks(&mut s, 5);

        let stats = s.stats();
        assert_eq!(stats.user_ticks, 3);
        assert_eq!(stats.kernel_ticks, 2);
        assert_eq!(stats.idle_ticks, 5);
        assert_eq!(stats.ticks, 10);
        s.print_stats();
    }

    #[test]
    fn test_timer_sleep_wakes_after_duration() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let t = spawn(&mut s, "napper", 40);
        let start = s.timer_ticks();
        s.timer_sleep(3);
        assert_eq!(s.current(), main);

        run_ticks(&mut s, 2);
        assert_eq!(s.current(), main);
        // The third tick wakes the napper, which outranks main.
        run_ticks(&mut s, 1);
        assert_eq!(s.current(), t);
        assert_eq!(s.timer_elapsed(start), 3);
    }

    #[test]
    fn test_non_positive_sleep_returns_at_once() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        s.timer_sleep(0);
        s.timer_sleep(-5);
        assert_eq!(s.current(), main);
        assert_eq!(s.sleeping_threads().count(), 0);
    }
}
