//! # Alarm Clock
//!
//! Timed sleep without busy waiting. A sleeping thread sits in the sleep
//! registry, ordered by deadline, and the tick handler wakes the due prefix.

use crate::arch::Cpu;
use crate::interrupts::IntrOff;
use crate::scheduler::{lookup, lookup_mut, Scheduler};
use crate::thread::{ThreadId, ThreadState};

impl<C: Cpu> Scheduler<C> {
    /// Block the current thread until the tick counter reaches `deadline`.
    ///
    /// Runs with interrupts masked and restores the caller's level when the
    /// thread is woken.
    ///
    /// # Panics
    /// If called by the idle thread.
    pub fn sleep_until(&mut self, deadline: u64) {
        let old = self.intr_disable();
        let tok = self.intr_off();

        let cur = self.running;
        let thread = lookup_mut(&mut self.threads, cur);
        assert!(!thread.is_idle(), "the idle thread cannot sleep");
        assert!(thread.state == ThreadState::Running, "only the running thread can sleep");
        thread.wake_tick = Some(deadline);

        self.sleep_insert(cur, deadline, tok);
        self.block(tok);

        self.intr_set_level(old);
    }

    /// Insert behind every sleeper with the same or an earlier deadline.
    fn sleep_insert(&mut self, tid: ThreadId, deadline: u64, tok: IntrOff) {
        self.check_intr_off(tok);
        let threads = &self.threads;
        let pos = self
            .sleeping
            .iter()
            .position(|&other| lookup(threads, other).wake_tick.map_or(false, |w| w > deadline))
            .unwrap_or(self.sleeping.len());
        self.sleeping.insert(pos, tid);
    }

    /// Wake every sleeper whose deadline is at or before `now`, earliest
    /// first. Returns how many were woken.
    ///
    /// Stops at the first sleeper still in the future: the registry is
    /// ordered, so nobody behind it is due either.
    pub fn wake(&mut self, now: u64, tok: IntrOff) -> usize {
        self.check_intr_off(tok);
        let mut woken = 0;

        while let Some(&tid) = self.sleeping.front() {
            let thread = lookup_mut(&mut self.threads, tid);
            match thread.wake_tick {
                Some(deadline) if deadline > now => break,
                _ => thread.wake_tick = None,
            }

            self.sleeping.pop_front();
            self.make_ready(tid, tok);
            woken += 1;
        }

        if woken > 0 {
            log::trace!("[Loom] tick {}: woke {} sleeper(s)", now, woken);
        }
        woken
    }
}
