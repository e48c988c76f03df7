//! # Priority Donation
//!
//! A high-priority thread blocked on a lock held by a low-priority one would
//! otherwise wait behind every medium-priority thread in the system. Instead,
//! the waiter lends its priority to the holder, and along the chain of
//! holders that are themselves waiting, until the lock is released.
//!
//! Locks live in a table inside the scheduler and refer to threads by id;
//! nothing holds a pointer to a TCB. A thread's effective priority is always
//! recomputed from its base and the live priorities of its donors.
//!
//! Under MLFQS no donation happens: priorities belong to the policy engine.

use alloc::vec::Vec;

use crate::arch::Cpu;
use crate::interrupts::IntrOff;
use crate::scheduler::{lookup, lookup_mut, Scheduler};
use crate::thread::{ThreadId, ThreadState, PRI_MAX, PRI_MIN};

/// Handle to a lock in the scheduler's lock table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(pub(crate) u32);

#[derive(Debug, Default)]
pub(crate) struct LockState {
    pub(crate) holder: Option<ThreadId>,
    /// Blocked acquirers, in arrival order.
    pub(crate) waiters: Vec<ThreadId>,
}

impl<C: Cpu> Scheduler<C> {
    pub fn lock_create(&mut self) -> LockId {
        let id = LockId(self.next_lock);
        self.next_lock += 1;
        self.locks.insert(id, LockState::default());
        id
    }

    /// Remove a lock from the table.
    ///
    /// # Panics
    /// If the lock is held or has waiters.
    pub fn lock_destroy(&mut self, lock: LockId) {
        if let Some(state) = self.locks.remove(&lock) {
            assert!(
                state.holder.is_none() && state.waiters.is_empty(),
                "destroying {:?} while in use",
                lock
            );
        }
    }

    pub fn lock_holder(&self, lock: LockId) -> Option<ThreadId> {
        self.locks.get(&lock).and_then(|state| state.holder)
    }

    pub fn lock_held_by_current(&self, lock: LockId) -> bool {
        self.lock_holder(lock) == Some(self.running)
    }

    /// Take the lock if it is free. Never blocks and never donates.
    pub fn lock_try_acquire(&mut self, lock: LockId) -> bool {
        self.without_interrupts(|s, _| {
            let cur = s.running;
            let state = lock_state(&mut s.locks, lock);
            if state.holder.is_none() {
                state.holder = Some(cur);
                true
            } else {
                false
            }
        })
    }

    /// Acquire the lock, blocking while another thread holds it.
    ///
    /// A blocked acquirer donates its priority to the holder. The releaser
    /// hands the lock over directly, so the acquirer owns it when it runs
    /// again.
    ///
    /// # Panics
    /// From interrupt context, or if the current thread already holds it.
    pub fn lock_acquire(&mut self, lock: LockId) {
        assert!(!self.in_interrupt, "lock_acquire from interrupt context");

        let old = self.intr_disable();
        let tok = self.intr_off();
        let cur = self.running;

        let state = lock_state(&mut self.locks, lock);
        let holder = state.holder;
        assert!(holder != Some(cur), "thread {} already holds {:?}", cur, lock);

        match holder {
            None => state.holder = Some(cur),
            Some(holder) => {
                state.waiters.push(cur);
                lookup_mut(&mut self.threads, cur).waiting_on = Some(lock);

                if !self.config.is_mlfqs() {
                    lookup_mut(&mut self.threads, holder).donors.push(cur);
                    self.donate(lock, tok);
                }
                self.block(tok);
            }
        }

        self.intr_set_level(old);
    }

    /// Release the lock and pass it to its most urgent waiter.
    ///
    /// Donations made through this lock are withdrawn first, so the releaser
    /// may drop back to a lower priority and yield to the new holder.
    ///
    /// # Panics
    /// If the current thread does not hold the lock.
    pub fn lock_release(&mut self, lock: LockId) {
        let old = self.intr_disable();
        let tok = self.intr_off();
        let cur = self.running;

        assert!(
            self.lock_holder(lock) == Some(cur),
            "thread {} releasing {:?} it does not hold",
            cur,
            lock
        );

        if !self.config.is_mlfqs() {
            self.revoke(lock, tok);
            self.refresh_priority(cur, tok);
        }

        let threads = &self.threads;
        let state = lock_state(&mut self.locks, lock);
        let next = state
            .waiters
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, i32)>, (i, &w)| {
                let p = lookup(threads, w).priority;
                match best {
                    Some((_, bp)) if bp >= p => best,
                    _ => Some((i, p)),
                }
            })
            .map(|(i, _)| state.waiters.remove(i));
        state.holder = next;

        if let Some(next) = next {
            let remaining = state.waiters.clone();
            let thread = lookup_mut(&mut self.threads, next);
            thread.waiting_on = None;

            if !self.config.is_mlfqs() {
                thread.donors.extend(remaining);
                self.refresh_priority(next, tok);
            }
            self.make_ready(next, tok);
        }

        self.intr_set_level(old);
        self.validate_priority();
    }

    /// Propagate the current thread's priority through `lock` to its holder,
    /// and on along the chain of holders that are themselves waiting.
    ///
    /// Each holder is raised to at least the donor's priority. At most
    /// `donation_max_depth` holders are visited.
    pub fn donate(&mut self, lock: LockId, tok: IntrOff) {
        self.check_intr_off(tok);
        let mut donor = self.running;
        let mut through = Some(lock);

        for _ in 0..self.config.donation_max_depth {
            let Some(lock) = through else { break };
            let Some(holder) = self.lock_holder(lock) else { break };

            let priority = lookup(&self.threads, donor).priority;
            let thread = lookup_mut(&mut self.threads, holder);
            if thread.priority < priority {
                thread.priority = priority;
                if thread.state == ThreadState::Ready {
                    self.ready_remove(holder, tok);
                    self.ready_insert(holder, tok);
                }
            }

            through = lookup(&self.threads, holder).waiting_on;
            donor = holder;
        }
    }

    /// Drop every donor of the current thread that is waiting on `lock`.
    pub fn revoke(&mut self, lock: LockId, tok: IntrOff) {
        self.check_intr_off(tok);
        let cur = self.running;
        let donors = core::mem::take(&mut lookup_mut(&mut self.threads, cur).donors);
        let kept: Vec<ThreadId> = donors
            .into_iter()
            .filter(|&d| lookup(&self.threads, d).waiting_on != Some(lock))
            .collect();
        lookup_mut(&mut self.threads, cur).donors = kept;
    }

    /// Recompute a thread's effective priority as the maximum of its base and
    /// its donors' current priorities.
    pub fn refresh_priority(&mut self, tid: ThreadId, tok: IntrOff) {
        self.check_intr_off(tok);
        let thread = lookup(&self.threads, tid);
        let priority = thread
            .donors
            .iter()
            .map(|&d| lookup(&self.threads, d).priority)
            .fold(thread.priority_base, i32::max);

        let thread = lookup_mut(&mut self.threads, tid);
        if thread.priority == priority {
            return;
        }
        thread.priority = priority;
        if thread.state == ThreadState::Ready {
            self.ready_remove(tid, tok);
            self.ready_insert(tid, tok);
        }
    }

    /// Set the current thread's base priority. Ignored under MLFQS.
    ///
    /// # Panics
    /// If `priority` is outside `[PRI_MIN, PRI_MAX]`.
    pub fn set_priority(&mut self, priority: i32) {
        if self.config.is_mlfqs() {
            log::debug!("[Loom] set_priority({}) ignored under MLFQS", priority);
            return;
        }
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {} outside [{}, {}]",
            priority,
            PRI_MIN,
            PRI_MAX
        );

        self.without_interrupts(|s, tok| {
            let cur = s.running;
            lookup_mut(&mut s.threads, cur).priority_base = priority;
            s.refresh_priority(cur, tok);
        });
        self.validate_priority();
    }

    /// The current thread's effective priority.
    pub fn get_priority(&self) -> i32 {
        self.current_thread().priority
    }

    /// Yield if a ready thread now outranks the current one. Inside the tick
    /// handler the yield is deferred until the handler returns.
    pub fn validate_priority(&mut self) {
        let outranked = self.without_interrupts(|s, _| {
            let cur = s.current_thread();
            match s.ready_head_priority() {
                Some(head) => cur.is_idle() || cur.priority < head,
                None => false,
            }
        });

        if !outranked {
            return;
        }
        if self.in_interrupt {
            self.yield_on_return = true;
        } else {
            self.yield_current();
        }
    }
}

fn lock_state(
    locks: &mut alloc::collections::BTreeMap<LockId, LockState>,
    lock: LockId,
) -> &mut LockState {
    match locks.get_mut(&lock) {
        Some(state) => state,
        None => panic!("unknown lock {:?}", lock),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{SchedPolicy, SchedulerConfig};
    use crate::tests::{booted, spawn};
    use crate::thread::PRI_DEFAULT;

    #[test]
    fn test_uncontended_acquire_and_release() {
        let mut s = booted(SchedulerConfig::default());
        let lock = s.lock_create();
        s.lock_acquire(lock);
        assert!(s.lock_held_by_current(lock));
        s.lock_release(lock);
        assert_eq!(s.lock_holder(lock), None);
        s.lock_destroy(lock);
    }

    #[test]
    fn test_try_acquire() {
        let mut s = booted(SchedulerConfig::default());
        let lock = s.lock_create();
        assert!(s.lock_try_acquire(lock));
        let main = s.current();

        let t = spawn(&mut s, "contender", 40);
        assert!(!s.lock_try_acquire(lock));
        // No donation for a failed try.
        assert_eq!(s.thread(main).unwrap().priority(), PRI_DEFAULT);
        assert!(s.thread(main).unwrap().donors().is_empty());
        assert_eq!(s.current(), t);
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn test_release_by_non_holder_panics() {
        let mut s = booted(SchedulerConfig::default());
        let lock = s.lock_create();
        s.lock_release(lock);
    }

    #[test]
    #[should_panic(expected = "already holds")]
    fn test_recursive_acquire_panics() {
        let mut s = booted(SchedulerConfig::default());
        let lock = s.lock_create();
        s.lock_acquire(lock);
        s.lock_acquire(lock);
    }

    #[test]
    fn test_set_priority_lowers_and_yields() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let t = spawn(&mut s, "middle", 20);

        s.set_priority(10);
        assert_eq!(s.current(), t);
        assert_eq!(s.thread(main).unwrap().priority(), 10);
        assert_eq!(s.thread(main).unwrap().base_priority(), 10);
    }

    #[test]
    fn test_set_priority_keeps_donation() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let lock = s.lock_create();
        s.lock_acquire(lock);

        let d = spawn(&mut s, "donor", 40);
        s.lock_acquire(lock);
        assert_eq!(s.current(), main);
        assert_eq!(s.get_priority(), 40);

        // Lowering the base does not undercut the donation.
        s.set_priority(5);
        assert_eq!(s.get_priority(), 40);
        assert_eq!(s.current_thread().base_priority(), 5);

        s.lock_release(lock);
        assert_eq!(s.current(), d);
        assert_eq!(s.thread(main).unwrap().priority(), 5);
    }

    #[test]
    fn test_highest_waiter_gets_the_lock_and_others_keep_donating() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let lock = s.lock_create();
        s.lock_acquire(lock);

        let a = spawn(&mut s, "a", 35);
        s.lock_acquire(lock);
        let b = spawn(&mut s, "b", 45);
        s.lock_acquire(lock);
        assert_eq!(s.current(), main);
        assert_eq!(s.get_priority(), 45);

        s.lock_release(lock);
        assert_eq!(s.current(), b);
        assert_eq!(s.lock_holder(lock), Some(b));
        assert_eq!(s.thread(main).unwrap().priority(), PRI_DEFAULT);
        assert_eq!(s.current_thread().donors(), &[a]);
        assert_eq!(s.thread(a).unwrap().waiting_on(), Some(lock));

        s.lock_release(lock);
        assert_eq!(s.lock_holder(lock), Some(a));
        assert!(s.thread(b).unwrap().donors().is_empty());
    }

    #[test]
    fn test_donation_repositions_ready_holder() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let lock = s.lock_create();

        // Low takes the lock, then lets main run again.
        let low = spawn(&mut s, "low", 40);
        s.lock_acquire(lock);
        s.set_priority(10);
        assert_eq!(s.current(), main);

        let mid = spawn(&mut s, "mid", 20);
        let high = spawn(&mut s, "high", 50);
        assert_eq!(s.current(), high);
        s.lock_acquire(lock);

        // low (now 50) was moved ahead of main and mid, and runs next.
        assert_eq!(s.current(), low);
        assert_eq!(s.get_priority(), 50);
        assert_eq!(s.ready_threads().collect::<Vec<_>>(), vec![main, mid]);
    }

    #[test]
    #[should_panic(expected = "token used with interrupts enabled")]
    fn test_refresh_rejects_a_stale_token() {
        let mut s = booted(SchedulerConfig::default());
        let main = s.current();
        let tok = s.without_interrupts(|_, tok| tok);
        s.refresh_priority(main, tok);
    }

    #[test]
    fn test_mlfqs_ignores_priority_and_donation() {
        let mut s = booted(SchedulerConfig::default().with_policy(SchedPolicy::Mlfqs));
        s.set_priority(5);
        assert_eq!(s.get_priority(), PRI_DEFAULT);

        let main = s.current();
        let lock = s.lock_create();
        s.lock_acquire(lock);
        let t = spawn(&mut s, "waiter", 40);
        s.lock_acquire(lock);
        assert_eq!(s.current(), main);
        assert_eq!(s.get_priority(), PRI_DEFAULT);
        assert!(s.current_thread().donors().is_empty());

        s.lock_release(lock);
        assert_eq!(s.lock_holder(lock), Some(t));
        assert_eq!(s.current(), t);
    }
}
