//! Condition variables (Mesa semantics)
//!
//! `wait` atomically releases the caller's lock and sleeps; `signal` wakes at
//! most one waiter and `broadcast` wakes all. A signal delivered while nobody
//! waits is lost. Because the woken thread re-acquires the lock *after* the
//! signaler has run, the condition may no longer hold when `wait` returns;
//! waiters therefore always re-test in a loop.

use alloc::string::String;

use spin::Mutex;

use super::lock::Lock;
use super::wchan::WaitChannel;
use crate::process::thread::Tid;

/// Mesa-style condition variable.
pub struct Condvar {
    name: String,
    /// Guards the wait channel, closing the window between releasing the
    /// caller's lock and actually being enqueued.
    guard: Mutex<()>,
    wchan: WaitChannel,
}

impl Condvar {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            guard: Mutex::new(()),
            wchan: WaitChannel::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release `lock`, sleep until signaled, then re-acquire `lock`.
    ///
    /// The caller must hold `lock`.
    pub fn wait(&self, lock: &Lock, tid: Tid) {
        assert!(
            lock.do_i_hold(tid),
            "cv {}: wait without holding the lock",
            self.name
        );

        let held = self.guard.lock();
        lock.release(tid);
        let reacquired = self.wchan.sleep(&self.guard, held);
        drop(reacquired);
        lock.acquire(tid);
    }

    /// Wake at most one waiter. The caller must hold `lock`.
    pub fn signal(&self, lock: &Lock, tid: Tid) {
        assert!(
            lock.do_i_hold(tid),
            "cv {}: signal without holding the lock",
            self.name
        );
        let _held = self.guard.lock();
        self.wchan.wake_one();
    }

    /// Wake every waiter. The caller must hold `lock`.
    pub fn broadcast(&self, lock: &Lock, tid: Tid) {
        assert!(
            lock.do_i_hold(tid),
            "cv {}: broadcast without holding the lock",
            self.name
        );
        let _held = self.guard.lock();
        self.wchan.wake_all();
    }

    /// Whether any thread is blocked in `wait`.
    pub fn has_waiters(&self) -> bool {
        self.wchan.has_waiters()
    }
}
