//! Wait channels
//!
//! The sleeping substrate under the blocking primitives. A waiter enqueues
//! itself *while still holding the spinlock that guards the decision to
//! sleep*, then releases that lock and suspends; because wakers take the same
//! spinlock before calling [`WaitChannel::wake_one`], no wakeup can slip into
//! the gap. In this kernel suspension is modeled by spinning on a per-waiter
//! token, which keeps the primitive usable from ordinary host threads.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Mutex, MutexGuard};

/// A channel threads sleep on while waiting for a condition.
pub struct WaitChannel {
    waiters: Mutex<VecDeque<Arc<AtomicBool>>>,
}

impl Default for WaitChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitChannel {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Go to sleep, atomically releasing `guard` (the caller's spinlock
    /// guard, taken from `lock`). Returns with the spinlock re-acquired.
    ///
    /// The caller re-tests its condition after this returns; a wakeup only
    /// means "look again".
    pub fn sleep<'a, T>(&self, lock: &'a Mutex<T>, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let token = Arc::new(AtomicBool::new(false));
        self.waiters.lock().push_back(Arc::clone(&token));

        // The token is enqueued; now it is safe to let wakers run.
        drop(guard);

        while !token.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }

        lock.lock()
    }

    /// Wake one waiter, if any. The caller must hold the spinlock that
    /// guards the sleep decision.
    pub fn wake_one(&self) {
        if let Some(token) = self.waiters.lock().pop_front() {
            token.store(true, Ordering::Release);
        }
    }

    /// Wake every waiter. Same locking requirement as [`WaitChannel::wake_one`].
    pub fn wake_all(&self) {
        let drained: VecDeque<_> = core::mem::take(&mut *self.waiters.lock());
        for token in drained {
            token.store(true, Ordering::Release);
        }
    }

    /// Whether any thread is currently asleep on this channel.
    pub fn has_waiters(&self) -> bool {
        !self.waiters.lock().is_empty()
    }
}
