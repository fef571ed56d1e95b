//! Mutual-exclusion lock
//!
//! A blocking lock built from a binary semaphore plus an owner field. The
//! caller identifies itself with its thread id, which is what makes
//! [`Lock::do_i_hold`] and the release-by-owner rule checkable. Releasing a
//! lock one does not hold is a no-op.

use alloc::string::String;

use spin::Mutex;

use super::semaphore::Semaphore;
use crate::process::thread::Tid;

/// Owner-tracked mutual-exclusion lock.
///
/// Invariant: the owner field is `Some` exactly while some thread holds the
/// lock.
pub struct Lock {
    name: String,
    sem: Semaphore,
    owner: Mutex<Option<Tid>>,
}

impl Lock {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            sem: Semaphore::new(name, 1),
            owner: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the lock, sleeping until it is free.
    pub fn acquire(&self, tid: Tid) {
        debug_assert!(!self.do_i_hold(tid), "lock {} acquired twice", self.name);
        self.sem.p();
        *self.owner.lock() = Some(tid);
    }

    /// Release the lock. Only the owner may release; any other caller's
    /// release is ignored.
    pub fn release(&self, tid: Tid) {
        let mut owner = self.owner.lock();
        if *owner == Some(tid) {
            *owner = None;
            drop(owner);
            self.sem.v();
        }
    }

    /// Whether the calling thread owns the lock.
    pub fn do_i_hold(&self, tid: Tid) -> bool {
        *self.owner.lock() == Some(tid)
    }

    /// Whether any thread owns the lock.
    pub fn is_held(&self) -> bool {
        self.owner.lock().is_some()
    }
}
