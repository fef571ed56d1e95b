//! Counting semaphore
//!
//! The count never goes negative and no ordering of waiters is promised: a
//! thread may slip through `P` ahead of older sleepers. A spinlock guards the
//! count and doubles as the wait channel's sleep guard.

use alloc::string::String;

use spin::Mutex;

use super::wchan::WaitChannel;

/// Counting semaphore.
pub struct Semaphore {
    name: String,
    count: Mutex<usize>,
    wchan: WaitChannel,
}

impl Semaphore {
    pub fn new(name: &str, initial_count: usize) -> Self {
        Self {
            name: String::from(name),
            count: Mutex::new(initial_count),
            wchan: WaitChannel::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// P (wait): decrement the count, sleeping while it is zero.
    ///
    /// Must not be called where sleeping is illegal (interrupt context).
    pub fn p(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            count = self.wchan.sleep(&self.count, count);
        }
        debug_assert!(*count > 0);
        *count -= 1;
    }

    /// Try to P without sleeping. Returns whether the count was taken.
    pub fn try_p(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// V (signal): increment the count and wake at most one waiter.
    pub fn v(&self) {
        let mut count = self.count.lock();
        *count += 1;
        debug_assert!(*count > 0);
        self.wchan.wake_one();
    }

    /// Current count. Advisory only; it may change before the caller acts.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_nonblocking_path() {
        let sem = Semaphore::new("t", 2);
        sem.p();
        sem.p();
        assert_eq!(sem.count(), 0);
        assert!(!sem.try_p());
        sem.v();
        assert_eq!(sem.count(), 1);
        assert!(sem.try_p());
    }

    #[test]
    fn test_p_blocks_until_v() {
        let sem = Arc::new(Semaphore::new("gate", 0));
        let passed = Arc::new(AtomicUsize::new(0));

        let sem2 = Arc::clone(&sem);
        let passed2 = Arc::clone(&passed);
        let waiter = thread::spawn(move || {
            sem2.p();
            passed2.fetch_add(1, Ordering::SeqCst);
        });

        // The waiter cannot pass until someone Vs.
        assert_eq!(passed.load(Ordering::SeqCst), 0);
        sem.v();
        waiter.join().unwrap();
        assert_eq!(passed.load(Ordering::SeqCst), 1);
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_semaphore_as_mutex_counts_correctly() {
        let sem = Arc::new(Semaphore::new("mutex", 1));
        let shared = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let sem = Arc::clone(&sem);
            let shared = Arc::clone(&shared);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    sem.p();
                    shared.fetch_add(1, Ordering::Relaxed);
                    sem.v();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(shared.load(Ordering::SeqCst), 400);
        assert_eq!(sem.count(), 1);
    }
}
