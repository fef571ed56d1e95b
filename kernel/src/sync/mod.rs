//! Blocking synchronization primitives
//!
//! Three classic primitives built on a wait channel: a counting
//! [`semaphore::Semaphore`], an owner-tracked [`lock::Lock`], and a Mesa
//! [`condvar::Condvar`]. Spinlocks (`spin::Mutex`) guard only the internal
//! state of these primitives and other short critical sections; anything
//! that may sleep takes one of the blocking primitives instead.

pub mod condvar;
pub mod lock;
pub mod semaphore;
pub mod wchan;

pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;
pub use wchan::WaitChannel;
