//! In-process guard against overlapping pipeline runs.

use std::thread::{self, ThreadId};

use parking_lot::Mutex;

/// Non-blocking run flag. Holds the owning thread while a run is active.
#[derive(Debug, Default)]
pub struct RunLock {
    owner: Mutex<Option<ThreadId>>,
}

/// Releases the lock when dropped, on every exit path including unwinding.
#[derive(Debug)]
#[must_use = "the run lock is released as soon as the guard is dropped"]
pub struct RunLockGuard<'a> {
    lock: &'a RunLock,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` immediately if a run is already active.
    pub fn try_acquire(&self) -> Option<RunLockGuard<'_>> {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return None;
        }
        *owner = Some(thread::current().id());
        Some(RunLockGuard { lock: self })
    }

    pub fn is_held(&self) -> bool {
        self.owner.lock().is_some()
    }

    pub fn owner(&self) -> Option<ThreadId> {
        *self.owner.lock()
    }

    fn release(&self) {
        *self.owner.lock() = None;
    }
}

impl RunLockGuard<'_> {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RunLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let lock = RunLock::new();
        let guard = lock.try_acquire().expect("first acquire");
        assert!(lock.is_held());
        assert_eq!(lock.owner(), Some(thread::current().id()));
        assert!(lock.try_acquire().is_none());

        guard.release();
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn exactly_one_concurrent_acquire_wins() {
        let lock = Arc::new(RunLock::new());
        let barrier = Arc::new(Barrier::new(8));
        let wins = Arc::new(Mutex::new(0usize));
        let release = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                let barrier = barrier.clone();
                let release = release.clone();
                let wins = wins.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let guard = lock.try_acquire();
                    if guard.is_some() {
                        *wins.lock() += 1;
                    }
                    // keep the winner's guard alive until every thread has tried
                    release.wait();
                    drop(guard);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*wins.lock(), 1);
        assert!(!lock.is_held());
    }

    #[test]
    fn released_when_holder_panics() {
        let lock = Arc::new(RunLock::new());
        let inner = lock.clone();
        let result = thread::spawn(move || {
            let _guard = inner.try_acquire().unwrap();
            panic!("stage blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(lock.try_acquire().is_some());
    }
}
