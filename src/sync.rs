//! Recursive mutex for serializing access to a sparse virtual file
//!
//! The cache itself is not internally synchronized: within one file every
//! operation runs to completion on the calling thread. Embedders that share
//! a file between threads acquire a [`RecursiveMutex`] around each public
//! operation. The lock is reentrant so an entry point that already holds it
//! may call back into another entry point on the same thread.
//!
//! When a container and its files are locked separately, take the container
//! lock first and never hold one file's lock while acquiring another's.

use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Debug)]
struct LockState {
    owner: Option<ThreadId>,
    count: u32,
}

/// A mutual-exclusion lock that the owning thread may re-acquire.
#[derive(Debug)]
pub struct RecursiveMutex {
    state: Mutex<LockState>,
    condvar: Condvar,
}

impl RecursiveMutex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                owner: None,
                count: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Block until the lock is held by the calling thread.
    pub fn lock(&self) -> RecursiveMutexGuard<'_> {
        let tid = thread::current().id();
        let mut guard = self.state.lock().unwrap();
        loop {
            match guard.owner {
                None => {
                    guard.owner = Some(tid);
                    guard.count = 1;
                    break;
                }
                Some(owner) if owner == tid => {
                    guard.count += 1;
                    break;
                }
                _ => {
                    guard = self.condvar.wait(guard).unwrap();
                }
            }
        }
        RecursiveMutexGuard { mutex: self }
    }

    /// Acquire the lock only if that is possible without blocking.
    pub fn try_lock(&self) -> Option<RecursiveMutexGuard<'_>> {
        let tid = thread::current().id();
        let mut guard = self.state.lock().unwrap();
        match guard.owner {
            None => {
                guard.owner = Some(tid);
                guard.count = 1;
                Some(RecursiveMutexGuard { mutex: self })
            }
            Some(owner) if owner == tid => {
                guard.count += 1;
                Some(RecursiveMutexGuard { mutex: self })
            }
            _ => None,
        }
    }

    /// Is the lock held by the calling thread?
    pub fn held(&self) -> bool {
        self.state.lock().unwrap().owner == Some(thread::current().id())
    }

    fn unlock(&self) {
        let tid = thread::current().id();
        let mut guard = self.state.lock().unwrap();
        if guard.owner == Some(tid) {
            guard.count = guard.count.saturating_sub(1);
            if guard.count == 0 {
                guard.owner = None;
                self.condvar.notify_one();
            }
        }
    }
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by [`RecursiveMutex::lock`]; releases one level of
/// ownership on drop.
#[derive(Debug)]
pub struct RecursiveMutexGuard<'a> {
    mutex: &'a RecursiveMutex,
}

impl Drop for RecursiveMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
