//! Per-path mutual exclusion for shared destination directories.
//!
//! Each directory gets its own mutex, created on first use. Workers touching
//! different directories never contend; workers touching the same one are
//! serialized through directory creation, the move, and any conflict merge.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lazily-populated map of path -> mutex
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutex guarding `path`; the same path always yields the same mutex
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(path.to_path_buf()).or_default().value())
    }

    /// Number of distinct paths seen so far
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Acquire a guard, recovering from a poisoned mutex.
///
/// A worker that panicked mid-operation must not block its siblings.
pub fn acquire<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_path_shares_one_mutex() {
        let locks = PathLocks::new();
        let a = locks.lock_for(Path::new("/dest/A"));
        let b = locks.lock_for(Path::new("/dest/A"));
        let c = locks.lock_for(Path::new("/dest/B"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_guard_serializes_workers() {
        let locks = Arc::new(PathLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    let lock = locks.lock_for(Path::new("/dest/shared"));
                    let _guard = acquire(&lock);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let lock = Arc::new(Mutex::new(()));
        let poisoner = Arc::clone(&lock);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("worker fault");
        })
        .join();

        assert!(lock.is_poisoned());
        let _guard = acquire(&lock);
    }
}
