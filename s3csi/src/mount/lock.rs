//! Per-path mutual exclusion for mount mutations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<PathBuf, Arc<Mutex<()>>>;

/// Serializes mount and unmount work on the same path while leaving
/// distinct paths fully parallel.
#[derive(Debug, Default, Clone)]
pub struct PathLocks {
    table: Arc<LockTable>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`.
    pub async fn lock(&self, path: &Path) -> PathGuard {
        let mutex = self
            .table
            .entry(path.to_path_buf())
            .or_default()
            .value()
            .clone();
        let guard = mutex.lock_owned().await;
        PathGuard {
            table: Arc::clone(&self.table),
            path: path.to_path_buf(),
            _guard: guard,
        }
    }

    /// Number of paths with a holder or waiter.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Exclusive hold on one path; released on drop.
#[derive(Debug)]
pub struct PathGuard {
    table: Arc<LockTable>,
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        // Two references left means the table and this guard: nobody waits.
        self.table
            .remove_if(&self.path, |_, mutex| Arc::strong_count(mutex) <= 2);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_path_is_serialized() {
        let locks = PathLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _g = locks.lock(Path::new("/staging/v1")).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.lock(Path::new("/staging/a")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(Path::new("/staging/b")))
            .await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entry_dropped_after_release() {
        let locks = PathLocks::new();
        drop(locks.lock(Path::new("/target")).await);
        assert!(locks.is_empty());
    }
}
