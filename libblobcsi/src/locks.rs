//! Per-volume mutual exclusion for stage/unstage.
//!
//! Acquisition is try-only: a second operation on a volume that is already
//! being staged or unstaged fails immediately and the caller retries. No
//! waiters are queued.

use dashmap::DashSet;

/// Set of volume IDs with an operation in flight.
#[derive(Debug, Default)]
pub struct VolumeLockTable {
    held: DashSet<String>,
}

impl VolumeLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `volume_id` as busy. Returns `false` if it already was.
    pub fn try_acquire(&self, volume_id: &str) -> bool {
        self.held.insert(volume_id.to_owned())
    }

    pub fn release(&self, volume_id: &str) {
        self.held.remove(volume_id);
    }

    /// Like [`Self::try_acquire`], but the lock is released when the returned
    /// guard drops.
    pub fn try_lock<'a>(&'a self, volume_id: &str) -> Option<VolumeLockGuard<'a>> {
        self.try_acquire(volume_id).then(|| VolumeLockGuard {
            table: self,
            volume_id: volume_id.to_owned(),
        })
    }

    pub fn is_held(&self, volume_id: &str) -> bool {
        self.held.contains(volume_id)
    }
}

/// Releases its volume lock on drop.
#[derive(Debug)]
pub struct VolumeLockGuard<'a> {
    table: &'a VolumeLockTable,
    volume_id: String,
}

impl Drop for VolumeLockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.volume_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn acquire_release_acquire() {
        let table = VolumeLockTable::new();
        assert!(table.try_acquire("vol-1"));
        assert!(!table.try_acquire("vol-1"));
        table.release("vol-1");
        assert!(table.try_acquire("vol-1"));
    }

    #[test]
    fn distinct_ids_do_not_contend() {
        let table = VolumeLockTable::new();
        assert!(table.try_acquire("vol-1"));
        assert!(table.try_acquire("vol-2"));
    }

    #[test]
    fn guard_releases_on_drop() {
        let table = VolumeLockTable::new();
        {
            let _guard = table.try_lock("vol-1").expect("first lock");
            assert!(table.is_held("vol-1"));
            assert!(table.try_lock("vol-1").is_none());
        }
        assert!(!table.is_held("vol-1"));
        assert!(table.try_lock("vol-1").is_some());
    }

    #[test]
    fn concurrent_acquire_has_one_winner() {
        const WORKERS: usize = 16;
        for _ in 0..50 {
            let table = Arc::new(VolumeLockTable::new());
            let barrier = Arc::new(Barrier::new(WORKERS));
            let winners = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..WORKERS)
                .map(|_| {
                    let table = Arc::clone(&table);
                    let barrier = Arc::clone(&barrier);
                    let winners = Arc::clone(&winners);
                    std::thread::spawn(move || {
                        barrier.wait();
                        if table.try_acquire("shared") {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(winners.load(Ordering::SeqCst), 1);
            table.release("shared");
            assert!(table.try_acquire("shared"));
        }
    }
}
