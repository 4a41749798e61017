//! Per-identity mutual exclusion for ingestion.
//!
//! Two ingestions of the same content hash must not interleave their
//! file placement and row writes. Ingestions of different hashes never
//! block each other.

use crate::hash::ContentId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;

/// Set of content ids currently held by some ingestion.
#[derive(Debug, Default)]
pub struct IdentityLocks {
    held: Mutex<HashSet<ContentId>>,
    released: Condvar,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `id` is free, then holds it until the guard drops.
    pub fn acquire(&self, id: &ContentId) -> IdentityGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(id) {
            self.released.wait(&mut held);
        }
        held.insert(id.clone());
        IdentityGuard {
            locks: self,
            id: id.clone(),
        }
    }

    pub fn is_held(&self, id: &ContentId) -> bool {
        self.held.lock().contains(id)
    }
}

/// Releases its identity on drop.
#[derive(Debug)]
pub struct IdentityGuard<'a> {
    locks: &'a IdentityLocks,
    id: ContentId,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.id);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::IdentityLocks;
    use crate::hash::ContentId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn guard_releases_on_drop() {
        let locks = IdentityLocks::new();
        let a = ContentId::of_bytes(b"a");
        let b = ContentId::of_bytes(b"b");
        {
            let _guard = locks.acquire(&a);
            assert!(locks.is_held(&a));
            assert!(!locks.is_held(&b));
        }
        assert!(!locks.is_held(&a));
    }

    #[test]
    fn distinct_identities_do_not_block() {
        let locks = IdentityLocks::new();
        let a = ContentId::of_bytes(b"a");
        let b = ContentId::of_bytes(b"b");
        let _first = locks.acquire(&a);
        let _second = locks.acquire(&b);
        assert!(locks.is_held(&a) && locks.is_held(&b));
    }

    #[test]
    fn same_identity_is_serialized() {
        let locks = Arc::new(IdentityLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let id = ContentId::of_bytes(b"same");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                let id = id.clone();
                thread::spawn(move || {
                    let _guard = locks.acquire(&id);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread");
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
