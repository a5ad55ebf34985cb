//! Fixed-capacity pool of client identities
//!
//! Each connected client is known to the server by a small positive integer.
//! Identities come from a pool of `max_clients` slots; a slot is claimed with a
//! compare-and-swap so concurrent accepts can never receive the same identity,
//! and it becomes available again as soon as it is released.

use std::sync::atomic::{AtomicBool, Ordering};

/// Identity assigned by the server to a connected client (starts at 1)
pub type ClientId = u32;

/// Lock-free slot allocator producing [`ClientId`]s
///
/// # Examples
///
/// ```
/// use simple_networking::io::IdentityPool;
///
/// let pool = IdentityPool::new(2);
/// let a = pool.acquire().unwrap();
/// let b = pool.acquire().unwrap();
/// assert_ne!(a, b);
/// assert!(pool.acquire().is_none());
///
/// pool.release(a);
/// assert_eq!(pool.acquire(), Some(a));
/// ```
#[derive(Debug)]
pub struct IdentityPool {
    slots: Box<[AtomicBool]>,
}

impl IdentityPool {
    /// Create a pool with `capacity` free slots
    pub fn new(capacity: usize) -> Self {
        IdentityPool {
            slots: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Number of slots in the pool
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the lowest free identity
    ///
    /// # Returns
    /// `None` when every slot is busy
    pub fn acquire(&self) -> Option<ClientId> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| index as ClientId + 1)
        })
    }

    /// Return an identity to the pool
    ///
    /// Releasing a free or out-of-range identity is a no-op.
    ///
    /// # Returns
    /// `true` if the identity was busy before this call
    pub fn release(&self, id: ClientId) -> bool {
        match self.slot(id) {
            Some(slot) => slot.swap(false, Ordering::AcqRel),
            None => false,
        }
    }

    /// Whether `id` is currently assigned
    pub fn is_acquired(&self, id: ClientId) -> bool {
        self.slot(id)
            .map(|slot| slot.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Number of identities currently assigned
    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire))
            .count()
    }

    fn slot(&self, id: ClientId) -> Option<&AtomicBool> {
        let index = (id as usize).checked_sub(1)?;
        self.slots.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_capacity_exhaustion() {
        let pool = IdentityPool::new(3);
        let ids: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(pool.acquire(), None);
        assert_eq!(pool.in_use(), 3);
    }

    #[test]
    fn test_release_allows_exactly_one_more() {
        let pool = IdentityPool::new(3);
        for _ in 0..3 {
            pool.acquire().unwrap();
        }

        assert!(pool.release(2));
        assert_eq!(pool.acquire(), Some(2));
        assert_eq!(pool.acquire(), None);
    }

    #[test]
    fn test_release_is_idempotent() {
        let pool = IdentityPool::new(2);
        let id = pool.acquire().unwrap();

        assert!(pool.release(id));
        assert!(!pool.release(id));
        assert!(!pool.is_acquired(id));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_out_of_range_ids() {
        let pool = IdentityPool::new(1);
        assert!(!pool.release(0));
        assert!(!pool.release(2));
        assert!(!pool.is_acquired(0));
    }

    #[test]
    fn test_zero_capacity() {
        let pool = IdentityPool::new(0);
        assert_eq!(pool.acquire(), None);
    }

    #[test]
    fn test_concurrent_acquire_never_duplicates() {
        let pool = Arc::new(IdentityPool::new(64));
        let claimed = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let claimed = claimed.clone();
                std::thread::spawn(move || {
                    while let Some(id) = pool.acquire() {
                        claimed.lock().unwrap().push(id);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let claimed = claimed.lock().unwrap();
        let unique: HashSet<_> = claimed.iter().copied().collect();
        assert_eq!(claimed.len(), 64);
        assert_eq!(unique.len(), 64);
    }
}
