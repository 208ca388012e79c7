//! Bounded object pool for reusable per-element state.
//!
//! Idle objects live in a lock-free array-backed queue, so acquire and
//! release never take a mutex. The pool never blocks and never fails: an empty
//! pool constructs a fresh object, a full pool drops the returned one.

use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Types that can be returned to a pool and handed to a new owner
pub trait Poolable {
    /// Clear all state left by the previous owner
    fn reset(&mut self);
}

/// Pool usage counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStats {
    /// Idle objects currently held
    pub size: usize,
    pub max_size: usize,
    pub acquires: u64,
    pub releases: u64,
    pub creates: u64,
    /// Releases dropped because the pool was full
    pub discards: u64,
    /// Fraction of acquires served from the pool
    pub hit_rate: f64,
}

/// Thread-safe bounded pool
pub struct ObjectPool<T> {
    slots: ArrayQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    acquires: AtomicU64,
    hits: AtomicU64,
    releases: AtomicU64,
    creates: AtomicU64,
    discards: AtomicU64,
}

impl<T: Poolable> ObjectPool<T> {
    /// Create a pool holding at most `max_size` idle objects (at least one)
    pub fn new<F>(max_size: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            slots: ArrayQueue::new(max_size.max(1)),
            factory: Box::new(factory),
            acquires: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            creates: AtomicU64::new(0),
            discards: AtomicU64::new(0),
        }
    }

    /// Take an idle object, or construct one if none is available
    pub fn acquire(&self) -> T {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        match self.slots.pop() {
            Some(obj) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                obj
            }
            None => {
                self.creates.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        }
    }

    /// Reset an object and return it to the pool.
    ///
    /// Returns `false` when the pool is full and the object was dropped.
    pub fn release(&self, mut obj: T) -> bool {
        obj.reset();
        match self.slots.push(obj) {
            Ok(()) => {
                self.releases.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_dropped) => {
                self.discards.fetch_add(1, Ordering::Relaxed);
                trace!("Pool at capacity, discarding released object");
                false
            }
        }
    }

    /// Construct up to `count` objects ahead of time. Returns how many were added.
    pub fn prefill(&self, count: usize) -> usize {
        let mut added = 0;
        for _ in 0..count {
            if self.slots.is_full() {
                break;
            }
            self.creates.fetch_add(1, Ordering::Relaxed);
            if self.slots.push((self.factory)()).is_err() {
                break;
            }
            added += 1;
        }
        added
    }

    /// Drop every idle object
    pub fn clear(&self) {
        while self.slots.pop().is_some() {}
    }

    /// Number of idle objects
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn max_size(&self) -> usize {
        self.slots.capacity()
    }

    pub fn stats(&self) -> PoolStats {
        let acquires = self.acquires.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        PoolStats {
            size: self.size(),
            max_size: self.max_size(),
            acquires,
            releases: self.releases.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
            hit_rate: if acquires == 0 {
                0.0
            } else {
                hits as f64 / acquires as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Scratch {
        values: Vec<u32>,
        resets: u32,
    }

    impl Poolable for Scratch {
        fn reset(&mut self) {
            self.values.clear();
            self.resets += 1;
        }
    }

    fn scratch_pool(max_size: usize) -> ObjectPool<Scratch> {
        ObjectPool::new(max_size, Scratch::default)
    }

    #[test]
    fn test_acquire_from_empty_pool_creates() {
        let pool = scratch_pool(4);
        let _obj = pool.acquire();

        let stats = pool.stats();
        assert_eq!(stats.acquires, 1);
        assert_eq!(stats.creates, 1);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_release_resets_before_reuse() {
        let pool = scratch_pool(4);
        let mut obj = pool.acquire();
        obj.values.extend([1, 2, 3]);

        assert!(pool.release(obj));

        let reused = pool.acquire();
        assert!(reused.values.is_empty());
        assert_eq!(reused.resets, 1);
        assert_eq!(pool.stats().hit_rate, 0.5);
    }

    #[test]
    fn test_release_into_full_pool_discards() {
        let pool = scratch_pool(1);
        assert!(pool.release(Scratch::default()));
        assert!(!pool.release(Scratch::default()));

        let stats = pool.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.discards, 1);
    }

    #[test]
    fn test_prefill_stops_at_capacity() {
        let pool = scratch_pool(3);
        assert_eq!(pool.prefill(10), 3);
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.stats().creates, 3);

        let _obj = pool.acquire();
        assert_eq!(pool.stats().creates, 3);
    }

    #[test]
    fn test_clear_empties_pool() {
        let pool = scratch_pool(3);
        pool.prefill(3);
        pool.clear();
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let pool = scratch_pool(0);
        assert_eq!(pool.max_size(), 1);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = Arc::new(scratch_pool(16));
        pool.prefill(8);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for i in 0..1_000 {
                        let mut obj = pool.acquire();
                        assert!(obj.values.is_empty());
                        obj.values.push(i);
                        pool.release(obj);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.acquires, 4_000);
        assert!(stats.size <= 16);
        assert_eq!(stats.releases + stats.discards, 4_000);
    }
}
