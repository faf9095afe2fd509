// pool.rs - Reuse of per-invocation buffer sets across scale passes.
//
// A multi-scale run often repeats the same radius at the same working
// resolution. Allocating and freeing the full buffer set every time costs
// device allocations plus a neighbor-array upload that produces identical
// bytes. The pool keeps released sets keyed by (radius, width, height):
//
//   acquire(key)   pop a matching set, or allocate a fresh one
//   lease drop     if the invocation committed, push the set back;
//                  otherwise the set is dropped and its memory released
//
// A set is always owned by exactly one lease while in use, so two
// invocations never share buffers. The pool is bounded: when full, the
// oldest idle set is evicted (dropped) to make room. Capacity 0 turns the
// pool off and every invocation allocates and releases its own set.
//
// Results do not depend on pooling. Every stage fully overwrites its output
// field, the image is uploaded on every invocation, and the neighbor arrays
// are only skipped when the resident radius matches.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use tracing::{debug, trace};

use crate::error::Result;

/// Identity of a reusable buffer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub radius: u32,
    pub width: usize,
    pub height: usize,
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r={} {}×{}", self.radius, self.width, self.height)
    }
}

/// Counters for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sets handed out from the pool.
    pub hits: u64,
    /// Sets allocated because no idle match existed.
    pub misses: u64,
    /// Idle sets dropped to respect capacity.
    pub evictions: u64,
}

struct PoolInner<B> {
    idle: VecDeque<(PoolKey, B)>,
    stats: PoolStats,
}

/// Bounded, keyed pool of idle buffer sets.
pub struct BufferPool<B> {
    capacity: usize,
    inner: Mutex<PoolInner<B>>,
}

impl<B> BufferPool<B> {
    pub fn new(capacity: usize) -> Self {
        BufferPool {
            capacity,
            inner: Mutex::new(PoolInner { idle: VecDeque::new(), stats: PoolStats::default() }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of idle sets currently held.
    pub fn idle_len(&self) -> usize {
        self.lock().idle.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }

    /// Drop every idle set.
    pub fn clear(&self) {
        self.lock().idle.clear();
    }

    /// Take an idle set for `key`, or build one with `alloc`.
    ///
    /// The returned lease owns the set exclusively. Call [`Lease::commit`]
    /// once the invocation succeeded to make the set reusable.
    pub fn acquire<F>(&self, key: PoolKey, alloc: F) -> Result<Lease<'_, B>>
    where
        F: FnOnce() -> Result<B>,
    {
        let reused = {
            let mut inner = self.lock();
            let found = inner.idle.iter().position(|(k, _)| *k == key);
            let taken = found.and_then(|i| inner.idle.remove(i)).map(|(_, b)| b);
            if taken.is_some() {
                inner.stats.hits += 1;
            } else {
                inner.stats.misses += 1;
            }
            taken
        };

        let buffers = match reused {
            Some(b) => {
                trace!(%key, "pool: reusing idle buffer set");
                b
            }
            None => {
                trace!(%key, "pool: allocating buffer set");
                alloc()?
            }
        };

        Ok(Lease { pool: self, key, buffers: Some(buffers), committed: false })
    }

    fn release(&self, key: PoolKey, buffers: B) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.lock();
        while inner.idle.len() >= self.capacity {
            if let Some((old, _)) = inner.idle.pop_front() {
                debug!(key = %old, "pool: evicting idle buffer set");
                inner.stats.evictions += 1;
            }
        }
        inner.idle.push_back((key, buffers));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner<B>> {
        // A poisoned pool only means another invocation panicked while
        // holding the lock; the idle list itself is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive ownership of one buffer set for the duration of an invocation.
pub struct Lease<'p, B> {
    pool: &'p BufferPool<B>,
    key: PoolKey,
    buffers: Option<B>,
    committed: bool,
}

impl<B> Lease<'_, B> {
    pub fn key(&self) -> PoolKey {
        self.key
    }

    /// Mark the invocation successful; the set returns to the pool on drop.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

impl<B> Deref for Lease<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        // `buffers` is only taken in `drop`.
        self.buffers.as_ref().unwrap_or_else(|| unreachable!("lease used after drop"))
    }
}

impl<B> DerefMut for Lease<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.buffers.as_mut().unwrap_or_else(|| unreachable!("lease used after drop"))
    }
}

impl<B> Drop for Lease<'_, B> {
    fn drop(&mut self) {
        if let Some(buffers) = self.buffers.take() {
            if self.committed {
                self.pool.release(self.key, buffers);
            } else {
                trace!(key = %self.key, "pool: releasing uncommitted buffer set");
            }
        }
    }
}
