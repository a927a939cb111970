// Copyright 2025-2026 CEMAXECUTER LLC

//! Reference-counted buffer pool.
//!
//! A producer takes an exclusive [`Pooled`] buffer, fills it, then turns it
//! into a read-only [`Shared`] handle with [`Pooled::share`]. Cloning a
//! `Shared` adds a holder; the storage goes back to the pool's free list
//! exactly when the last holder drops it. Nothing in the pipeline frees
//! buffers by hand.

use crossbeam::queue::SegQueue;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

struct PoolInner<T> {
    free: SegQueue<T>,
    max_idle: usize,
    allocated: AtomicUsize,
    outstanding: AtomicUsize,
    recycled: AtomicUsize,
}

impl<T> PoolInner<T> {
    fn release(&self, value: T) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.recycled.fetch_add(1, Ordering::Relaxed);
        if self.free.len() < self.max_idle {
            self.free.push(value);
        }
    }
}

/// Pool of reusable `T` buffers. Cloning the pool clones the handle, not the storage.
pub struct BufferPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Default> Default for BufferPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> BufferPool<T> {
    pub fn new() -> Self {
        Self::with_max_idle(usize::MAX)
    }

    /// Pool that keeps at most `max_idle` released buffers around for reuse.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: SegQueue::new(),
                max_idle,
                allocated: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                recycled: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a buffer, reusing released storage when available.
    ///
    /// Reused buffers keep their previous contents; the caller overwrites them.
    pub fn acquire(&self) -> Pooled<T> {
        let value = match self.inner.free.pop() {
            Some(value) => value,
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
        };
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        Pooled {
            slot: Slot {
                value: Some(value),
                pool: Arc::downgrade(&self.inner),
            },
        }
    }
}

impl<T> BufferPool<T> {
    /// Buffers created by this pool so far.
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    /// Buffers handed out and not yet released by every holder.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Total releases back into the pool.
    pub fn recycled(&self) -> usize {
        self.inner.recycled.load(Ordering::Relaxed)
    }

    /// Released buffers waiting for reuse.
    pub fn idle(&self) -> usize {
        self.inner.free.len()
    }
}

impl<T> fmt::Debug for BufferPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("allocated", &self.allocated())
            .field("outstanding", &self.outstanding())
            .field("idle", &self.idle())
            .finish()
    }
}

/// Storage plus the way home. Returns the value to its pool on drop.
struct Slot<T> {
    value: Option<T>,
    pool: Weak<PoolInner<T>>,
}

impl<T> Slot<T> {
    fn get(&self) -> &T {
        self.value.as_ref().expect("pool slot emptied before drop")
    }

    fn get_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pool slot emptied before drop")
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.release(value);
            }
        }
    }
}

/// Exclusively owned pool buffer. Mutable until it is shared.
pub struct Pooled<T> {
    slot: Slot<T>,
}

impl<T> Pooled<T> {
    /// Publish the buffer. From here on it is read-only for every holder.
    pub fn share(self) -> Shared<T> {
        Shared {
            slot: Arc::new(self.slot),
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.slot.get()
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.slot.get_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(self.slot.get()).finish()
    }
}

/// Read-only handle to a published buffer; one clone per holder.
pub struct Shared<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Shared<T> {
    /// Wrap a value that does not belong to any pool (dropped normally at zero).
    pub fn detached(value: T) -> Self {
        Self {
            slot: Arc::new(Slot {
                value: Some(value),
                pool: Weak::new(),
            }),
        }
    }

    /// Current number of holders.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.slot)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.slot, &b.slot)
    }

    /// Regain exclusive, mutable access if this is the only holder.
    pub fn try_unique(self) -> Result<Pooled<T>, Self> {
        match Arc::try_unwrap(self.slot) {
            Ok(slot) => Ok(Pooled { slot }),
            Err(slot) => Err(Self { slot }),
        }
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.slot.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("holders", &self.holders())
            .field("value", self.slot.get())
            .finish()
    }
}
