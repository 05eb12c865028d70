//! Per-exporter free list of reusable marshalers.
//!
//! Borrowing yields a [`Lease`]. The instance goes back to the pool, reset, when
//! the last owner of the lease drops it, which is after the sender has finished
//! with the payload. An instance is therefore never handed out twice at once.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::marshal::{Marshaler, Recyclable};

struct Shared<M> {
    idle: Mutex<VecDeque<M>>,
    created: AtomicUsize,
}

pub struct MarshalerPool<M> {
    shared: Arc<Shared<M>>,
}

impl<M: Recyclable> MarshalerPool<M> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(VecDeque::new()),
                created: AtomicUsize::new(0),
            }),
        }
    }

    /// Borrow an idle instance, or build one with `create` when none is idle.
    pub fn acquire(&self, create: impl FnOnce() -> M) -> Lease<M> {
        let pooled = self.shared.idle.lock().pop_front();
        let marshaler = pooled.unwrap_or_else(|| {
            self.shared.created.fetch_add(1, Ordering::Relaxed);
            create()
        });
        Lease {
            marshaler: Some(marshaler),
            pool: Arc::downgrade(&self.shared),
        }
    }

    pub fn idle(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Instances ever allocated by this pool.
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::Relaxed)
    }

    /// Drop every idle instance.
    pub fn clear(&self) {
        self.shared.idle.lock().clear();
    }
}

impl<M: Recyclable> Default for MarshalerPool<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for MarshalerPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarshalerPool")
            .field("idle", &self.shared.idle.lock().len())
            .field("created", &self.shared.created.load(Ordering::Relaxed))
            .finish()
    }
}

/// Exclusive ownership of a pooled instance.
pub struct Lease<M: Recyclable> {
    marshaler: Option<M>,
    pool: Weak<Shared<M>>,
}

impl<M: Recyclable> Deref for Lease<M> {
    type Target = M;

    fn deref(&self) -> &M {
        // only taken in drop
        self.marshaler.as_ref().expect("lease already released")
    }
}

impl<M: Recyclable> DerefMut for Lease<M> {
    fn deref_mut(&mut self) -> &mut M {
        self.marshaler.as_mut().expect("lease already released")
    }
}

impl<M: Recyclable> Drop for Lease<M> {
    fn drop(&mut self) {
        let Some(mut marshaler) = self.marshaler.take() else {
            return;
        };
        marshaler.reset();
        if let Some(pool) = self.pool.upgrade() {
            pool.idle.lock().push_back(marshaler);
        }
    }
}

impl<M: Recyclable + Marshaler> Marshaler for Lease<M> {
    fn binary_serialized_size(&self) -> usize {
        self.deref().binary_serialized_size()
    }

    fn write_binary_to(&self, out: &mut dyn Write) -> io::Result<()> {
        self.deref().write_binary_to(out)
    }

    fn write_json_to(&self, out: &mut dyn Write) -> io::Result<()> {
        self.deref().write_json_to(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{EncodedPayloadBuffer, ReusableMarshaler};

    #[test]
    fn released_instance_is_reused() {
        let pool = MarshalerPool::<EncodedPayloadBuffer>::new();

        for _ in 0..5 {
            let mut lease = pool.acquire(EncodedPayloadBuffer::default);
            lease.initialize(b"payload");
            assert_eq!(lease.binary_serialized_size(), 7);
        }

        assert_eq!(pool.created(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn concurrent_leases_get_distinct_instances() {
        let pool = MarshalerPool::<EncodedPayloadBuffer>::new();

        let mut first = pool.acquire(EncodedPayloadBuffer::default);
        let mut second = pool.acquire(EncodedPayloadBuffer::default);
        first.initialize(b"one");
        second.initialize(b"three");

        assert_eq!(first.binary_serialized_size(), 3);
        assert_eq!(second.binary_serialized_size(), 5);
        assert_eq!(pool.created(), 2);
        assert_eq!(pool.idle(), 0);

        drop(first);
        drop(second);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn released_instance_is_reset() {
        let pool = MarshalerPool::<EncodedPayloadBuffer>::new();
        let mut lease = pool.acquire(EncodedPayloadBuffer::default);
        lease.initialize(b"stale");
        drop(lease);

        let lease = pool.acquire(EncodedPayloadBuffer::default);

        assert!(lease.is_empty());
    }

    #[test]
    fn lease_outliving_pool_is_discarded() {
        let pool = MarshalerPool::<EncodedPayloadBuffer>::new();
        let lease = pool.acquire(EncodedPayloadBuffer::default);

        drop(pool);
        drop(lease);
    }

    #[test]
    fn pool_is_bounded_by_peak_concurrency() {
        let pool = MarshalerPool::<EncodedPayloadBuffer>::new();

        let leases: Vec<_> = (0..3)
            .map(|_| pool.acquire(EncodedPayloadBuffer::default))
            .collect();
        drop(leases);
        for _ in 0..10 {
            drop(pool.acquire(EncodedPayloadBuffer::default));
        }

        assert_eq!(pool.created(), 3);
        assert_eq!(pool.idle(), 3);
    }
}
