//! Bookkeeping for statements a pooled backend has in flight.
//!
//! Pooled drivers cannot abort a statement through the connection running
//! it, because that connection is busy. Instead each backend registers a
//! cancellation handle (a `tokio-postgres` cancel token, a `MySQL`
//! connection id) while a statement or transaction is active, and
//! [`DatabaseBackend::interrupt`](crate::base::DatabaseBackend::interrupt)
//! cancels everything registered.

#![cfg_attr(not(any(feature = "postgres", feature = "mysql")), allow(dead_code))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Cancellation handles keyed by registration.
#[derive(Debug)]
pub struct InFlight<H> {
    next_id: AtomicU64,
    handles: Mutex<HashMap<u64, H>>,
}

impl<H> Default for InFlight<H> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            handles: Mutex::new(HashMap::new()),
        }
    }
}

impl<H: Clone> InFlight<H> {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `handle` until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, handle: H) -> InFlightGuard<H> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        InFlightGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    /// The handles registered right now.
    pub fn snapshot(&self) -> Vec<H> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes its handle from the registry on drop.
#[derive(Debug)]
pub struct InFlightGuard<H> {
    registry: Arc<InFlight<H>>,
    id: u64,
}

impl<H> Drop for InFlightGuard<H> {
    fn drop(&mut self) {
        self.registry
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
