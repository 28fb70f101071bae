use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// A single RCU-published value.
///
/// Reads are lock-free (no atomic increment on the [`load`](Self::load)
/// fast path). [`publish`](Self::publish) swaps in a new value and hands the
/// old one back so the caller can retire it. Writers must serialize among
/// themselves; the cell only guarantees readers never see a torn value.
///
/// # Examples
///
/// ```
/// use cond_rcu::RcuCell;
///
/// let cell = RcuCell::new(vec![1_u32]);
/// assert_eq!(cell.load().len(), 1);
///
/// let old = cell.publish(std::sync::Arc::new(vec![1, 2]));
/// assert_eq!(*old, vec![1]);
/// assert_eq!(cell.generation(), 1);
/// ```
pub struct RcuCell<T> {
    inner: ArcSwap<T>,
    generation: AtomicU64,
}

impl<T: fmt::Debug> fmt::Debug for RcuCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcuCell")
            .field("value", &*self.load_full())
            .field("generation", &self.generation())
            .finish()
    }
}

impl<T> RcuCell<T> {
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc(arc: Arc<T>) -> Self {
        Self {
            inner: ArcSwap::from(arc),
            generation: AtomicU64::new(0),
        }
    }

    /// Borrow the current value.
    ///
    /// The guard must stay short-lived; use [`load_full`](Self::load_full)
    /// to keep the value across longer work.
    #[inline]
    pub fn load(&self) -> arc_swap::Guard<Arc<T>> {
        let guard = self.inner.load();
        trace!(
            target: "cond::rcu",
            generation = self.generation.load(Ordering::Relaxed),
            "rcu_cell_load"
        );
        guard
    }

    /// Load the current value as an owned `Arc`.
    #[inline]
    pub fn load_full(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Atomically publish `next`, returning the superseded value.
    ///
    /// Readers that loaded the old value keep seeing it until they drop
    /// their guard; every later load sees `next`.
    pub fn publish(&self, next: Arc<T>) -> Arc<T> {
        let old = self.inner.swap(next);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(target: "cond::rcu", generation, "rcu_cell_publish");
        old
    }

    /// Number of publishes since creation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
