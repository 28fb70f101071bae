use crate::{Garbage, Updater};
use cond_error::{CondError, Result};
use cond_types::SlotId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace, warn};

/// Slot epoch sentinel: the slot is between units of work.
const IDLE: u64 = u64::MAX;

const DEFAULT_BACKLOG_WARN: usize = 1024;

/// Generation most recently observed by one worker slot.
///
/// Written only by the owning worker, read by the reclaimer.
#[derive(Debug)]
struct SlotEpoch {
    value: AtomicU64,
}

impl SlotEpoch {
    fn new() -> Self {
        // A fresh slot may already be reading generation 0.
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// `None` when idle.
    #[inline]
    fn load(&self) -> Option<u64> {
        let v = self.value.load(Ordering::SeqCst);
        if v == IDLE { None } else { Some(v) }
    }

    #[inline]
    fn store(&self, generation: u64) {
        self.value.store(generation, Ordering::SeqCst);
    }

    #[inline]
    fn clear(&self) {
        self.value.store(IDLE, Ordering::SeqCst);
    }
}

struct Retirement {
    generation: u64,
    garbage: Vec<Garbage>,
}

impl fmt::Debug for Retirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retirement")
            .field("generation", &self.generation)
            .field("objects", &self.garbage.len())
            .finish()
    }
}

/// Point-in-time counters of an [`RcuDomain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RcuStats {
    pub generation: u64,
    pub slots: usize,
    pub pending_batches: usize,
    pub pending_objects: usize,
    pub retired_objects: u64,
    pub reclaimed_objects: u64,
}

/// Quiescent-state coordinator.
///
/// Every retirement is stamped with a fresh generation `g`. It becomes
/// releasable once each slot is either idle or has recorded an epoch
/// `>= g`, i.e. has passed a quiescent point or started a new read after
/// the retirement was queued. A slot that never reports keeps everything
/// retired after its last report alive: memory grows, nothing breaks.
///
/// Dropping the domain releases whatever is still queued.
pub struct RcuDomain {
    generation: AtomicU64,
    slots: Box<[SlotEpoch]>,
    queue: Mutex<VecDeque<Retirement>>,
    pending_objects: AtomicUsize,
    retired_objects: AtomicU64,
    reclaimed_objects: AtomicU64,
    backlog_warn: usize,
}

impl fmt::Debug for RcuDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcuDomain")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl RcuDomain {
    /// Create a domain for `slots` workers (at least one).
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self::with_backlog_warn(slots, DEFAULT_BACKLOG_WARN)
    }

    /// Create with a custom threshold for the backlog warning.
    #[must_use]
    pub fn with_backlog_warn(slots: usize, backlog_warn: usize) -> Self {
        let slots = slots.max(1);
        debug!(target: "cond::rcu", slots, backlog_warn, "rcu_domain_init");
        Self {
            generation: AtomicU64::new(0),
            slots: (0..slots).map(|_| SlotEpoch::new()).collect(),
            queue: Mutex::new(VecDeque::new()),
            pending_objects: AtomicUsize::new(0),
            retired_objects: AtomicU64::new(0),
            reclaimed_objects: AtomicU64::new(0),
            backlog_warn: backlog_warn.max(1),
        }
    }

    #[must_use]
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn slot(&self, slot: SlotId) -> Result<&SlotEpoch> {
        self.slots.get(slot.0).ok_or(CondError::BadSlot {
            slot: slot.0,
            slots: self.slots.len(),
        })
    }

    /// Record that `slot` is about to read, returning the generation it
    /// observes. Lookups made afterwards see at least this generation.
    pub fn enter_read(&self, slot: SlotId) -> Result<u64> {
        let epoch = self.slot(slot)?;
        let generation = self.generation.load(Ordering::SeqCst);
        epoch.store(generation);
        trace!(target: "cond::rcu", slot = slot.0, generation, "rcu_enter_read");
        Ok(generation)
    }

    /// Mark `slot` as holding no references, then release what that
    /// unblocks unless another thread is already reclaiming.
    pub fn mark_quiescent(&self, slot: SlotId) -> Result<()> {
        self.slot(slot)?.clear();
        if let Some(mut queue) = self.queue.try_lock() {
            let released = self.take_releasable(&mut queue);
            drop(queue);
            self.release(released);
        }
        Ok(())
    }

    /// Epoch last recorded by `slot`; `None` while idle.
    pub fn slot_epoch(&self, slot: SlotId) -> Result<Option<u64>> {
        Ok(self.slot(slot)?.load())
    }

    /// Smallest epoch among busy slots, `u64::MAX` if all are idle.
    fn horizon(&self) -> u64 {
        self.slots
            .iter()
            .filter_map(SlotEpoch::load)
            .min()
            .unwrap_or(u64::MAX)
    }

    fn take_releasable(&self, queue: &mut VecDeque<Retirement>) -> Vec<Retirement> {
        let horizon = self.horizon();
        let mut released = Vec::new();
        while queue.front().is_some_and(|r| r.generation <= horizon) {
            if let Some(retirement) = queue.pop_front() {
                released.push(retirement);
            }
        }
        released
    }

    /// Drop released garbage outside the queue lock.
    fn release(&self, released: Vec<Retirement>) -> usize {
        let objects: usize = released.iter().map(|r| r.garbage.len()).sum();
        if objects == 0 {
            return 0;
        }
        let newest = released.last().map_or(0, |r| r.generation);
        drop(released);
        self.pending_objects.fetch_sub(objects, Ordering::AcqRel);
        self.reclaimed_objects
            .fetch_add(objects as u64, Ordering::Relaxed);
        debug!(
            target: "cond::rcu",
            objects,
            through_generation = newest,
            "rcu_reclaim"
        );
        objects
    }

    #[must_use]
    pub fn stats(&self) -> RcuStats {
        let pending_batches = self.queue.lock().len();
        RcuStats {
            generation: self.generation(),
            slots: self.slots.len(),
            pending_batches,
            pending_objects: self.pending_objects.load(Ordering::Acquire),
            retired_objects: self.retired_objects.load(Ordering::Relaxed),
            reclaimed_objects: self.reclaimed_objects.load(Ordering::Relaxed),
        }
    }
}

impl Updater for RcuDomain {
    fn retire(&self, garbage: Vec<Garbage>) -> u64 {
        let objects = garbage.len();
        let mut queue = self.queue.lock();
        // Advance under the queue lock so the queue stays sorted by generation.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if objects == 0 {
            return generation;
        }
        queue.push_back(Retirement {
            generation,
            garbage,
        });
        let backlog = queue.len();
        drop(queue);

        self.pending_objects.fetch_add(objects, Ordering::AcqRel);
        self.retired_objects
            .fetch_add(objects as u64, Ordering::Relaxed);
        debug!(target: "cond::rcu", generation, objects, backlog, "rcu_retire");
        if backlog % self.backlog_warn == 0 {
            warn!(
                target: "cond::rcu",
                backlog,
                threshold = self.backlog_warn,
                "rcu_backlog_growth"
            );
        }
        generation
    }

    fn enter_read(&self, slot: SlotId) -> Result<u64> {
        RcuDomain::enter_read(self, slot)
    }

    fn quiescent(&self, slot: SlotId) -> Result<()> {
        self.mark_quiescent(slot)
    }

    fn reclaim(&self) -> usize {
        let released = {
            let mut queue = self.queue.lock();
            self.take_releasable(&mut queue)
        };
        self.release(released)
    }

    fn pending(&self) -> usize {
        self.pending_objects.load(Ordering::Acquire)
    }
}
