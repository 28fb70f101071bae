#![forbid(unsafe_code)]
//! Interval map keyed by packed IOV ranges.
//!
//! The live set is an immutable, start-sorted [`Snapshot`] published through
//! an [`RcuCell`]. Readers take one atomic load and binary-search it.
//! Writers serialize on a mutex, build a complete replacement array, publish
//! it, and hand the superseded snapshot to the shared [`Updater`]. Payloads
//! dropped from the live set stay reachable from that retired snapshot until
//! the updater releases it.
//!
//! Published ranges are always sorted by start and pairwise disjoint, so a
//! point is contained in at most one entry.
//!
//! # Logging
//!
//! - **TRACE** `cond::rangemap`: `rangemap_duplicate`
//! - **DEBUG** `cond::rangemap`: `rangemap_publish` (op, entries, generation)

use cond_error::{CondError, Result};
use cond_rcu::{Garbage, RcuCell, Updater};
use cond_types::compare::{Extension, Overlap, resolve_overlap, try_extend_tail};
use cond_types::{EraseOutcome, InsertStatus, IovKey, RangeKey};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Default initial capacity of a snapshot array.
pub const DEFAULT_CAPACITY: usize = 16;

/// One stored range and its payload.
pub struct Entry<V: ?Sized> {
    pub key: RangeKey,
    pub value: Arc<V>,
}

impl<V: ?Sized> Clone for Entry<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            value: Arc::clone(&self.value),
        }
    }
}

impl<V: ?Sized> fmt::Debug for Entry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Immutable published state of a [`ConcurrentRangeMap`].
pub struct Snapshot<V: ?Sized> {
    entries: Vec<Entry<V>>,
    generation: u64,
}

impl<V: ?Sized> fmt::Debug for Snapshot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("entries", &self.entries)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<V: ?Sized> Snapshot<V> {
    fn empty(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            generation: 0,
        }
    }

    /// Entry whose range contains `key`.
    #[must_use]
    pub fn find(&self, key: IovKey) -> Option<&Entry<V>> {
        let pos = self.entries.partition_point(|e| e.key.start <= key);
        let entry = self.entries.get(pos.checked_sub(1)?)?;
        entry.key.contains(key).then_some(entry)
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry<V>] {
        &self.entries
    }

    #[must_use]
    pub fn last(&self) -> Option<&Entry<V>> {
        self.entries.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Publish count at which this snapshot became current.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Concurrent map from disjoint validity ranges to shared payloads.
///
/// `V` may be unsized, so type-erased containers store
/// `ConcurrentRangeMap<dyn Any + Send + Sync>`.
pub struct ConcurrentRangeMap<V: ?Sized + Send + Sync + 'static> {
    name: String,
    current: RcuCell<Snapshot<V>>,
    write_lock: Mutex<()>,
    updater: Arc<dyn Updater>,
    capacity: usize,
    n_inserts: AtomicU64,
    max_size: AtomicUsize,
}

impl<V: ?Sized + Send + Sync + 'static> fmt::Debug for ConcurrentRangeMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentRangeMap")
            .field("name", &self.name)
            .field("entries", &self.len())
            .field("generation", &self.generation())
            .field("n_inserts", &self.n_inserts())
            .finish_non_exhaustive()
    }
}

impl<V: ?Sized + Send + Sync + 'static> ConcurrentRangeMap<V> {
    /// Create an empty map. `name` labels errors and log events.
    pub fn new(name: impl Into<String>, updater: Arc<dyn Updater>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            current: RcuCell::new(Snapshot::empty(capacity)),
            write_lock: Mutex::new(()),
            updater,
            capacity,
            n_inserts: AtomicU64::new(0),
            max_size: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn updater(&self) -> &Arc<dyn Updater> {
        &self.updater
    }

    /// Current snapshot, kept alive for as long as the caller holds it.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot<V>> {
        self.current.load_full()
    }

    /// Lock-free lookup of the entry containing `key`.
    #[must_use]
    pub fn find(&self, key: IovKey) -> Option<(Arc<V>, RangeKey)> {
        let snap = self.current.load();
        snap.find(key).map(|e| (Arc::clone(&e.value), e.key))
    }

    /// Insert `value` over `key`.
    ///
    /// With `try_extend`, a range sharing the last entry's start extends
    /// that entry instead (the new value is dropped). Otherwise the incoming
    /// range is shrunk around existing entries; a range left with nothing
    /// uncovered is a `Duplicate` and `value` is dropped.
    pub fn insert(&self, key: RangeKey, value: Arc<V>, try_extend: bool) -> Result<InsertStatus> {
        if key.is_empty() {
            return Err(self.invalid(&key, "start must precede stop"));
        }
        let guard = self.write_lock.lock();
        let old = self.current.load_full();

        if try_extend {
            if let Some(last) = old.last() {
                match try_extend_tail(&last.key, &key) {
                    Extension::Extended(extended) => {
                        let mut entries = old.entries.clone();
                        if let Some(tail) = entries.last_mut() {
                            tail.key = extended;
                        }
                        self.publish(&old, entries, "extend");
                        drop(guard);
                        self.n_inserts.fetch_add(1, Ordering::Relaxed);
                        return Ok(InsertStatus::Extended);
                    }
                    Extension::Duplicate => {
                        trace!(target: "cond::rangemap", map = %self.name, range = %key, "rangemap_duplicate");
                        return Ok(InsertStatus::Duplicate);
                    }
                    Extension::NoChange => {}
                }
            }
        }

        let mut incoming = key;
        let mut status = InsertStatus::Success;
        let pos = old.entries.partition_point(|e| e.key.start <= incoming.start);
        let predecessor = pos.checked_sub(1).and_then(|i| old.entries.get(i));
        for existing in predecessor.into_iter().chain(&old.entries[pos..]) {
            if existing.key.start >= incoming.stop {
                break;
            }
            match resolve_overlap(&existing.key, &incoming) {
                Overlap::Disjoint => {}
                Overlap::Adjusted(adjusted) => {
                    incoming = adjusted;
                    status = InsertStatus::Overlap;
                }
                Overlap::Duplicate => {
                    trace!(target: "cond::rangemap", map = %self.name, range = %key, "rangemap_duplicate");
                    return Ok(InsertStatus::Duplicate);
                }
            }
        }

        let at = old.entries.partition_point(|e| e.key.start < incoming.start);
        let mut entries = Vec::with_capacity(self.capacity.max(old.len() + 1));
        entries.extend_from_slice(&old.entries[..at]);
        entries.push(Entry {
            key: incoming,
            value,
        });
        entries.extend_from_slice(&old.entries[at..]);
        self.publish(&old, entries, "insert");
        drop(guard);
        self.n_inserts.fetch_add(1, Ordering::Relaxed);
        Ok(status)
    }

    /// Remove the entry with the smallest start `>= key`.
    pub fn erase(&self, key: IovKey) -> EraseOutcome {
        let _guard = self.write_lock.lock();
        let old = self.current.load_full();
        let pos = old.entries.partition_point(|e| e.key.start < key);
        if pos >= old.len() {
            return EraseOutcome::NotFound;
        }
        let mut entries = old.entries.clone();
        entries.remove(pos);
        self.publish(&old, entries, "erase");
        EraseOutcome::Erased
    }

    /// Push the last entry's stop out to `key.stop`.
    ///
    /// `Duplicate` when the new stop is not later; an error when the map is
    /// empty or the starts differ.
    pub fn extend_last_range(&self, key: RangeKey) -> Result<InsertStatus> {
        if key.is_empty() {
            return Err(self.invalid(&key, "start must precede stop"));
        }
        let _guard = self.write_lock.lock();
        let old = self.current.load_full();
        let Some(last) = old.last() else {
            return Err(CondError::EmptyContainer {
                container: self.name.clone(),
            });
        };
        match try_extend_tail(&last.key, &key) {
            Extension::Extended(extended) => {
                let mut entries = old.entries.clone();
                if let Some(tail) = entries.last_mut() {
                    tail.key = extended;
                }
                self.publish(&old, entries, "extend");
                Ok(InsertStatus::Extended)
            }
            Extension::Duplicate => Ok(InsertStatus::Duplicate),
            Extension::NoChange => Err(CondError::ExtendMismatch {
                container: self.name.clone(),
                last: last.key.range.to_string(),
                requested: key.range.to_string(),
            }),
        }
    }

    /// Drop leading entries that contain none of `keys` (sorted ascending).
    ///
    /// Stops at the first entry that contains a key, and never removes the
    /// last remaining entry. Returns the number of entries removed.
    pub fn trim(&self, keys: &[IovKey]) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let _guard = self.write_lock.lock();
        let old = self.current.load_full();
        let mut removed = 0;
        while old.len() - removed > 1 {
            let entry = &old.entries[removed];
            let first = keys.partition_point(|k| *k < entry.key.start);
            if keys.get(first).is_some_and(|k| *k < entry.key.stop) {
                break;
            }
            removed += 1;
        }
        if removed > 0 {
            self.publish(&old, old.entries[removed..].to_vec(), "trim");
        }
        removed
    }

    /// Drop every entry at once, bypassing the updater.
    ///
    /// Only for single-threaded setup and tests: a concurrent reader may
    /// still be using the payloads this releases.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        let old = self.current.publish(Arc::new(Snapshot::empty(self.capacity)));
        debug!(target: "cond::rangemap", map = %self.name, dropped = old.len(), "rangemap_clear");
    }

    /// Stored ranges in start order.
    #[must_use]
    pub fn ranges(&self) -> Vec<RangeKey> {
        self.current.load().entries.iter().map(|e| e.key).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    /// Inserts (including extensions) that changed the map.
    #[must_use]
    pub fn n_inserts(&self) -> u64 {
        self.n_inserts.load(Ordering::Relaxed)
    }

    /// Largest number of entries ever published.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size.load(Ordering::Relaxed)
    }

    /// Number of snapshots published so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current.generation()
    }

    /// Swap in `entries` and retire the snapshot they replace.
    /// Caller holds the write lock.
    fn publish(&self, old: &Arc<Snapshot<V>>, entries: Vec<Entry<V>>, op: &'static str) {
        let len = entries.len();
        let generation = old.generation + 1;
        let superseded = self.current.publish(Arc::new(Snapshot {
            entries,
            generation,
        }));
        self.max_size.fetch_max(len, Ordering::Relaxed);
        let garbage: Garbage = Box::new(superseded);
        let retired_at = self.updater.retire(vec![garbage]);
        debug!(
            target: "cond::rangemap",
            map = %self.name,
            op,
            entries = len,
            generation,
            retired_at,
            "rangemap_publish"
        );
    }

    fn invalid(&self, key: &RangeKey, reason: &'static str) -> CondError {
        CondError::InvalidRange {
            range: format!("{} in {}", key.range, self.name),
            reason,
        }
    }
}
