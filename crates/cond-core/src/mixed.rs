use crate::container::{
    CondContainer, ContainerCore, ContainerId, ContainerParts, describe_range_kind,
};
use crate::registry::PayloadAny;
use cond_error::{CondError, Result};
use cond_rangemap::ConcurrentRangeMap;
use cond_types::{
    ClassId, EraseOutcome, EventContext, InsertStatus, IovKey, IovRange, IovTime, KeyType,
    RangeKey,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

type Inner = ConcurrentRangeMap<PayloadAny>;

/// Container keyed by run-lbn, then by timestamp within each run-lbn range.
///
/// The outer map holds one inner timestamp-keyed map per run-lbn range.
/// Extension is not defined here, nor is erase: a single time does not
/// identify which inner map to change.
pub struct MixedCondCont {
    core: ContainerCore,
    outer: ConcurrentRangeMap<Inner>,
    /// Serialises inserts and trims across both levels.
    write_lock: Mutex<()>,
    n_inserts: AtomicU64,
}

impl fmt::Debug for MixedCondCont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixedCondCont")
            .field("id", &self.core.id)
            .field("run_lbn_ranges", &self.outer.len())
            .field("entries", &self.entries())
            .finish_non_exhaustive()
    }
}

/// Rich range built from an outer run-lbn key and an inner timestamp key.
fn compose(outer: &RangeKey, inner: &RangeKey) -> IovRange {
    IovRange::new(
        IovTime::mixed(outer.start.high(), outer.start.low(), inner.start.high(), inner.start.low()),
        IovTime::mixed(outer.stop.high(), outer.stop.low(), inner.stop.high(), inner.stop.low()),
    )
}

impl MixedCondCont {
    pub(crate) fn create(id: ContainerId, parts: ContainerParts) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let this: Weak<dyn CondContainer> = Weak::<Self>::clone(this);
            let core = ContainerCore::new(id, parts, this);
            let outer = ConcurrentRangeMap::new(core.map_name(), Arc::clone(&core.updater), core.capacity);
            Self {
                core,
                outer,
                write_lock: Mutex::new(()),
                n_inserts: AtomicU64::new(0),
            }
        })
    }

    /// Split a mixed range into its run-lbn and timestamp keys.
    fn split(&self, range: &IovRange) -> Result<(RangeKey, RangeKey)> {
        let (Some((rl_start, rl_stop)), Some((ts_start, ts_stop))) =
            (range.keys_for(KeyType::RunLbn), range.keys_for(KeyType::Timestamp))
        else {
            return Err(CondError::KeyTypeMismatch {
                container: self.core.id.to_string(),
                expected: KeyType::Mixed.to_string(),
                actual: describe_range_kind(range).to_owned(),
            });
        };
        if rl_start >= rl_stop || ts_start >= ts_stop {
            return Err(CondError::InvalidRange {
                range: range.to_string(),
                reason: "start must precede stop in both coordinates",
            });
        }
        let outer = RangeKey::new(
            IovRange::new(rl_start.to_run_lbn_time(), rl_stop.to_run_lbn_time()),
            rl_start,
            rl_stop,
        );
        let inner = RangeKey::new(
            IovRange::new(
                IovTime::timestamp(ts_start.high(), ts_start.low()),
                IovTime::timestamp(ts_stop.high(), ts_stop.low()),
            ),
            ts_start,
            ts_stop,
        );
        Ok((outer, inner))
    }

    /// Inner map stored under exactly `outer`, else a new outer entry.
    /// `None` when the outer insert classifies the run-lbn range as a
    /// duplicate. Caller holds the write lock.
    fn locate(&self, outer: RangeKey) -> Result<Option<(Arc<Inner>, InsertStatus)>> {
        let snapshot = self.outer.snapshot();
        if let Some(entry) = snapshot
            .entries()
            .iter()
            .find(|e| e.key.start == outer.start && e.key.stop == outer.stop)
        {
            return Ok(Some((Arc::clone(&entry.value), InsertStatus::Success)));
        }
        drop(snapshot);

        let inner = Arc::new(Inner::new(
            format!("{}{}", self.core.id, outer.range),
            Arc::clone(&self.core.updater),
            self.core.capacity,
        ));
        match self.outer.insert(outer, Arc::clone(&inner), false)? {
            InsertStatus::Duplicate => Ok(None),
            status => Ok(Some((inner, status))),
        }
    }

    fn inner_maps(&self) -> Vec<(RangeKey, Arc<Inner>)> {
        self.outer
            .snapshot()
            .entries()
            .iter()
            .map(|e| (e.key, Arc::clone(&e.value)))
            .collect()
    }

    fn unsupported(&self, op: &'static str) -> CondError {
        CondError::Unsupported {
            op,
            container: self.core.id.to_string(),
        }
    }
}

impl CondContainer for MixedCondCont {
    fn id(&self) -> &ContainerId {
        &self.core.id
    }

    fn class_id(&self) -> ClassId {
        self.core.id.class
    }

    fn key_type(&self) -> KeyType {
        KeyType::Mixed
    }

    fn entries(&self) -> usize {
        self.outer.snapshot().entries().iter().map(|e| e.value.len()).sum()
    }

    fn ranges(&self) -> Vec<IovRange> {
        self.inner_maps()
            .iter()
            .flat_map(|(outer, inner)| {
                inner
                    .ranges()
                    .into_iter()
                    .map(|ts| compose(outer, &ts))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn typeless_insert(
        &self,
        range: IovRange,
        obj: Box<PayloadAny>,
        ctx: &EventContext,
    ) -> Result<InsertStatus> {
        let (outer_key, inner_key) =
            match self.core.check_payload(&*obj).and_then(|()| self.split(&range)) {
                Ok(keys) => keys,
                Err(err) => {
                    warn!(target: "cond::condcont", container = %self.core.id, %range, error = %err, "condcont_insert_rejected");
                    return Err(err);
                }
            };

        let status = {
            let _guard = self.write_lock.lock();
            match self.locate(outer_key)? {
                None => InsertStatus::Duplicate,
                Some((inner, outer_status)) => match inner.insert(inner_key, Arc::from(obj), false)? {
                    InsertStatus::Duplicate => InsertStatus::Duplicate,
                    InsertStatus::Overlap => InsertStatus::Overlap,
                    _ if outer_status.is_overlap() => InsertStatus::Overlap,
                    _ => InsertStatus::Success,
                },
            }
        };
        if status.changed() {
            self.n_inserts.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            target: "cond::condcont",
            container = %self.core.id,
            slot = ctx.slot.0,
            %range,
            %status,
            "condcont_insert"
        );
        if status.changed() {
            self.core.notify_added();
        }
        Ok(status)
    }

    fn find_any(&self, time: &IovTime) -> Option<(Arc<PayloadAny>, IovRange)> {
        let rl = time.run_lbn_key()?;
        let ts = time.timestamp_key()?;
        let (inner, outer_key) = self.outer.find(rl)?;
        let (obj, inner_key) = inner.find(ts)?;
        Some((obj, compose(&outer_key, &inner_key)))
    }

    fn erase(&self, _time: &IovTime, _ctx: &EventContext) -> Result<EraseOutcome> {
        Err(self.unsupported("erase"))
    }

    fn extend_last_range(&self, _range: IovRange, _ctx: &EventContext) -> Result<InsertStatus> {
        Err(self.unsupported("extend_last_range"))
    }

    fn trim(&self, run_lbn_keys: &[IovKey], timestamp_keys: &[IovKey]) -> usize {
        let _guard = self.write_lock.lock();
        let before = self.inner_maps();
        let dropped = self.outer.trim(run_lbn_keys);
        let mut removed: usize = before[..dropped].iter().map(|(_, inner)| inner.len()).sum();
        for (_, inner) in &before[dropped..] {
            removed += inner.trim(timestamp_keys);
        }
        removed
    }

    fn clear(&self) {
        for (_, inner) in self.inner_maps() {
            inner.clear();
        }
        self.outer.clear();
    }

    fn quiescent(&self, ctx: &EventContext) -> Result<()> {
        self.core.updater.quiescent(ctx.slot)
    }

    fn n_inserts(&self) -> u64 {
        self.n_inserts.load(Ordering::Relaxed)
    }

    fn max_size(&self) -> usize {
        self.outer.max_size()
    }

    fn list(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let inner_maps = self.inner_maps();
        let entries = inner_maps.iter().map(|(_, inner)| inner.len()).sum();
        self.core.list_header(out, KeyType::Mixed, entries)?;
        for (outer, inner) in &inner_maps {
            writeln!(out, "{}", outer.range)?;
            for ts in inner.ranges() {
                writeln!(out, "  {}", compose(outer, &ts))?;
            }
        }
        Ok(())
    }

    fn cast<'a>(&self, target: ClassId, obj: &'a PayloadAny) -> Option<&'a PayloadAny> {
        self.core.cast(target, obj)
    }

    fn add_dependency(&self, other: &Arc<dyn CondContainer>) {
        self.core.add_dependency(other);
    }

    fn dependents(&self) -> Vec<Arc<dyn CondContainer>> {
        self.core.dependents()
    }
}
