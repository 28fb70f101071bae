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
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info, warn};

/// Container keyed by a single coordinate system, latched on first insert.
pub struct SingleCondCont {
    core: ContainerCore,
    map: ConcurrentRangeMap<PayloadAny>,
    key_type: AtomicU8,
}

impl fmt::Debug for SingleCondCont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleCondCont")
            .field("id", &self.core.id)
            .field("key_type", &self.key_type())
            .field("entries", &self.map.len())
            .finish_non_exhaustive()
    }
}

impl SingleCondCont {
    pub(crate) fn create(id: ContainerId, parts: ContainerParts) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let this: Weak<dyn CondContainer> = Weak::<Self>::clone(this);
            let core = ContainerCore::new(id, parts, this);
            let map = ConcurrentRangeMap::new(core.map_name(), Arc::clone(&core.updater), core.capacity);
            Self {
                core,
                map,
                key_type: AtomicU8::new(KeyType::Single.as_u8()),
            }
        })
    }

    fn latched(&self) -> KeyType {
        KeyType::from_u8(self.key_type.load(Ordering::Acquire)).unwrap_or(KeyType::Single)
    }

    /// Key type an incoming range would be stored under. RUNLBN wins when
    /// an undecided container sees a range carrying both.
    fn key_type_for(&self, range: &IovRange) -> Result<KeyType> {
        match self.latched() {
            KeyType::Single if range.is_run_lbn() => Ok(KeyType::RunLbn),
            KeyType::Single if range.is_timestamp() => Ok(KeyType::Timestamp),
            KeyType::Single => Err(CondError::InvalidRange {
                range: range.to_string(),
                reason: "both ends need run-lbn or both need a timestamp",
            }),
            latched => Ok(latched),
        }
    }

    fn latch(&self, kind: KeyType) -> Result<()> {
        match self.key_type.compare_exchange(
            KeyType::Single.as_u8(),
            kind.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                info!(target: "cond::condcont", container = %self.core.id, key_type = %kind, "condcont_key_type_latched");
                Ok(())
            }
            Err(current) if current == kind.as_u8() => Ok(()),
            Err(current) => Err(self.mismatch(
                KeyType::from_u8(current).unwrap_or(KeyType::Single),
                kind.to_string(),
            )),
        }
    }

    fn mismatch(&self, expected: KeyType, actual: impl Into<String>) -> CondError {
        CondError::KeyTypeMismatch {
            container: self.core.id.to_string(),
            expected: expected.to_string(),
            actual: actual.into(),
        }
    }

    /// Packed range for the latched (or about to be latched) key type.
    fn range_key(&self, range: IovRange) -> Result<(KeyType, RangeKey)> {
        let kind = self.key_type_for(&range)?;
        let (start, stop) = range
            .keys_for(kind)
            .ok_or_else(|| self.mismatch(kind, describe_range_kind(&range)))?;
        if start >= stop {
            return Err(CondError::InvalidRange {
                range: range.to_string(),
                reason: "start must precede stop",
            });
        }
        Ok((kind, RangeKey::new(range, start, stop)))
    }

    fn point_key(&self, time: &IovTime) -> Option<IovKey> {
        time.key_for(self.latched())
    }

    /// Backing range map.
    #[must_use]
    pub fn map(&self) -> &ConcurrentRangeMap<PayloadAny> {
        &self.map
    }
}

impl CondContainer for SingleCondCont {
    fn id(&self) -> &ContainerId {
        &self.core.id
    }

    fn class_id(&self) -> ClassId {
        self.core.id.class
    }

    fn key_type(&self) -> KeyType {
        self.latched()
    }

    fn entries(&self) -> usize {
        self.map.len()
    }

    fn ranges(&self) -> Vec<IovRange> {
        self.map.ranges().into_iter().map(|k| k.range).collect()
    }

    fn typeless_insert(
        &self,
        range: IovRange,
        obj: Box<PayloadAny>,
        ctx: &EventContext,
    ) -> Result<InsertStatus> {
        let prepared = self
            .core
            .check_payload(&*obj)
            .and_then(|()| self.range_key(range))
            .and_then(|(kind, key)| self.latch(kind).map(|()| key));
        let key = match prepared {
            Ok(key) => key,
            Err(err) => {
                warn!(target: "cond::condcont", container = %self.core.id, %range, error = %err, "condcont_insert_rejected");
                return Err(err);
            }
        };

        let status = self.map.insert(key, Arc::from(obj), true)?;
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
        let key = self.point_key(time)?;
        self.map.find(key).map(|(obj, k)| (obj, k.range))
    }

    fn erase(&self, time: &IovTime, ctx: &EventContext) -> Result<EraseOutcome> {
        let kind = self.latched();
        if kind == KeyType::Single {
            return Ok(EraseOutcome::NotFound);
        }
        let key = time
            .key_for(kind)
            .ok_or_else(|| self.mismatch(kind, time.to_string()))?;
        let outcome = self.map.erase(key);
        debug!(target: "cond::condcont", container = %self.core.id, slot = ctx.slot.0, %time, ?outcome, "condcont_erase");
        Ok(outcome)
    }

    fn extend_last_range(&self, range: IovRange, ctx: &EventContext) -> Result<InsertStatus> {
        if self.latched() == KeyType::Single {
            return Err(CondError::EmptyContainer {
                container: self.core.id.to_string(),
            });
        }
        let (_, key) = self.range_key(range)?;
        let status = self.map.extend_last_range(key)?;
        debug!(target: "cond::condcont", container = %self.core.id, slot = ctx.slot.0, %range, %status, "condcont_extend");
        Ok(status)
    }

    fn trim(&self, run_lbn_keys: &[IovKey], timestamp_keys: &[IovKey]) -> usize {
        match self.latched() {
            KeyType::RunLbn => self.map.trim(run_lbn_keys),
            KeyType::Timestamp => self.map.trim(timestamp_keys),
            KeyType::Single | KeyType::Mixed => 0,
        }
    }

    fn clear(&self) {
        self.map.clear();
    }

    fn quiescent(&self, ctx: &EventContext) -> Result<()> {
        self.core.updater.quiescent(ctx.slot)
    }

    fn n_inserts(&self) -> u64 {
        self.map.n_inserts()
    }

    fn max_size(&self) -> usize {
        self.map.max_size()
    }

    fn list(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let snapshot = self.map.snapshot();
        self.core.list_header(out, self.latched(), snapshot.len())?;
        for entry in snapshot.entries() {
            writeln!(out, "{}", entry.key.range)?;
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
