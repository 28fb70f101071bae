use crate::cleaner::CleanerHook;
use crate::registry::{ClassRegistry, PayloadAny};
use cond_error::{CondError, Result};
use cond_rcu::Updater;
use cond_types::{
    ClassId, EraseOutcome, EventContext, InsertStatus, IovKey, IovRange, IovTime, KeyType,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Identity of a container: payload class plus the store key it was
/// created under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId {
    pub class: ClassId,
    pub key: String,
}

impl ContainerId {
    pub fn new(class: ClassId, key: impl Into<String>) -> Self {
        Self {
            class,
            key: key.into(),
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (clid {})", self.key, self.class)
    }
}

/// Type-erased conditions container.
///
/// Inserts consume the payload whatever the outcome. Lookups never block
/// and never fail; a miss is `None`.
pub trait CondContainer: Send + Sync + fmt::Debug {
    fn id(&self) -> &ContainerId;

    /// Most-derived payload class stored here.
    fn class_id(&self) -> ClassId;

    /// `Single` until the first insert of a single-key container.
    fn key_type(&self) -> KeyType;

    /// Number of stored payloads.
    fn entries(&self) -> usize;

    /// Stored ranges in start order.
    fn ranges(&self) -> Vec<IovRange>;

    /// Insert an erased payload, which must be of exactly [`Self::class_id`].
    fn typeless_insert(
        &self,
        range: IovRange,
        obj: Box<PayloadAny>,
        ctx: &EventContext,
    ) -> Result<InsertStatus>;

    /// Payload valid at `time`, with its range.
    fn find_any(&self, time: &IovTime) -> Option<(Arc<PayloadAny>, IovRange)>;

    fn valid(&self, time: &IovTime) -> bool {
        self.find_any(time).is_some()
    }

    fn range(&self, time: &IovTime) -> Option<IovRange> {
        self.find_any(time).map(|(_, range)| range)
    }

    /// Remove the first entry starting at or after `time`.
    fn erase(&self, time: &IovTime, ctx: &EventContext) -> Result<EraseOutcome>;

    /// Extend the stop of the last range; the start must match.
    fn extend_last_range(&self, range: IovRange, ctx: &EventContext) -> Result<InsertStatus>;

    /// Drop leading entries that no live key falls into. Both key lists are
    /// sorted ascending; each container uses the one matching its key type.
    /// Returns the number of payloads removed.
    fn trim(&self, run_lbn_keys: &[IovKey], timestamp_keys: &[IovKey]) -> usize;

    /// Drop all entries without waiting for readers. Single-threaded use only.
    fn clear(&self);

    /// Report that `ctx.slot` holds no references into this store.
    fn quiescent(&self, ctx: &EventContext) -> Result<()>;

    fn n_inserts(&self) -> u64;

    fn max_size(&self) -> usize;

    /// Human-readable dump: identity, entry count, then one range per line.
    fn list(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    /// View `obj`, a payload of this container, as class `target`.
    fn cast<'a>(&self, target: ClassId, obj: &'a PayloadAny) -> Option<&'a PayloadAny>;

    /// Record that `other` depends on this container's validity.
    fn add_dependency(&self, other: &Arc<dyn CondContainer>);

    /// Dependents still alive.
    fn dependents(&self) -> Vec<Arc<dyn CondContainer>>;
}

/// State shared by every container implementation.
pub(crate) struct ContainerCore {
    pub(crate) id: ContainerId,
    pub(crate) registry: Arc<ClassRegistry>,
    pub(crate) updater: Arc<dyn Updater>,
    pub(crate) capacity: usize,
    cleaner: Option<Arc<dyn CleanerHook>>,
    dependents: Mutex<Vec<Weak<dyn CondContainer>>>,
    this: Weak<dyn CondContainer>,
}

impl fmt::Debug for ContainerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerCore")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("has_cleaner", &self.cleaner.is_some())
            .field("dependents", &self.dependents.lock().len())
            .finish_non_exhaustive()
    }
}

/// Construction parameters handed to each container by the store.
#[derive(Clone)]
pub(crate) struct ContainerParts {
    pub(crate) registry: Arc<ClassRegistry>,
    pub(crate) updater: Arc<dyn Updater>,
    pub(crate) capacity: usize,
    pub(crate) cleaner: Option<Arc<dyn CleanerHook>>,
}

impl ContainerCore {
    pub(crate) fn new(id: ContainerId, parts: ContainerParts, this: Weak<dyn CondContainer>) -> Self {
        Self {
            id,
            registry: parts.registry,
            updater: parts.updater,
            capacity: parts.capacity,
            cleaner: parts.cleaner,
            dependents: Mutex::new(Vec::new()),
            this,
        }
    }

    pub(crate) fn map_name(&self) -> String {
        self.id.to_string()
    }

    /// Reject payloads whose runtime type is not this container's class.
    pub(crate) fn check_payload(&self, obj: &PayloadAny) -> Result<()> {
        let info = self.registry.info(self.id.class)?;
        let actual = Any::type_id(obj);
        if actual == info.type_id {
            return Ok(());
        }
        let used = self.registry.class_of_type(actual).map_or(0, |c| c.0);
        warn!(
            target: "cond::condcont",
            container = %self.id,
            expected = self.id.class.0,
            used,
            "condcont_type_mismatch"
        );
        Err(CondError::TypeMismatch {
            container: self.id.to_string(),
            expected: self.id.class.0,
            used,
        })
    }

    /// Tell the cleaner this container gained an object.
    pub(crate) fn notify_added(&self) {
        if let (Some(cleaner), Some(this)) = (&self.cleaner, self.this.upgrade()) {
            cleaner.cond_obj_added(this);
        }
    }

    pub(crate) fn cast<'a>(&self, target: ClassId, obj: &'a PayloadAny) -> Option<&'a PayloadAny> {
        self.registry.cast(obj, self.id.class, target)
    }

    pub(crate) fn add_dependency(&self, other: &Arc<dyn CondContainer>) {
        let mut deps = self.dependents.lock();
        deps.retain(|w| w.strong_count() > 0);
        if deps
            .iter()
            .any(|w| w.upgrade().is_some_and(|d| same_container(&d, other)))
        {
            return;
        }
        debug!(
            target: "cond::condcont",
            container = %self.id,
            dependent = %other.id(),
            "condcont_add_dependency"
        );
        deps.push(Arc::downgrade(other));
    }

    pub(crate) fn dependents(&self) -> Vec<Arc<dyn CondContainer>> {
        self.dependents.lock().iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn list_header(&self, out: &mut dyn fmt::Write, key_type: KeyType, entries: usize) -> fmt::Result {
        writeln!(out, "id: {}  key type: {key_type}  entries: {entries}", self.id)
    }
}

/// Identity comparison on the data pointer, ignoring vtables.
#[must_use]
pub fn same_container(a: &Arc<dyn CondContainer>, b: &Arc<dyn CondContainer>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Coordinate system(s) present on both ends of a range, for messages.
pub(crate) fn describe_range_kind(range: &IovRange) -> &'static str {
    match (range.is_run_lbn(), range.is_timestamp()) {
        (true, true) => "RUNLBN+TIMESTAMP",
        (true, false) => "RUNLBN",
        (false, true) => "TIMESTAMP",
        (false, false) => "none",
    }
}
