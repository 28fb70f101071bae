//! Typed views over erased containers.

use crate::container::CondContainer;
use crate::registry::{ClassRegistry, PayloadAny, Upcast, apply_chain};
use cond_error::{CondError, Result};
use cond_types::{ClassId, EraseOutcome, EventContext, InsertStatus, IovRange, IovTime};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// Shared handle to a payload, seen as `T`.
///
/// Keeps the stored object alive independently of the container, so the
/// handle stays valid after the entry is trimmed.
pub struct CondRef<T: Any + Send + Sync> {
    owner: Arc<PayloadAny>,
    chain: Arc<[Upcast]>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> CondRef<T> {
    fn new(owner: Arc<PayloadAny>, chain: Arc<[Upcast]>) -> Option<Self> {
        let r = Self {
            owner,
            chain,
            _marker: PhantomData,
        };
        r.resolve().is_some().then_some(r)
    }

    fn resolve(&self) -> Option<&T> {
        apply_chain(&*self.owner, &self.chain)?.downcast_ref::<T>()
    }

    /// The stored object, as its most-derived type.
    #[must_use]
    pub fn object(&self) -> &Arc<PayloadAny> {
        &self.owner
    }
}

impl<T: Any + Send + Sync> Clone for CondRef<T> {
    fn clone(&self) -> Self {
        Self {
            owner: Arc::clone(&self.owner),
            chain: Arc::clone(&self.chain),
            _marker: PhantomData,
        }
    }
}

impl<T: Any + Send + Sync> Deref for CondRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.resolve()
            .expect("CondRef is only built after its upcast chain resolves")
    }
}

impl<T: Any + Send + Sync + fmt::Debug> fmt::Debug for CondRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CondRef").field(&**self).finish()
    }
}

/// A container seen through payload type `T`.
///
/// `T` is the container's class or one of its declared bases. Lookups work
/// through any view; inserts only through the container's own class.
pub struct CondCont<T: Any + Send + Sync> {
    container: Arc<dyn CondContainer>,
    class: ClassId,
    chain: Arc<[Upcast]>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Clone for CondCont<T> {
    fn clone(&self) -> Self {
        Self {
            container: Arc::clone(&self.container),
            class: self.class,
            chain: Arc::clone(&self.chain),
            _marker: PhantomData,
        }
    }
}

impl<T: Any + Send + Sync> fmt::Debug for CondCont<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CondCont")
            .field("container", self.container.id())
            .field("view_class", &self.class)
            .finish_non_exhaustive()
    }
}

impl<T: Any + Send + Sync> CondCont<T> {
    /// View `container` as `T`.
    pub fn new(container: Arc<dyn CondContainer>, registry: &ClassRegistry) -> Result<Self> {
        let class = registry.class_of::<T>()?;
        let chain = registry
            .upcast_chain(container.class_id(), class)
            .ok_or_else(|| CondError::TypeMismatch {
                container: container.id().to_string(),
                expected: container.class_id().0,
                used: class.0,
            })?;
        Ok(Self {
            container,
            class,
            chain: chain.into(),
            _marker: PhantomData,
        })
    }

    /// Class of `T`.
    #[must_use]
    pub fn class_id(&self) -> ClassId {
        self.class
    }

    #[must_use]
    pub fn container(&self) -> &Arc<dyn CondContainer> {
        &self.container
    }

    /// Insert `obj` over `range`. Only valid through the container's own
    /// class; a base-class view fails with `TypeMismatch` and drops `obj`.
    pub fn insert(&self, range: IovRange, obj: Box<T>, ctx: &EventContext) -> Result<InsertStatus> {
        let stored = self.container.class_id();
        if self.class != stored {
            return Err(CondError::TypeMismatch {
                container: self.container.id().to_string(),
                expected: stored.0,
                used: self.class.0,
            });
        }
        self.container.typeless_insert(range, obj, ctx)
    }

    #[must_use]
    pub fn find(&self, time: &IovTime) -> Option<CondRef<T>> {
        self.find_with_range(time).map(|(obj, _)| obj)
    }

    #[must_use]
    pub fn find_with_range(&self, time: &IovTime) -> Option<(CondRef<T>, IovRange)> {
        let (obj, range) = self.container.find_any(time)?;
        Some((CondRef::new(obj, Arc::clone(&self.chain))?, range))
    }

    #[must_use]
    pub fn valid(&self, time: &IovTime) -> bool {
        self.container.valid(time)
    }

    #[must_use]
    pub fn range(&self, time: &IovTime) -> Option<IovRange> {
        self.container.range(time)
    }

    pub fn erase(&self, time: &IovTime, ctx: &EventContext) -> Result<EraseOutcome> {
        self.container.erase(time, ctx)
    }

    pub fn extend_last_range(&self, range: IovRange, ctx: &EventContext) -> Result<InsertStatus> {
        self.container.extend_last_range(range, ctx)
    }

    #[must_use]
    pub fn entries(&self) -> usize {
        self.container.entries()
    }

    #[must_use]
    pub fn ranges(&self) -> Vec<IovRange> {
        self.container.ranges()
    }
}
