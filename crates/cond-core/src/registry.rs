//! Process-wide payload class registry.
//!
//! Every payload type stored in a conditions container is declared once,
//! at startup, with a numeric class id and optionally a single base class.
//! The declaration of a derived class carries the upcast from the derived
//! payload to its base, so a container of `D` can hand out `&B` without the
//! store knowing either type statically.

use cond_error::{CondError, Result};
use cond_types::ClassId;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Type-erased payload as stored by the containers.
pub type PayloadAny = dyn Any + Send + Sync;

/// One derived-to-base step on an erased payload. `None` when the payload
/// is not of the derived type the step was declared for.
pub type Upcast = Arc<dyn Fn(&PayloadAny) -> Option<&PayloadAny> + Send + Sync>;

fn upcast_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a PayloadAny) -> Option<&'a PayloadAny> + Send + Sync + 'static,
{
    f
}

fn erase_upcast<D, B, F>(upcast: F) -> Upcast
where
    D: Any + Send + Sync,
    B: Any + Send + Sync,
    F: Fn(&D) -> &B + Send + Sync + 'static,
{
    Arc::new(upcast_fn(move |obj| {
        obj.downcast_ref::<D>().map(|d| upcast(d) as &PayloadAny)
    }))
}

/// Declaration of a payload class, consumed by [`ClassRegistry::declare`].
///
/// ```
/// use cond_core::{ClassDecl, ClassRegistry};
/// use cond_types::ClassId;
///
/// struct Base(u32);
/// struct Derived { base: Base }
///
/// let registry = ClassRegistry::new();
/// registry.declare(ClassDecl::new::<Base>(ClassId(10))).unwrap();
/// registry
///     .declare(ClassDecl::new::<Derived>(ClassId(11)).base(ClassId(10), |d: &Derived| &d.base))
///     .unwrap();
/// assert!(registry.is_base_of(ClassId(10), ClassId(11)));
/// ```
pub struct ClassDecl {
    id: ClassId,
    name: &'static str,
    type_id: TypeId,
    mixed: bool,
    base: Option<BaseDecl>,
    declared_from: TypeId,
}

struct BaseDecl {
    id: ClassId,
    type_id: TypeId,
    upcast: Upcast,
}

impl ClassDecl {
    #[must_use]
    pub fn new<T: Any + Send + Sync>(id: ClassId) -> Self {
        Self {
            id,
            name: short_type_name::<T>(),
            type_id: TypeId::of::<T>(),
            mixed: false,
            base: None,
            declared_from: TypeId::of::<T>(),
        }
    }

    /// Containers of this class are keyed by run-lbn and timestamp.
    #[must_use]
    pub fn mixed(mut self) -> Self {
        self.mixed = true;
        self
    }

    /// Declare `B` (class `base`) as the base of this class.
    ///
    /// `D` must be the type this declaration was created for; a mismatch is
    /// reported by [`ClassRegistry::declare`].
    #[must_use]
    pub fn base<B, D, F>(mut self, base: ClassId, upcast: F) -> Self
    where
        B: Any + Send + Sync,
        D: Any + Send + Sync,
        F: Fn(&D) -> &B + Send + Sync + 'static,
    {
        self.base = Some(BaseDecl {
            id: base,
            type_id: TypeId::of::<B>(),
            upcast: erase_upcast(upcast),
        });
        self.declared_from = TypeId::of::<D>();
        self
    }
}

/// Registered class.
pub struct ClassInfo {
    pub id: ClassId,
    pub name: &'static str,
    pub type_id: TypeId,
    pub mixed: bool,
    pub base: Option<ClassId>,
    upcast: Option<Upcast>,
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mixed", &self.mixed)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Classes {
    by_id: HashMap<ClassId, Arc<ClassInfo>>,
    by_type: HashMap<TypeId, ClassId>,
}

/// Registry of payload classes and their base relations.
#[derive(Default)]
pub struct ClassRegistry {
    classes: RwLock<Classes>,
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes = self.classes.read();
        let mut ids: Vec<_> = classes.by_id.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("ClassRegistry").field("classes", &ids).finish()
    }
}

impl ClassRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Bases must be declared before derived classes.
    pub fn declare(&self, decl: ClassDecl) -> Result<()> {
        let mut classes = self.classes.write();
        if classes.by_id.contains_key(&decl.id) {
            return Err(CondError::DuplicateClass(format!("class id {}", decl.id)));
        }
        if classes.by_type.contains_key(&decl.type_id) {
            return Err(CondError::DuplicateClass(format!("payload type {}", decl.name)));
        }

        let (base, upcast) = match decl.base {
            None => (None, None),
            Some(base) => {
                let Some(info) = classes.by_id.get(&base.id) else {
                    return Err(CondError::BaseMismatch {
                        class: decl.id.0,
                        reason: format!("base class {} is not declared", base.id),
                    });
                };
                if info.type_id != base.type_id {
                    return Err(CondError::BaseMismatch {
                        class: decl.id.0,
                        reason: format!("class {} is not declared with this payload type", base.id),
                    });
                }
                if decl.declared_from != decl.type_id {
                    return Err(CondError::BaseMismatch {
                        class: decl.id.0,
                        reason: "upcast does not take this class's payload type".to_owned(),
                    });
                }
                if decl.mixed && !info.mixed {
                    return Err(CondError::BaseMismatch {
                        class: decl.id.0,
                        reason: format!("mixed class cannot derive from non-mixed class {}", base.id),
                    });
                }
                (Some(base.id), Some(base.upcast))
            }
        };

        info!(
            target: "cond::registry",
            class = decl.id.0,
            name = decl.name,
            mixed = decl.mixed,
            base = base.map(|b| b.0),
            "class_declared"
        );
        classes.by_type.insert(decl.type_id, decl.id);
        classes.by_id.insert(
            decl.id,
            Arc::new(ClassInfo {
                id: decl.id,
                name: decl.name,
                type_id: decl.type_id,
                mixed: decl.mixed,
                base,
                upcast,
            }),
        );
        Ok(())
    }

    pub fn info(&self, id: ClassId) -> Result<Arc<ClassInfo>> {
        self.classes
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| CondError::UnknownClass(format!("class id {id}")))
    }

    /// Class id declared for payload type `T`.
    pub fn class_of<T: Any>(&self) -> Result<ClassId> {
        self.class_of_type(TypeId::of::<T>())
            .ok_or_else(|| CondError::UnknownClass(format!("payload type {}", short_type_name::<T>())))
    }

    /// Class id declared for a runtime type, if any.
    #[must_use]
    pub fn class_of_type(&self, type_id: TypeId) -> Option<ClassId> {
        self.classes.read().by_type.get(&type_id).copied()
    }

    /// Whether `base` is `derived` or one of its ancestors.
    #[must_use]
    pub fn is_base_of(&self, base: ClassId, derived: ClassId) -> bool {
        self.upcast_chain(derived, base).is_some()
    }

    /// Upcasts leading from class `from` to its ancestor `to`, innermost
    /// first. Empty when the classes are equal, `None` when `to` is not an
    /// ancestor of `from`.
    #[must_use]
    pub fn upcast_chain(&self, from: ClassId, to: ClassId) -> Option<Vec<Upcast>> {
        let classes = self.classes.read();
        let mut chain = Vec::new();
        let mut current = classes.by_id.get(&from)?;
        while current.id != to {
            chain.push(Arc::clone(current.upcast.as_ref()?));
            current = classes.by_id.get(&current.base?)?;
        }
        Some(chain)
    }

    /// View `obj`, a payload of class `from`, as class `to`.
    ///
    /// `None` when the classes are unrelated or `obj` is not actually of
    /// class `from`.
    #[must_use]
    pub fn cast<'a>(&self, obj: &'a PayloadAny, from: ClassId, to: ClassId) -> Option<&'a PayloadAny> {
        let chain = self.upcast_chain(from, to)?;
        let expected = self.info(to).ok()?.type_id;
        let cast = apply_chain(obj, &chain)?;
        ((*cast).type_id() == expected).then_some(cast)
    }

    /// Declared class ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<ClassId> {
        let mut ids: Vec<_> = self.classes.read().by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

pub(crate) fn apply_chain<'a>(obj: &'a PayloadAny, chain: &[Upcast]) -> Option<&'a PayloadAny> {
    chain.iter().try_fold(obj, |obj, step| step(obj))
}

/// Last path segment of the type name, generics included.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let head = full.split('<').next().unwrap_or(full);
    head.rfind("::").map_or(full, |i| &full[i + 2..])
}
