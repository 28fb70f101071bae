#![forbid(unsafe_code)]
//! Conditions store public API facade.
//!
//! Re-exports `cond-core` through a stable external interface. Downstream
//! event loops depend on this crate rather than on the layers below it.
//!
//! ```
//! use cond::{ClassDecl, ClassId, ClassRegistry, CondConfig, ConditionsStore};
//! use cond::{EventContext, IovRange, IovTime, SlotId};
//! use std::sync::Arc;
//!
//! struct Pedestal(f32);
//!
//! let registry = Arc::new(ClassRegistry::new());
//! registry.declare(ClassDecl::new::<Pedestal>(ClassId(7))).unwrap();
//! let (store, cleaner) = ConditionsStore::with_rcu(registry, CondConfig::default()).unwrap();
//!
//! let peds = store.create_typed::<Pedestal>("pedestals").unwrap();
//! peds.insert(IovRange::run_lbn((1, 0), (2, 0)), Box::new(Pedestal(0.5)), &EventContext::for_testing())
//!     .unwrap();
//!
//! let ctx = EventContext::new(SlotId(0), IovTime::run_lbn(1, 17));
//! cleaner.event_started(&ctx).unwrap();
//! assert_eq!(peds.find(&ctx.event).map(|p| p.0), Some(0.5));
//! cleaner.event_finished(&ctx).unwrap();
//! ```

pub use cond_core::*;
