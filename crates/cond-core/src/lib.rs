#![forbid(unsafe_code)]
//! Conditions containers.
//!
//! A conditions container maps validity ranges (IOVs) to immutable payload
//! objects. Many worker threads look up the payload valid for their event
//! while an updater inserts objects for upcoming ranges and a cleaner trims
//! ranges no event can reach anymore. Readers never block and never see
//! a payload freed under them.
//!
//! # Layers
//!
//! - [`ClassRegistry`]: payload classes, base relations and upcasts.
//! - [`CondContainer`]: erased container interface, implemented by
//!   [`SingleCondCont`] (run-lbn *or* timestamp keyed) and
//!   [`MixedCondCont`] (run-lbn, then timestamp).
//! - [`CondCont`]: typed view; [`CondRef`] is the handle lookups return.
//! - [`ConditionsStore`]: factory and catalogue, wiring every container to
//!   one updater and one [`ConditionsCleaner`].
//!
//! # Logging
//!
//! - **INFO**  `cond::registry`: `class_declared`
//! - **INFO**  `cond::condcont`: `condcont_created`, `condcont_key_type_latched`
//! - **DEBUG** `cond::condcont`: `condcont_insert`, `condcont_erase`, `condcont_extend`, `condcont_add_dependency`
//! - **WARN**  `cond::condcont`: `condcont_insert_rejected`, `condcont_type_mismatch`
//! - **INFO**  `cond::cleaner`: `cleaner_pass`; **DEBUG** `cleaner_trim`

mod cleaner;
mod config;
mod container;
mod mixed;
mod registry;
mod single;
mod store;
mod typed;

pub use cleaner::{CleanerHook, CleanerStats, ConditionsCleaner};
pub use config::{CleanerConfig, CondConfig};
pub use container::{CondContainer, ContainerId, same_container};
pub use mixed::MixedCondCont;
pub use registry::{ClassDecl, ClassInfo, ClassRegistry, PayloadAny, Upcast};
pub use single::SingleCondCont;
pub use store::ConditionsStore;
pub use typed::{CondCont, CondRef};

pub use cond_error::{CondError, Result};
pub use cond_rcu::{RcuDomain, RcuStats, SimpleUpdater, Updater};
pub use cond_types::{
    ClassId, EraseOutcome, EventContext, InsertStatus, IovKey, IovRange, IovTime, KeyType, SlotId,
};
