#![forbid(unsafe_code)]
//! Read-Copy-Update primitives for the conditions store.
//!
//! # Design
//!
//! - **Publication**: [`RcuCell`] holds the current immutable snapshot in an
//!   [`arc_swap::ArcSwap`]. Readers load it without locks; a writer swaps in
//!   a new snapshot and receives the superseded one back.
//!
//! - **Retirement**: the superseded snapshot (and, through it, any payloads
//!   it alone referenced) is handed to an [`Updater`]. The updater decides
//!   when the container's last reference is dropped.
//!
//! - **Quiescence**: [`RcuDomain`] tracks one epoch per worker slot. Retired
//!   objects are released only after every slot has passed a quiescent
//!   point (or re-entered a read) since the retirement. [`SimpleUpdater`]
//!   releases immediately and is meant for single-threaded tests.
//!
//! Readers that still hold an `Arc` to a retired snapshot keep it alive
//! regardless; the updater only governs when the *container* lets go.
//!
//! # Logging
//!
//! - **TRACE** `cond::rcu`: `rcu_cell_load`, `rcu_enter_read`
//! - **DEBUG** `cond::rcu`: `rcu_cell_publish`, `rcu_retire`, `rcu_reclaim`
//! - **WARN**  `cond::rcu`: `rcu_backlog_growth`: retirement queue past the warning threshold

mod cell;
mod domain;

pub use cell::RcuCell;
pub use domain::{RcuDomain, RcuStats};

use cond_error::Result;
use cond_types::SlotId;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Type-erased object awaiting reclamation.
pub type Garbage = Box<dyn Any + Send + Sync>;

/// Publish-and-retire strategy shared by all range maps of a store.
pub trait Updater: Send + Sync + fmt::Debug {
    /// Take ownership of objects superseded by a publish.
    ///
    /// Returns the generation the objects were retired under.
    fn retire(&self, garbage: Vec<Garbage>) -> u64;

    /// Record that `slot` starts a unit of work; returns the generation it
    /// observes.
    fn enter_read(&self, slot: SlotId) -> Result<u64>;

    /// Declare that `slot` holds no references into past snapshots.
    fn quiescent(&self, slot: SlotId) -> Result<()>;

    /// Release every retirement that no slot can still observe.
    ///
    /// Returns the number of objects released. Safe to call at any time,
    /// any number of times.
    fn reclaim(&self) -> usize;

    /// Objects retired but not yet released.
    fn pending(&self) -> usize;
}

/// Updater that releases retired objects on the spot.
///
/// Only correct when no other thread can be reading the superseded
/// snapshot, i.e. single-threaded setup and tests.
#[derive(Debug, Default)]
pub struct SimpleUpdater {
    generation: AtomicU64,
}

impl SimpleUpdater {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Updater for SimpleUpdater {
    fn retire(&self, garbage: Vec<Garbage>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(
            target: "cond::rcu",
            generation,
            objects = garbage.len(),
            "simple_updater_release"
        );
        drop(garbage);
        generation
    }

    fn enter_read(&self, _slot: SlotId) -> Result<u64> {
        Ok(self.generation())
    }

    fn quiescent(&self, _slot: SlotId) -> Result<()> {
        Ok(())
    }

    fn reclaim(&self) -> usize {
        0
    }

    fn pending(&self) -> usize {
        0
    }
}
