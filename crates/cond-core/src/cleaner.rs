//! Delayed trimming of conditions containers.
//!
//! The cleaner keeps the event times of the last `ring_size` events plus
//! those still in flight. A container that gains an object is scheduled
//! for trimming `clean_delay` events later; by then the ring reflects the
//! times that are still reachable, and everything earlier can go.
//!
//! Trimming only unpublishes entries. Memory comes back once the updater
//! sees every slot quiescent, which [`ConditionsCleaner::event_finished`]
//! reports.

use crate::config::CleanerConfig;
use crate::container::{CondContainer, same_container};
use cond_error::Result;
use cond_rcu::Updater;
use cond_types::{EventContext, IovKey, IovTime, SlotId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Receives notifications from containers that gained an object.
pub trait CleanerHook: Send + Sync + fmt::Debug {
    fn cond_obj_added(&self, container: Arc<dyn CondContainer>);
}

/// Counters of a [`ConditionsCleaner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanerStats {
    pub events: u64,
    pub scheduled: u64,
    pub queued: usize,
    pub cleaned_containers: u64,
    pub removed_entries: u64,
    pub reclaimed_objects: u64,
}

struct Scheduled {
    due: u64,
    container: Arc<dyn CondContainer>,
}

#[derive(Default)]
struct CleanerState {
    ring: VecDeque<IovTime>,
    in_flight: HashMap<SlotId, IovTime>,
    queue: VecDeque<Scheduled>,
    stats: CleanerStats,
}

impl CleanerState {
    /// Sorted, deduplicated run-lbn and timestamp keys of live events.
    fn live_keys(&self) -> (Vec<IovKey>, Vec<IovKey>) {
        let times = || self.ring.iter().chain(self.in_flight.values());
        let mut run_lbn: Vec<_> = times().filter_map(IovTime::run_lbn_key).collect();
        let mut timestamp: Vec<_> = times().filter_map(IovTime::timestamp_key).collect();
        run_lbn.sort_unstable();
        run_lbn.dedup();
        timestamp.sort_unstable();
        timestamp.dedup();
        (run_lbn, timestamp)
    }
}

/// Delayed conditions cleaner.
pub struct ConditionsCleaner {
    config: CleanerConfig,
    updater: Arc<dyn Updater>,
    state: Mutex<CleanerState>,
}

impl fmt::Debug for ConditionsCleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionsCleaner")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ConditionsCleaner {
    #[must_use]
    pub fn new(config: CleanerConfig, updater: Arc<dyn Updater>) -> Self {
        Self {
            config,
            updater,
            state: Mutex::new(CleanerState::default()),
        }
    }

    /// Record the start of an event on `ctx.slot`, then clean whatever is
    /// due. Returns the number of entries removed.
    pub fn event_started(&self, ctx: &EventContext) -> Result<usize> {
        self.updater.enter_read(ctx.slot)?;
        {
            let mut state = self.state.lock();
            state.stats.events += 1;
            state.ring.push_back(ctx.event);
            while state.ring.len() > self.config.ring_size {
                state.ring.pop_front();
            }
            state.in_flight.insert(ctx.slot, ctx.event);
            trace!(target: "cond::cleaner", slot = ctx.slot.0, event = %ctx.event, "cleaner_event_started");
        }
        Ok(self.clean_due())
    }

    /// Record the end of an event and mark its slot quiescent.
    pub fn event_finished(&self, ctx: &EventContext) -> Result<()> {
        self.state.lock().in_flight.remove(&ctx.slot);
        self.updater.quiescent(ctx.slot)
    }

    /// Trim every container whose delay has elapsed.
    pub fn clean_due(&self) -> usize {
        let (due, keys) = {
            let mut state = self.state.lock();
            let now = state.stats.events;
            if !state.queue.front().is_some_and(|s| s.due <= now) {
                return 0;
            }
            let mut due = Vec::new();
            while state.queue.front().is_some_and(|s| s.due <= now) {
                if let Some(s) = state.queue.pop_front() {
                    due.push(s.container);
                }
            }
            (due, state.live_keys())
        };
        self.clean(due, &keys)
    }

    /// Trim every scheduled container now, regardless of delay.
    pub fn clean_all(&self) -> usize {
        let (all, keys) = {
            let mut state = self.state.lock();
            let all: Vec<_> = state.queue.drain(..).map(|s| s.container).collect();
            (all, state.live_keys())
        };
        self.clean(all, &keys)
    }

    fn clean(&self, containers: Vec<Arc<dyn CondContainer>>, keys: &(Vec<IovKey>, Vec<IovKey>)) -> usize {
        let (run_lbn, timestamp) = keys;
        let mut done: Vec<Arc<dyn CondContainer>> = Vec::new();
        let mut todo = containers;
        let mut removed = 0;

        while let Some(container) = todo.pop() {
            if done.iter().any(|c| same_container(c, &container)) {
                continue;
            }
            let n = container.trim(run_lbn, timestamp);
            debug!(
                target: "cond::cleaner",
                container = %container.id(),
                removed = n,
                remaining = container.entries(),
                "cleaner_trim"
            );
            removed += n;
            if self.config.cascade {
                todo.extend(container.dependents());
            }
            done.push(container);
        }

        let reclaimed = self.updater.reclaim();
        let mut state = self.state.lock();
        state.stats.cleaned_containers += done.len() as u64;
        state.stats.removed_entries += removed as u64;
        state.stats.reclaimed_objects += reclaimed as u64;
        if !done.is_empty() {
            info!(
                target: "cond::cleaner",
                containers = done.len(),
                removed,
                reclaimed,
                run_lbn_keys = run_lbn.len(),
                timestamp_keys = timestamp.len(),
                "cleaner_pass"
            );
        }
        removed
    }

    #[must_use]
    pub fn stats(&self) -> CleanerStats {
        let state = self.state.lock();
        CleanerStats {
            queued: state.queue.len(),
            ..state.stats
        }
    }
}

impl CleanerHook for ConditionsCleaner {
    fn cond_obj_added(&self, container: Arc<dyn CondContainer>) {
        let mut state = self.state.lock();
        if state
            .queue
            .iter()
            .any(|s| same_container(&s.container, &container))
        {
            return;
        }
        let due = state.stats.events + self.config.clean_delay;
        trace!(target: "cond::cleaner", container = %container.id(), due, "cleaner_schedule");
        state.stats.scheduled += 1;
        state.queue.push_back(Scheduled { due, container });
    }
}
