//! Store built from a JSON configuration and driven like an event loop.

use cond::{
    ClassDecl, ClassId, ClassRegistry, CondConfig, CondError, ConditionsStore, EventContext,
    InsertStatus, IovRange, IovTime, SlotId,
};
use std::sync::Arc;

struct Gain(u32);

fn store(json: &serde_json::Value) -> (ConditionsStore, Arc<cond::ConditionsCleaner>) {
    let registry = Arc::new(ClassRegistry::new());
    registry.declare(ClassDecl::new::<Gain>(ClassId(42))).unwrap();
    let config = CondConfig::from_json(&json.to_string()).unwrap();
    ConditionsStore::with_rcu(registry, config).unwrap()
}

#[test]
fn event_loop_keeps_recent_runs_only() {
    let (store, cleaner) = store(&serde_json::json!({
        "slots": 2,
        "cleaner": { "ring_size": 1, "clean_delay": 0 }
    }));
    assert_eq!(store.config().slots, 2);
    let gains = store.create_typed::<Gain>("gains").unwrap();

    for run in 0..10_u32 {
        let status = gains
            .insert(IovRange::run_lbn((run, 0), (run + 1, 0)), Box::new(Gain(run)), &EventContext::for_testing())
            .unwrap();
        assert_eq!(status, InsertStatus::Success);

        let ctx = EventContext::new(SlotId((run % 2) as usize), IovTime::run_lbn(run, 5));
        cleaner.event_started(&ctx).unwrap();
        assert_eq!(gains.find(&ctx.event).map(|g| g.0), Some(run));
        cleaner.event_finished(&ctx).unwrap();
    }

    assert_eq!(gains.entries(), 1);
    assert_eq!(gains.ranges(), vec![IovRange::run_lbn((9, 0), (10, 0))]);
    assert_eq!(store.updater().pending(), 0);
    assert!(cleaner.stats().removed_entries >= 9);
}

#[test]
fn bad_configuration_is_rejected() {
    let err = CondConfig::from_json(r#"{"slots": 0}"#).unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(CondConfig::from_json("{"), Err(CondError::Config(_))));
}
