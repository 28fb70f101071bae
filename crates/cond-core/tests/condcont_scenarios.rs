//! End-to-end container behaviour through the store and typed views.

use cond_core::{
    ClassDecl, ClassId, ClassRegistry, CleanerConfig, CondConfig, CondContainer, CondError,
    ConditionsStore, EventContext, InsertStatus, IovKey, IovRange, IovTime, KeyType,
    SimpleUpdater, SlotId, Updater,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, PartialEq)]
struct Calib {
    name: &'static str,
}

#[derive(Debug)]
struct TunedCalib {
    calib: Calib,
    gain: u32,
}

#[derive(Debug)]
struct Align {
    shift: i32,
}

const CALIB: ClassId = ClassId(1000);
const TUNED: ClassId = ClassId(1001);
const ALIGN: ClassId = ClassId(2000);

fn registry() -> Arc<ClassRegistry> {
    let registry = Arc::new(ClassRegistry::new());
    registry.declare(ClassDecl::new::<Calib>(CALIB)).unwrap();
    registry
        .declare(ClassDecl::new::<TunedCalib>(TUNED).base(CALIB, |t: &TunedCalib| &t.calib))
        .unwrap();
    registry.declare(ClassDecl::new::<Align>(ALIGN).mixed()).unwrap();
    registry
}

fn simple_store() -> ConditionsStore {
    ConditionsStore::new(registry(), Arc::new(SimpleUpdater::new()), CondConfig::default()).unwrap()
}

fn lbn(range: (u32, u32)) -> IovRange {
    IovRange::run_lbn((0, range.0), (0, range.1))
}

fn at(lbn: u32) -> IovTime {
    IovTime::run_lbn(0, lbn)
}

fn calib(name: &'static str) -> Box<Calib> {
    Box::new(Calib { name })
}

fn ctx() -> EventContext {
    EventContext::for_testing()
}

#[test]
fn insert_into_empty_container_then_find() {
    let store = simple_store();
    let cc = store.create_typed::<Calib>("pixels").unwrap();

    assert_eq!(cc.insert(lbn((100, 200)), calib("A"), &ctx()), Ok(InsertStatus::Success));
    let (found, range) = cc.find_with_range(&at(150)).unwrap();
    assert_eq!(found.name, "A");
    assert_eq!(range, lbn((100, 200)));
    assert!(cc.find(&at(250)).is_none());
    assert_eq!(cc.container().key_type(), KeyType::RunLbn);
}

#[test]
fn contained_insert_is_duplicate() {
    let store = simple_store();
    let cc = store.create_typed::<Calib>("pixels").unwrap();
    cc.insert(lbn((100, 200)), calib("A"), &ctx()).unwrap();

    let before = cc.ranges();
    let status = cc.insert(lbn((100, 150)), calib("B"), &ctx()).unwrap();
    assert!(status.is_duplicate());
    assert_eq!(cc.ranges(), before);
    let (found, range) = cc.find_with_range(&at(120)).unwrap();
    assert_eq!((found.name, range), ("A", lbn((100, 200))));
}

#[test]
fn overlapping_insert_is_shifted() {
    let store = simple_store();
    let cc = store.create_typed::<Calib>("pixels").unwrap();
    cc.insert(lbn((100, 200)), calib("A"), &ctx()).unwrap();

    assert_eq!(cc.insert(lbn((150, 300)), calib("B"), &ctx()), Ok(InsertStatus::Overlap));
    assert_eq!(cc.ranges(), vec![lbn((100, 200)), lbn((200, 300))]);
    assert_eq!(cc.find(&at(180)).map(|c| c.name), Some("A"));
    assert_eq!(cc.find(&at(250)).map(|c| c.name), Some("B"));
}

#[test]
fn extend_last_range_keeps_payload() {
    let store = simple_store();
    let cc = store.create_typed::<Calib>("pixels").unwrap();
    cc.insert(lbn((100, 200)), calib("A"), &ctx()).unwrap();

    assert_eq!(cc.extend_last_range(lbn((100, 250)), &ctx()), Ok(InsertStatus::Extended));
    let (found, range) = cc.find_with_range(&at(220)).unwrap();
    assert_eq!((found.name, range), ("A", lbn((100, 250))));

    assert_eq!(cc.extend_last_range(lbn((100, 220)), &ctx()), Ok(InsertStatus::Duplicate));
    assert_eq!(cc.range(&at(240)), Some(lbn((100, 250))));
}

#[test]
fn trim_removes_earliest_unreachable_entry() {
    let store = simple_store();
    let cc = store.create_typed::<Calib>("pixels").unwrap();
    for (range, name) in [((0, 10), "A"), ((10, 20), "B"), ((20, 30), "C")] {
        cc.insert(lbn(range), calib(name), &ctx()).unwrap();
    }
    let removed = cc.container().trim(&[IovKey::from_run_lbn(0, 15)], &[]);
    assert_eq!(removed, 1);
    assert_eq!(cc.entries(), 2);
    assert!(cc.find(&at(5)).is_none());
}

#[test]
fn base_view_reads_but_cannot_insert() {
    let store = simple_store();
    let tuned = store.create_typed::<TunedCalib>("gains").unwrap();
    tuned
        .insert(
            lbn((0, 100)),
            Box::new(TunedCalib {
                calib: Calib { name: "T" },
                gain: 3,
            }),
            &ctx(),
        )
        .unwrap();

    let base = store.view::<Calib>(TUNED, "gains").unwrap();
    let found = base.find(&at(10)).unwrap();
    assert_eq!(found.name, "T");
    assert_eq!(tuned.find(&at(10)).map(|t| t.gain), Some(3));

    let err = base.insert(lbn((100, 200)), calib("X"), &ctx()).unwrap_err();
    assert_eq!(
        err,
        CondError::TypeMismatch {
            container: "gains (clid 1001)".into(),
            expected: 1001,
            used: 1000,
        }
    );
    assert_eq!(tuned.entries(), 1);

    // Derived view of a base container is not allowed.
    store.create_typed::<Calib>("plain").unwrap();
    assert!(matches!(
        store.view::<TunedCalib>(CALIB, "plain"),
        Err(CondError::TypeMismatch { .. })
    ));

    let container = tuned.container();
    let obj = container.find_any(&at(10)).unwrap().0;
    let as_base = container.cast(CALIB, &*obj).and_then(|b| b.downcast_ref::<Calib>());
    assert_eq!(as_base, Some(&Calib { name: "T" }));
    assert!(container.cast(ALIGN, &*obj).is_none());
}

#[test]
fn handle_outlives_trimmed_entry() {
    let store = simple_store();
    let cc = store.create_typed::<Calib>("pixels").unwrap();
    cc.insert(lbn((0, 10)), calib("A"), &ctx()).unwrap();
    cc.insert(lbn((10, 20)), calib("B"), &ctx()).unwrap();

    let held = cc.find(&at(5)).unwrap();
    assert_eq!(cc.container().trim(&[IovKey::from_run_lbn(0, 15)], &[]), 1);
    assert_eq!(held.name, "A");
}

#[test]
fn store_catalogues_containers_by_class_and_key() {
    let store = simple_store();
    let a: Arc<dyn CondContainer> = store.create(CALIB, "pixels").unwrap();
    let again = store.create(CALIB, "pixels").unwrap();
    assert!(cond_core::same_container(&a, &again));
    store.create(CALIB, "strips").unwrap();
    store.create(ALIGN, "pixels").unwrap();

    let ids: Vec<_> = store.containers().iter().map(|c| c.id().to_string()).collect();
    assert_eq!(
        ids,
        vec!["pixels (clid 1000)", "strips (clid 1000)", "pixels (clid 2000)"]
    );
    assert_eq!(store.get(ALIGN, "pixels").map(|c| c.key_type()), Some(KeyType::Mixed));
    assert!(matches!(store.create(ClassId(9), "x"), Err(CondError::UnknownClass(_))));
    assert!(store.view::<Calib>(CALIB, "missing").is_err());
}

#[test]
fn mixed_container_through_typed_view() {
    let store = simple_store();
    let align = store.create_typed::<Align>("align").unwrap();
    let range = IovRange::new(IovTime::mixed(1, 0, 1000, 0), IovTime::mixed(2, 0, 2000, 0));
    assert_eq!(align.insert(range, Box::new(Align { shift: -4 }), &ctx()), Ok(InsertStatus::Success));

    assert_eq!(align.find(&IovTime::mixed(1, 7, 1500, 0)).map(|a| a.shift), Some(-4));
    assert!(align.find(&IovTime::mixed(1, 7, 2500, 0)).is_none());
    assert!(matches!(
        align.erase(&IovTime::mixed(1, 0, 1000, 0), &ctx()),
        Err(CondError::Unsupported { .. })
    ));
}

#[test]
fn cleaner_trims_after_delay_and_cascades() {
    let config = CondConfig {
        slots: 1,
        cleaner: CleanerConfig {
            ring_size: 2,
            clean_delay: 2,
            cascade: true,
        },
        ..CondConfig::default()
    };
    let (store, cleaner) = ConditionsStore::with_rcu(registry(), config).unwrap();
    let raw = store.create_typed::<Calib>("raw").unwrap();
    let derived = store.create_typed::<TunedCalib>("derived").unwrap();
    raw.container().add_dependency(derived.container());

    for run in 0..3_u32 {
        let range = IovRange::run_lbn((run, 0), (run + 1, 0));
        raw.insert(range, calib("R"), &ctx()).unwrap();
        derived
            .insert(
                range,
                Box::new(TunedCalib {
                    calib: Calib { name: "D" },
                    gain: run,
                }),
                &ctx(),
            )
            .unwrap();
    }
    assert_eq!(cleaner.stats().queued, 2, "one schedule per container");

    let event = |run| EventContext::new(SlotId(0), IovTime::run_lbn(run, 3));
    assert_eq!(cleaner.event_started(&event(2)).unwrap(), 0, "not due yet");
    cleaner.event_finished(&event(2)).unwrap();
    let removed = cleaner.event_started(&event(2)).unwrap();
    assert_eq!(removed, 4, "runs 0 and 1 from both containers");
    cleaner.event_finished(&event(2)).unwrap();

    assert_eq!(raw.entries(), 1);
    assert_eq!(derived.entries(), 1);
    let stats = cleaner.stats();
    assert_eq!(stats.events, 2);
    assert_eq!(stats.cleaned_containers, 2);
    assert_eq!(stats.queued, 0);
    assert_eq!(store.updater().pending(), 0);
}

#[test]
fn cleaner_keeps_entries_of_in_flight_events() {
    let config = CondConfig {
        slots: 2,
        cleaner: CleanerConfig {
            ring_size: 1,
            clean_delay: 0,
            cascade: false,
        },
        ..CondConfig::default()
    };
    let (store, cleaner) = ConditionsStore::with_rcu(registry(), config).unwrap();
    let cc = store.create_typed::<Calib>("pixels").unwrap();

    let slow = EventContext::new(SlotId(0), IovTime::run_lbn(1, 0));
    cleaner.event_started(&slow).unwrap();
    for run in 0..4_u32 {
        cc.insert(IovRange::run_lbn((run, 0), (run + 1, 0)), calib("C"), &ctx())
            .unwrap();
    }
    let fast = EventContext::new(SlotId(1), IovTime::run_lbn(3, 0));
    let removed = cleaner.event_started(&fast).unwrap();

    // Run 1 is still being processed on slot 0.
    assert_eq!(removed, 1);
    assert!(cc.valid(&IovTime::run_lbn(1, 0)));
    assert!(!cc.valid(&IovTime::run_lbn(0, 0)));

    // Nothing is released while slot 0 is inside its event.
    assert!(store.updater().pending() > 0);
    cleaner.event_finished(&fast).unwrap();
    cleaner.event_finished(&slow).unwrap();
    assert_eq!(store.updater().pending(), 0);
}

#[test]
fn failed_and_duplicate_inserts_drop_payload() {
    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let registry = registry();
    registry.declare(ClassDecl::new::<Tracked>(ClassId(3000))).unwrap();
    let updater: Arc<dyn Updater> = Arc::new(SimpleUpdater::new());
    let store = ConditionsStore::new(registry, updater, CondConfig::default()).unwrap();
    let cc = store.create_typed::<Tracked>("tracked").unwrap();
    let drops = Arc::new(AtomicUsize::new(0));

    cc.insert(lbn((0, 10)), Box::new(Tracked(Arc::clone(&drops))), &ctx()).unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    cc.insert(lbn((2, 5)), Box::new(Tracked(Arc::clone(&drops))), &ctx()).unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 1, "duplicate payload dropped");

    let err = cc.insert(IovRange::timestamp(1, 2), Box::new(Tracked(Arc::clone(&drops))), &ctx());
    assert!(err.is_err());
    assert_eq!(drops.load(Ordering::SeqCst), 2, "rejected payload dropped");

    cc.container().clear();
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

#[test]
fn list_dump_is_stable() {
    let store = simple_store();
    let cc = store.create_typed::<Calib>("pixels").unwrap();
    cc.insert(IovRange::timestamp(10, 20), calib("A"), &ctx()).unwrap();
    cc.insert(IovRange::timestamp(20, 30), calib("B"), &ctx()).unwrap();

    let mut out = String::new();
    cc.container().list(&mut out).unwrap();
    assert_eq!(
        out,
        "id: pixels (clid 1000)  key type: TIMESTAMP  entries: 2\n\
         {[t:10.000000000] - [t:20.000000000]}\n\
         {[t:20.000000000] - [t:30.000000000]}\n"
    );
    assert_eq!(cc.container().n_inserts(), 2);
    assert_eq!(cc.container().max_size(), 2);
}

#[test]
fn quiescent_rejects_unknown_slot() {
    let (store, _cleaner) = ConditionsStore::with_rcu(registry(), CondConfig::default()).unwrap();
    let cc = store.create(CALIB, "pixels").unwrap();
    assert!(cc.quiescent(&EventContext::new(SlotId(0), IovTime::default())).is_ok());
    assert!(matches!(
        cc.quiescent(&EventContext::new(SlotId(99), IovTime::default())),
        Err(CondError::BadSlot { slot: 99, .. })
    ));
}
