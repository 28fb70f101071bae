//! Multi-threaded reader/writer suites for `ConcurrentRangeMap`.

use cond_rangemap::ConcurrentRangeMap;
use cond_rcu::{RcuDomain, Updater};
use cond_types::{InsertStatus, IovKey, IovRange, RangeKey, SlotId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn rk(start: u32, stop: u32) -> RangeKey {
    RangeKey::new(
        IovRange::run_lbn((0, start), (0, stop)),
        IovKey::from_run_lbn(0, start),
        IovKey::from_run_lbn(0, stop),
    )
}

struct Payload {
    start: u32,
    stop: u32,
    drops: Arc<AtomicUsize>,
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn find_is_consistent_during_unrelated_insert() {
    let domain = Arc::new(RcuDomain::new(2));
    let map = Arc::new(ConcurrentRangeMap::<Payload>::new(
        "scenario",
        domain.clone() as Arc<dyn Updater>,
        4,
    ));
    let drops = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(2));
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let map = Arc::clone(&map);
        let domain = Arc::clone(&domain);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            barrier.wait();
            let mut hits = 0_u64;
            while !done.load(Ordering::Acquire) {
                domain.enter_read(SlotId(0)).unwrap();
                if let Some((payload, key)) = map.find(IovKey::from_run_lbn(0, 5)) {
                    assert!(key.contains(IovKey::from_run_lbn(0, 5)));
                    assert_eq!((payload.start, payload.stop), (key.start.low(), key.stop.low()));
                    hits += 1;
                }
                domain.mark_quiescent(SlotId(0)).unwrap();
            }
            hits
        })
    };

    barrier.wait();
    for i in 0..500_u32 {
        let (start, stop) = (30 + i * 10, 40 + i * 10);
        let payload = Arc::new(Payload {
            start,
            stop,
            drops: Arc::clone(&drops),
        });
        assert_eq!(map.insert(rk(start, stop), payload, false), Ok(InsertStatus::Success));
        if i == 250 {
            let first = Arc::new(Payload {
                start: 0,
                stop: 10,
                drops: Arc::clone(&drops),
            });
            assert_eq!(map.insert(rk(0, 10), first, false), Ok(InsertStatus::Success));
        }
        let _ = domain.mark_quiescent(SlotId(1));
    }
    done.store(true, Ordering::Release);
    let hits = reader.join().unwrap();

    assert_eq!(map.len(), 501);
    if hits > 0 {
        assert!(map.find(IovKey::from_run_lbn(0, 5)).is_some());
    }
    assert_eq!(drops.load(Ordering::SeqCst), 0, "nothing was removed");
    let _ = domain.reclaim();
    assert_eq!(domain.pending(), 0);
}

#[test]
fn readers_never_observe_freed_payloads_under_trim() {
    const READERS: usize = 4;
    const ROUNDS: u32 = 300;

    let domain = Arc::new(RcuDomain::new(READERS + 1));
    let map = Arc::new(ConcurrentRangeMap::<Payload>::new(
        "trim-stress",
        domain.clone() as Arc<dyn Updater>,
        8,
    ));
    let drops = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(READERS + 1));

    map.insert(
        rk(0, 10),
        Arc::new(Payload {
            start: 0,
            stop: 10,
            drops: Arc::clone(&drops),
        }),
        false,
    )
    .unwrap();

    let readers: Vec<_> = (0..READERS)
        .map(|slot| {
            let map = Arc::clone(&map);
            let domain = Arc::clone(&domain);
            let done = Arc::clone(&done);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // An idle slot must not hold the horizon at its initial epoch.
                domain.mark_quiescent(SlotId(slot)).unwrap();
                barrier.wait();
                let mut probe = 0_u32;
                while !done.load(Ordering::Acquire) {
                    domain.enter_read(SlotId(slot)).unwrap();
                    let snapshot = map.snapshot();
                    for entry in snapshot.entries() {
                        assert_eq!(entry.value.start, entry.key.start.low());
                        assert_eq!(entry.value.stop, entry.key.stop.low());
                    }
                    probe = probe.wrapping_add(7) % (ROUNDS * 10);
                    if let Some((payload, key)) = map.find(IovKey::from_run_lbn(0, probe)) {
                        assert!(payload.start <= probe && probe < payload.stop);
                        assert!(key.contains(IovKey::from_run_lbn(0, probe)));
                    }
                    drop(snapshot);
                    domain.mark_quiescent(SlotId(slot)).unwrap();
                }
            })
        })
        .collect();

    barrier.wait();
    let writer_slot = SlotId(READERS);
    for round in 1..ROUNDS {
        let (start, stop) = (round * 10, round * 10 + 10);
        map.insert(
            rk(start, stop),
            Arc::new(Payload {
                start,
                stop,
                drops: Arc::clone(&drops),
            }),
            false,
        )
        .unwrap();
        // Keep a sliding window of three entries.
        let removed = map.trim(&[IovKey::from_run_lbn(0, start.saturating_sub(20))]);
        assert!(removed <= 1);
        domain.mark_quiescent(writer_slot).unwrap();
    }
    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    let _ = domain.reclaim();
    let live = map.len();
    assert_eq!(drops.load(Ordering::SeqCst) + live, ROUNDS as usize);
    assert_eq!(domain.pending(), 0);
}
