//! Ordering and merge policies for validity ranges.
//!
//! Everything here is pure. The range map applies [`try_extend_tail`]
//! against its last entry first, then [`resolve_overlap`] against each
//! neighbour of the incoming range, so that the published set stays sorted
//! and non-overlapping.

use crate::{IovKey, IovRange, RangeKey};
use std::cmp::Ordering;

/// Total order on packed keys.
#[inline]
#[must_use]
pub fn compare(a: IovKey, b: IovKey) -> Ordering {
    a.cmp(&b)
}

/// `range.start <= point < range.stop`.
#[inline]
#[must_use]
pub fn in_range(point: IovKey, range: &RangeKey) -> bool {
    point >= range.start && point < range.stop
}

/// Outcome of checking an incoming range against one existing range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// No intersection; the incoming range is unchanged.
    Disjoint,
    /// Intersection removed by shrinking the incoming range.
    Adjusted(RangeKey),
    /// Incoming range lies entirely inside the existing one.
    Duplicate,
}

/// Resolve the intersection of `incoming` with `existing`.
///
/// The existing range always wins. When the incoming range starts inside
/// the existing one its start is pushed forward to `existing.stop`; when it
/// starts before, its stop is pulled back to `existing.start`. The start is
/// never moved backwards.
#[must_use]
pub fn resolve_overlap(existing: &RangeKey, incoming: &RangeKey) -> Overlap {
    if incoming.stop <= existing.start || incoming.start >= existing.stop {
        return Overlap::Disjoint;
    }
    if incoming.start >= existing.start && incoming.stop <= existing.stop {
        return Overlap::Duplicate;
    }
    if incoming.start >= existing.start {
        Overlap::Adjusted(RangeKey::new(
            IovRange::new(existing.range.stop, incoming.range.stop),
            existing.stop,
            incoming.stop,
        ))
    } else {
        Overlap::Adjusted(RangeKey::new(
            IovRange::new(incoming.range.start, existing.range.start),
            incoming.start,
            existing.start,
        ))
    }
}

/// Outcome of offering an incoming range as an extension of the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// Starts differ; fall through to overlap resolution.
    NoChange,
    /// Same start, later stop: the last range becomes this.
    Extended(RangeKey),
    /// Same start, stop not later: nothing to do.
    Duplicate,
}

#[must_use]
pub fn try_extend_tail(last: &RangeKey, incoming: &RangeKey) -> Extension {
    if incoming.start != last.start {
        return Extension::NoChange;
    }
    if incoming.stop > last.stop {
        Extension::Extended(RangeKey::new(
            IovRange::new(last.range.start, incoming.range.stop),
            last.start,
            incoming.stop,
        ))
    } else {
        Extension::Duplicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IovTime;
    use proptest::prelude::*;

    fn rk(start: u32, stop: u32) -> RangeKey {
        RangeKey::new(
            IovRange::run_lbn((0, start), (0, stop)),
            IovKey::from_run_lbn(0, start),
            IovKey::from_run_lbn(0, stop),
        )
    }

    #[test]
    fn point_in_range_is_half_open() {
        let r = rk(100, 200);
        assert!(in_range(IovKey::from_run_lbn(0, 100), &r));
        assert!(in_range(IovKey::from_run_lbn(0, 199), &r));
        assert!(!in_range(IovKey::from_run_lbn(0, 200), &r));
        assert!(!in_range(IovKey::from_run_lbn(0, 99), &r));
        assert_eq!(
            compare(IovKey::from_run_lbn(1, 0), IovKey::from_run_lbn(0, 9)),
            Ordering::Greater
        );
    }

    #[test]
    fn disjoint_and_touching_ranges() {
        assert_eq!(resolve_overlap(&rk(100, 200), &rk(200, 300)), Overlap::Disjoint);
        assert_eq!(resolve_overlap(&rk(100, 200), &rk(0, 100)), Overlap::Disjoint);
    }

    #[test]
    fn contained_range_is_duplicate() {
        assert_eq!(resolve_overlap(&rk(100, 200), &rk(100, 150)), Overlap::Duplicate);
        assert_eq!(resolve_overlap(&rk(100, 200), &rk(120, 200)), Overlap::Duplicate);
        assert_eq!(resolve_overlap(&rk(100, 200), &rk(100, 200)), Overlap::Duplicate);
    }

    #[test]
    fn tail_overlap_pushes_start_forward() {
        let Overlap::Adjusted(adj) = resolve_overlap(&rk(100, 200), &rk(150, 300)) else {
            panic!("expected adjustment");
        };
        assert_eq!(adj.start, IovKey::from_run_lbn(0, 200));
        assert_eq!(adj.stop, IovKey::from_run_lbn(0, 300));
        assert_eq!(adj.range.start, IovTime::run_lbn(0, 200));
        assert_eq!(adj.range.stop, IovTime::run_lbn(0, 300));
    }

    #[test]
    fn head_overlap_pulls_stop_back() {
        let Overlap::Adjusted(adj) = resolve_overlap(&rk(100, 200), &rk(50, 150)) else {
            panic!("expected adjustment");
        };
        assert_eq!(adj.start, IovKey::from_run_lbn(0, 50));
        assert_eq!(adj.stop, IovKey::from_run_lbn(0, 100));

        // Incoming covering the existing range keeps only its head.
        let Overlap::Adjusted(adj) = resolve_overlap(&rk(100, 200), &rk(50, 300)) else {
            panic!("expected adjustment");
        };
        assert_eq!((adj.start, adj.stop), (rk(50, 100).start, rk(50, 100).stop));
    }

    #[test]
    fn extension_policy() {
        let last = rk(100, 200);
        assert_eq!(try_extend_tail(&last, &rk(150, 300)), Extension::NoChange);
        assert_eq!(try_extend_tail(&last, &rk(100, 180)), Extension::Duplicate);
        assert_eq!(try_extend_tail(&last, &rk(100, 200)), Extension::Duplicate);
        let Extension::Extended(ext) = try_extend_tail(&last, &rk(100, 250)) else {
            panic!("expected extension");
        };
        assert_eq!(ext.start, last.start);
        assert_eq!(ext.stop, IovKey::from_run_lbn(0, 250));
        assert_eq!(ext.range.stop, IovTime::run_lbn(0, 250));
    }

    proptest! {
        #[test]
        fn adjusted_overlap_never_rewinds_start(
            es in 0_u32..1000, elen in 1_u32..500,
            is in 0_u32..1000, ilen in 1_u32..500,
        ) {
            let existing = rk(es, es + elen);
            let incoming = rk(is, is + ilen);
            match resolve_overlap(&existing, &incoming) {
                Overlap::Adjusted(adj) => {
                    prop_assert!(adj.start >= incoming.start);
                    prop_assert!(adj.stop <= incoming.stop);
                    prop_assert!(!adj.is_empty());
                    prop_assert_eq!(resolve_overlap(&existing, &adj), Overlap::Disjoint);
                }
                Overlap::Duplicate => {
                    prop_assert!(incoming.start >= existing.start && incoming.stop <= existing.stop);
                }
                Overlap::Disjoint => {
                    prop_assert!(incoming.stop <= existing.start || incoming.start >= existing.stop);
                }
            }
        }

        #[test]
        fn extension_never_shrinks(
            stop in 1_u32..1000, new_stop in 1_u32..1000,
        ) {
            let last = rk(0, stop);
            match try_extend_tail(&last, &rk(0, new_stop)) {
                Extension::Extended(ext) => prop_assert!(ext.stop > last.stop),
                Extension::Duplicate => prop_assert!(new_stop <= stop),
                Extension::NoChange => prop_assert!(false, "same start must not fall through"),
            }
        }
    }
}
