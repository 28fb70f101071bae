#![forbid(unsafe_code)]

pub mod compare;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value marking an undefined run, lumi block or timestamp field.
pub const UNDEFNUM: u32 = u32::MAX;

/// Nanoseconds per second; sub-second offsets are clamped below this.
pub const NS_PER_SEC: u32 = 1_000_000_000;

/// Packed, totally ordered event-time coordinate.
///
/// Two encodings share this type: run+lumi-block (`run << 32 | lbn`) and
/// timestamp (`seconds << 32 | nanoseconds`). Which one a value holds is a
/// property of the container it is used with, never of the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IovKey(pub u64);

impl IovKey {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    /// Pack a run number and lumi block; ordering is lexicographic in
    /// `(run, lbn)`.
    #[must_use]
    pub fn from_run_lbn(run: u32, lbn: u32) -> Self {
        Self((u64::from(run) << 32) | u64::from(lbn))
    }

    /// Pack a timestamp; ordering matches wall-clock ordering.
    ///
    /// `ns` is clamped to `NS_PER_SEC - 1` so an out-of-range offset can
    /// never sort past the next second.
    #[must_use]
    pub fn from_timestamp(seconds: u32, ns: u32) -> Self {
        Self((u64::from(seconds) << 32) | u64::from(ns.min(NS_PER_SEC - 1)))
    }

    /// High word: run number or seconds.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)] // shifted right by 32
    pub fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Low word: lumi block or nanoseconds.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)] // masked to 32 bits
    pub fn low(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// Rebuild a run-lbn time from a key packed with [`Self::from_run_lbn`].
    #[must_use]
    pub fn to_run_lbn_time(self) -> IovTime {
        IovTime::run_lbn(self.high(), self.low())
    }

    /// Rebuild a timestamp time from a key packed with [`Self::from_timestamp`].
    #[must_use]
    pub fn to_timestamp_time(self) -> IovTime {
        IovTime::timestamp(self.high(), self.low())
    }
}

impl fmt::Display for IovKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.high(), self.low())
    }
}

/// Event time in its rich form: run/lumi block and/or timestamp.
///
/// Any of the coordinates may be absent. A time "is run-lbn" when both run
/// and lumi block are present and "is timestamp" when the seconds field is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IovTime {
    pub run: Option<u32>,
    pub lumi_block: Option<u32>,
    pub timestamp: Option<u32>,
    pub timestamp_ns: u32,
}

impl IovTime {
    #[must_use]
    pub fn run_lbn(run: u32, lumi_block: u32) -> Self {
        Self {
            run: Some(run),
            lumi_block: Some(lumi_block),
            timestamp: None,
            timestamp_ns: 0,
        }
    }

    #[must_use]
    pub fn timestamp(seconds: u32, ns: u32) -> Self {
        Self {
            run: None,
            lumi_block: None,
            timestamp: Some(seconds),
            timestamp_ns: ns,
        }
    }

    /// Time carrying both coordinate systems.
    #[must_use]
    pub fn mixed(run: u32, lumi_block: u32, seconds: u32, ns: u32) -> Self {
        Self {
            run: Some(run),
            lumi_block: Some(lumi_block),
            timestamp: Some(seconds),
            timestamp_ns: ns,
        }
    }

    /// Largest representable run-lbn time (open-ended IOV stop).
    #[must_use]
    pub fn max_run_lbn() -> Self {
        Self::run_lbn(UNDEFNUM, UNDEFNUM)
    }

    /// Largest representable timestamp (open-ended IOV stop).
    #[must_use]
    pub fn max_timestamp() -> Self {
        Self::timestamp(UNDEFNUM, NS_PER_SEC - 1)
    }

    #[must_use]
    pub fn with_timestamp(mut self, seconds: u32, ns: u32) -> Self {
        self.timestamp = Some(seconds);
        self.timestamp_ns = ns;
        self
    }

    #[must_use]
    pub fn with_run_lbn(mut self, run: u32, lumi_block: u32) -> Self {
        self.run = Some(run);
        self.lumi_block = Some(lumi_block);
        self
    }

    #[must_use]
    pub fn is_run_lbn(&self) -> bool {
        self.run.is_some() && self.lumi_block.is_some()
    }

    #[must_use]
    pub fn is_timestamp(&self) -> bool {
        self.timestamp.is_some()
    }

    #[must_use]
    pub fn run_lbn_key(&self) -> Option<IovKey> {
        match (self.run, self.lumi_block) {
            (Some(run), Some(lbn)) => Some(IovKey::from_run_lbn(run, lbn)),
            _ => None,
        }
    }

    #[must_use]
    pub fn timestamp_key(&self) -> Option<IovKey> {
        self.timestamp
            .map(|seconds| IovKey::from_timestamp(seconds, self.timestamp_ns))
    }

    /// Key for the given coordinate system; `None` for `Single`/`Mixed` or
    /// when the coordinate is absent.
    #[must_use]
    pub fn key_for(&self, kind: KeyType) -> Option<IovKey> {
        match kind {
            KeyType::RunLbn => self.run_lbn_key(),
            KeyType::Timestamp => self.timestamp_key(),
            KeyType::Single | KeyType::Mixed => None,
        }
    }
}

impl fmt::Display for IovTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        let mut sep = "";
        if let (Some(run), Some(lbn)) = (self.run, self.lumi_block) {
            write!(f, "{run},l:{lbn}")?;
            sep = ",";
        }
        if let Some(seconds) = self.timestamp {
            write!(f, "{sep}t:{seconds}.{:09}", self.timestamp_ns)?;
        }
        f.write_str("]")
    }
}

/// Closed-open `[start, stop)` validity range in rich form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IovRange {
    pub start: IovTime,
    pub stop: IovTime,
}

impl IovRange {
    #[must_use]
    pub fn new(start: IovTime, stop: IovTime) -> Self {
        Self { start, stop }
    }

    /// `[run1/lbn1, run2/lbn2)` convenience constructor.
    #[must_use]
    pub fn run_lbn(start: (u32, u32), stop: (u32, u32)) -> Self {
        Self::new(
            IovTime::run_lbn(start.0, start.1),
            IovTime::run_lbn(stop.0, stop.1),
        )
    }

    /// `[t1, t2)` in whole seconds.
    #[must_use]
    pub fn timestamp(start: u32, stop: u32) -> Self {
        Self::new(IovTime::timestamp(start, 0), IovTime::timestamp(stop, 0))
    }

    /// Both ends carry run+lbn.
    #[must_use]
    pub fn is_run_lbn(&self) -> bool {
        self.start.is_run_lbn() && self.stop.is_run_lbn()
    }

    /// Both ends carry a timestamp.
    #[must_use]
    pub fn is_timestamp(&self) -> bool {
        self.start.is_timestamp() && self.stop.is_timestamp()
    }

    /// Packed `(start, stop)` for one coordinate system.
    #[must_use]
    pub fn keys_for(&self, kind: KeyType) -> Option<(IovKey, IovKey)> {
        Some((self.start.key_for(kind)?, self.stop.key_for(kind)?))
    }
}

impl fmt::Display for IovRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} - {}}}", self.start, self.stop)
    }
}

/// Range as stored in a range map: packed bounds plus the rich range they
/// were derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeKey {
    pub start: IovKey,
    pub stop: IovKey,
    pub range: IovRange,
}

impl RangeKey {
    #[must_use]
    pub fn new(range: IovRange, start: IovKey, stop: IovKey) -> Self {
        Self { start, stop, range }
    }

    /// `start <= point < stop`.
    #[inline]
    #[must_use]
    pub fn contains(&self, point: IovKey) -> bool {
        compare::in_range(point, self)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.stop
    }
}

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}..{})", self.range, self.start, self.stop)
    }
}

/// Coordinate system a container is keyed by.
///
/// `Single` is the undecided state of a single-key container; the first
/// insert latches it to `RunLbn` or `Timestamp` for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyType {
    Single = 0,
    Timestamp = 1,
    RunLbn = 2,
    Mixed = 3,
}

impl KeyType {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Single),
            1 => Some(Self::Timestamp),
            2 => Some(Self::RunLbn),
            3 => Some(Self::Mixed),
            _ => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Single => "SINGLE",
            Self::Timestamp => "TIMESTAMP",
            Self::RunLbn => "RUNLBN",
            Self::Mixed => "MIXED",
        })
    }
}

/// Process-wide class identifier of a payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker slot in the event-processing pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub usize);

/// Per-unit-of-work context handed in by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub slot: SlotId,
    pub event: IovTime,
}

impl EventContext {
    #[must_use]
    pub fn new(slot: SlotId, event: IovTime) -> Self {
        Self { slot, event }
    }

    /// Context for slot 0 with no event time, for setup code and tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self::new(SlotId(0), IovTime::default())
    }
}

/// Successful insert classification.
///
/// Every variant is a success; failures are reported as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertStatus {
    /// Inserted as given.
    Success,
    /// Range already covered; nothing changed and the payload was dropped.
    Duplicate,
    /// Inserted with the range trimmed to avoid existing entries.
    Overlap,
    /// Last range's stop pushed out; the new payload was dropped.
    Extended,
}

impl InsertStatus {
    #[must_use]
    pub fn is_duplicate(self) -> bool {
        self == Self::Duplicate
    }

    #[must_use]
    pub fn is_overlap(self) -> bool {
        self == Self::Overlap
    }

    #[must_use]
    pub fn is_extended(self) -> bool {
        self == Self::Extended
    }

    /// Whether the visible contents of the container changed.
    #[must_use]
    pub fn changed(self) -> bool {
        self != Self::Duplicate
    }
}

impl fmt::Display for InsertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "SUCCESS",
            Self::Duplicate => "DUPLICATE",
            Self::Overlap => "OVERLAP",
            Self::Extended => "EXTENDED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EraseOutcome {
    Erased,
    NotFound,
}
