#![forbid(unsafe_code)]
//! Error types for the conditions store.
//!
//! # Error Taxonomy
//!
//! Container operations distinguish three kinds of outcome:
//!
//! | Kind | Representation | Example |
//! |------|----------------|---------|
//! | Benign insert classification | `Ok(InsertStatus)` in `cond-types` | `Duplicate`, `Overlap`, `Extended` |
//! | Lookup miss | `Option::None` | no IOV covers the event time |
//! | Failure | `Err(CondError)` (this crate) | key-kind clash, wrong payload class |
//!
//! Only the last is an error. A failed insert still consumes the payload:
//! it is dropped inside the call, so there is never a caller-side cleanup
//! obligation.
//!
//! ## Configuration vs. usage errors
//!
//! | Variant | Raised by | Typical cause |
//! |---------|-----------|---------------|
//! | `InvalidRange` | insert, extend | `start >= stop`, or neither run-lbn nor timestamp on both ends |
//! | `KeyTypeMismatch` | insert, extend | container latched to the other coordinate system |
//! | `TypeMismatch` | insert, typed views | insert through a base-class view, or a payload of the wrong type |
//! | `Unsupported` | erase, extend | operation not defined for mixed containers |
//! | `EmptyContainer` / `ExtendMismatch` | extend | nothing to extend, or start times differ |
//! | `UnknownClass` / `DuplicateClass` / `BaseMismatch` | registry | class declarations at startup |
//! | `BadSlot` | RCU | slot index outside the configured worker pool |
//! | `Config` | config loading | invalid or unparsable configuration |
//!
//! ## Design Constraints
//!
//! - `cond-error` MUST NOT depend on `cond-types` (no cyclic deps). Ranges and
//!   class ids are carried as their display strings / raw integers.
//! - All string payloads are owned (`String`).

use thiserror::Error;

/// Unified error type for all conditions-store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CondError {
    /// The supplied validity range cannot be stored.
    #[error("invalid range {range}: {reason}")]
    InvalidRange { range: String, reason: &'static str },

    /// The container is bound to one coordinate system and the range or
    /// time uses another.
    #[error("key type mismatch in {container}: container is {expected}, range is {actual}")]
    KeyTypeMismatch {
        container: String,
        expected: String,
        actual: String,
    },

    /// Insertion through a class other than the container's most-derived
    /// class, or a payload whose runtime type does not match.
    #[error("type mismatch in {container}: container holds class {expected}, got class {used}")]
    TypeMismatch {
        container: String,
        expected: u32,
        used: u32,
    },

    /// Operation not defined for this kind of container.
    #[error("{op} is not supported by {container}")]
    Unsupported {
        op: &'static str,
        container: String,
    },

    /// `extend_last_range` on a container with no entries.
    #[error("{container} is empty")]
    EmptyContainer { container: String },

    /// `extend_last_range` with a start different from the last entry's.
    #[error("cannot extend last range {last} of {container} with {requested}")]
    ExtendMismatch {
        container: String,
        last: String,
        requested: String,
    },

    /// Class id or payload type was never declared.
    #[error("unknown class: {0}")]
    UnknownClass(String),

    /// Class id or payload type declared twice.
    #[error("class already declared: {0}")]
    DuplicateClass(String),

    /// Base relationship violates the declaration rules (unknown base,
    /// or a mixed class deriving from a non-mixed one).
    #[error("invalid base for class {class}: {reason}")]
    BaseMismatch { class: u32, reason: String },

    /// Worker slot outside the configured pool.
    #[error("slot {slot} out of range (pool has {slots} slots)")]
    BadSlot { slot: usize, slots: usize },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CondError {
    /// Whether this error comes from process-configuration mistakes
    /// (class declarations or config) rather than from a data operation.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::UnknownClass(_)
            | Self::DuplicateClass(_)
            | Self::BaseMismatch { .. }
            | Self::BadSlot { .. }
            | Self::Config(_) => true,
            Self::InvalidRange { .. }
            | Self::KeyTypeMismatch { .. }
            | Self::TypeMismatch { .. }
            | Self::Unsupported { .. }
            | Self::EmptyContainer { .. }
            | Self::ExtendMismatch { .. } => false,
        }
    }
}

/// Result alias using `CondError`.
pub type Result<T> = std::result::Result<T, CondError>;
