//! Error types for the `atmos-world` crate.

use atmos_types::EntityKey;

/// Errors raised by host capability calls.
///
/// Every variant is an expected, per-entity condition. Callers in the hazard
/// pipeline drop the affected entity and carry on.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorldError {
    /// The handle's generation no longer matches a live entity.
    #[error("stale entity handle {0:?}")]
    StaleEntity(EntityKey),

    /// The entity exists but is closed or marked for close.
    #[error("entity {0:?} is closed")]
    Closed(EntityKey),

    /// The entity exists but is not of the kind the call requires.
    #[error("entity {key:?} is not a {expected}")]
    WrongKind {
        /// The offending entity.
        key: EntityKey,
        /// The kind the caller asked for.
        expected: &'static str,
    },
}
