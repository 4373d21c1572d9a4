//! Shared value types for the atmospheric hazard simulation.
//!
//! This crate contains the types that cross component boundaries: entity
//! handles, hazard-source identity, the damage and probe records exchanged
//! between workers, the aggregator and the probe pool, and the small amount
//! of geometry the sampler needs.
//!
//! # Modules
//!
//! - [`ids`] -- Generation-checked entity keys and UUID-backed identifiers.
//! - [`geometry`] -- Line segments, axis-aligned and oriented boxes, spheres.
//! - [`structs`] -- Hazard sources, contributions, probes and payloads.

pub mod geometry;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use geometry::*;
pub use ids::*;
pub use structs::*;

pub use glam::{DMat4, DQuat, DVec3};
