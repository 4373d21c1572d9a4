//! Host capabilities, hazard rules, and an in-memory world.
//!
//! The hazard pipeline never talks to a physics engine, renderer or entity
//! system directly. Everything it needs from the host is expressed as a
//! trait in [`host`]; the blanket [`HostWorld`] bound bundles them.
//!
//! # Modules
//!
//! - [`error`] -- Error types for host operations.
//! - [`host`] -- Capability traits and the entity snapshot model.
//! - [`rules`] -- The hazard-rule table (damage amounts, toggles, materials).
//! - [`sim_world`] -- [`SimWorld`], a deterministic in-memory host used by
//!   tests and the demo engine.
//!
//! [`SimWorld`]: sim_world::SimWorld

pub mod error;
pub mod host;
pub mod rules;
pub mod sim_world;

pub use error::WorldError;
pub use host::{
    DamageSink, EffectHost, EntityKind, EntityQuery, EntitySnapshot, HostWorld, LifeSupport,
    PhysicsQuery, VolumeContact, VolumePin, VolumeQuery,
};
pub use rules::{DamageRules, VoxelDamageItem};
pub use sim_world::{DamageEvent, LiveEffect, SimVolumePin, SimWorld};
