//! Hazard workers, damage aggregation and rain sampling for the atmospheric
//! hazard simulation.
//!
//! One [`HazardWorker`] per hazard source scans the world in the background
//! and accumulates damage. A single elected [`Aggregator`] collects from all
//! workers over the [`MessageBus`] and applies damage at a throttled rate. A
//! [`FrustumLineGenerator`] samples rain lines around the camera every few
//! frames. [`HazardSession`] ties them to one host world.
//!
//! # Modules
//!
//! - [`aggregator`] -- Election, bounded queue and throttled application.
//! - [`bus`] -- Topic-keyed broadcast bus between session components.
//! - [`config`] -- Configuration loading from `atmos-config.yaml` into
//!   strongly-typed structs.
//! - [`emitters`] -- Particle emitters on blocks touching hazardous terrain.
//! - [`frustum`] -- Camera frustum box and per-frame rain sampling.
//! - [`pool`] -- Growable arena of probe records.
//! - [`runner`] -- Bounded session loop and run summary.
//! - [`sampler`] -- Line intersection against grids and terrain volumes.
//! - [`session`] -- One hazard session over one host world.
//! - [`timing`] -- Scope timer for the hot cycles.
//! - [`worker`] -- Per-source background hazard scans.
//!
//! [`HazardWorker`]: worker::HazardWorker
//! [`Aggregator`]: aggregator::Aggregator
//! [`MessageBus`]: bus::MessageBus
//! [`FrustumLineGenerator`]: frustum::FrustumLineGenerator
//! [`HazardSession`]: session::HazardSession

pub mod aggregator;
pub mod bus;
pub mod config;
pub mod emitters;
pub mod frustum;
pub mod pool;
pub mod runner;
pub mod sampler;
pub mod session;
pub mod timing;
pub mod worker;
