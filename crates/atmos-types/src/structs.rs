//! Records exchanged between hazard workers, the aggregator, and the
//! probe pool.

use std::collections::HashMap;

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::geometry::Sphere;
use crate::ids::{EffectId, EntityKey, SourceId};

/// Collection payload for the damage topic: target to pending amount.
pub type DamageBatch = HashMap<EntityKey, f32>;

/// Collection payload for the emitter topic: block to particle effect.
pub type EmitterBatch = HashMap<EntityKey, EffectId>;

/// One planet-like hazard emitter.
///
/// Created when the emitter enters the simulated world. Each physical body
/// owns exactly one source; sources are never shared between workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardSource {
    /// Stable identity for the lifetime of the session.
    pub id: SourceId,
    /// Storage name of the body, used for admission filtering.
    pub name: String,
    /// Centre of the body.
    pub center: DVec3,
    /// Average surface radius.
    pub radius: f64,
    /// Height of the atmosphere above the surface.
    pub atmosphere_altitude: f64,
    /// The body's own terrain volume, if it has one.
    pub volume: Option<EntityKey>,
}

impl HazardSource {
    /// Radius of the sphere inside which entities are affected.
    pub fn influence_radius(&self) -> f64 {
        self.radius + self.atmosphere_altitude
    }

    /// The influence sphere.
    pub fn influence_sphere(&self) -> Sphere {
        Sphere::new(self.center, self.influence_radius())
    }
}

/// One pending damage application against one target.
///
/// The target is a weak, generation-checked handle. A contribution never
/// keeps its target alive and is dropped silently when the target is gone
/// by application time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageContribution {
    /// Entity to damage.
    pub target: EntityKey,
    /// Damage amount.
    pub amount: f32,
}

/// RGBA colour in linear `0.0..=1.0` components.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
    /// Red.
    pub r: f32,
    /// Green.
    pub g: f32,
    /// Blue.
    pub b: f32,
    /// Alpha.
    pub a: f32,
}

impl Color {
    /// Opaque white, used for probes occluded by a rigid body.
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);
    /// Opaque green, used for probes on the terrain path.
    pub const GREEN: Self = Self::rgb(0.0, 0.5, 0.0);

    /// Opaque colour from three components.
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }
}

/// A short drawable segment produced by the sampler.
///
/// Value record with no identity of its own; storage belongs to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PooledProbe {
    /// Where the segment starts.
    pub start: DVec3,
    /// Unit direction of the segment.
    pub direction: DVec3,
    /// Drawn length.
    pub length: f32,
    /// Draw colour.
    pub color: Color,
}

/// Size class of a rigid grid. Damage amounts and effect scale depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridSize {
    /// Small-block grid.
    Small,
    /// Large-block grid.
    Large,
}

/// Camera state for one visual frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// World-space position.
    pub position: DVec3,
    /// World-to-view transform.
    pub view: DMat4,
    /// Vertical field of view in radians.
    pub fov_y: f64,
    /// Viewport width divided by height.
    pub aspect: f64,
}

impl Camera {
    /// Camera at `position` looking at `target` with `up` as the up hint.
    pub fn look_at(position: DVec3, target: DVec3, up: DVec3, fov_y: f64, aspect: f64) -> Self {
        Self {
            position,
            view: DMat4::look_at_rh(position, target, up),
            fov_y,
            aspect,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn influence_radius_includes_atmosphere() {
        let source = HazardSource {
            id: SourceId::new(),
            name: String::from("Acidia"),
            center: DVec3::ZERO,
            radius: 60_000.0,
            atmosphere_altitude: 8_000.0,
            volume: None,
        };
        let sphere = source.influence_sphere();
        assert!((sphere.radius - 68_000.0).abs() < f64::EPSILON);
        assert!(sphere.contains(DVec3::new(0.0, 67_000.0, 0.0)));
    }

    #[test]
    fn probe_serializes() {
        let probe = PooledProbe {
            start: DVec3::new(1.0, 2.0, 3.0),
            direction: DVec3::Y,
            length: 1.2,
            color: Color::GREEN,
        };
        let json = serde_json::to_string(&probe).unwrap();
        let back: PooledProbe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, probe);
    }
}
