//! Demo world: one acidic planet with a lava floor, a few grids, a handful
//! of characters and some loose cargo, plus a camera that circles the
//! landing site.

use std::f64::consts::{FRAC_PI_3, TAU};

use atmos_core::runner::CameraFeed;
use atmos_types::{Camera, DVec3, GridSize, HazardSource, SourceId};
use atmos_world::{SimWorld, WorldError};
use tracing::info;

/// Planet surface radius in metres.
const PLANET_RADIUS: f64 = 2_000.0;
/// Atmosphere height above the surface.
const ATMOSPHERE: f64 = 600.0;
/// Surface material id. Matches the lava entry of the default rule table.
const LAVA: u8 = 7;

/// Populate `world` and return the planet as a hazard source.
pub fn build(world: &SimWorld) -> Result<HazardSource, WorldError> {
    let volume = world.add_volume(DVec3::ZERO, PLANET_RADIUS, LAVA);
    world.set_ambient_oxygen(0.6);

    // A large base resting on the lava.
    let base = world.add_grid(
        DVec3::new(0.0, PLANET_RADIUS + 1.0, 0.0),
        GridSize::Large,
        true,
    );
    for x in -2_i32..=2 {
        for z in -2_i32..=2 {
            let offset = DVec3::new(f64::from(x) * 2.5, 0.0, f64::from(z) * 2.5);
            let exterior = x.abs() == 2 || z.abs() == 2;
            world.add_block(base, offset, DVec3::splat(1.25), exterior)?;
        }
    }

    // A small rover parked nearby and a ship hovering overhead.
    let rover = world.add_grid(
        DVec3::new(20.0, PLANET_RADIUS + 0.4, 5.0),
        GridSize::Small,
        true,
    );
    for x in 0..4 {
        let offset = DVec3::new(f64::from(x) * 0.5, 0.0, 0.0);
        world.add_block(rover, offset, DVec3::splat(0.25), true)?;
    }
    let ship = world.add_grid(
        DVec3::new(-15.0, PLANET_RADIUS + 40.0, 10.0),
        GridSize::Large,
        true,
    );
    for y in 0..3 {
        let offset = DVec3::new(0.0, f64::from(y) * 2.5, 0.0);
        world.add_block(ship, offset, DVec3::splat(1.25), true)?;
    }

    // Characters: one in the open, one in a suit, one sheltering.
    world.add_character(DVec3::new(5.0, PLANET_RADIUS + 1.0, -5.0), 0.2);
    world.add_character(DVec3::new(8.0, PLANET_RADIUS + 1.0, -3.0), 1.0);
    let sheltered = world.add_character(DVec3::new(0.0, PLANET_RADIUS + 3.0, 0.0), 0.2);
    world.set_covered(sheltered, true)?;

    for i in 0..6 {
        let angle = f64::from(i) * TAU / 6.0;
        let position = DVec3::new(angle.cos() * 12.0, PLANET_RADIUS + 1.5, angle.sin() * 12.0);
        world.add_floating_object(position);
    }

    info!(
        radius = PLANET_RADIUS,
        atmosphere = ATMOSPHERE,
        "demo world built"
    );
    Ok(HazardSource {
        id: SourceId::new(),
        name: "AcidPlanet".to_owned(),
        center: DVec3::ZERO,
        radius: PLANET_RADIUS,
        atmosphere_altitude: ATMOSPHERE,
        volume: Some(volume),
    })
}

/// Camera circling the landing site a few metres above the ground.
#[derive(Debug, Clone, Copy)]
pub struct OrbitCamera {
    /// Orbit radius around the landing site.
    pub radius: f64,
    /// Height above the surface.
    pub height: f64,
    /// Radians travelled per tick.
    pub speed: f64,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            radius: 25.0,
            height: 6.0,
            speed: 0.01,
        }
    }
}

impl CameraFeed for OrbitCamera {
    #[allow(clippy::cast_precision_loss)]
    fn camera(&mut self, tick: u64) -> Option<Camera> {
        let angle = tick as f64 * self.speed;
        let position = DVec3::new(
            angle.cos() * self.radius,
            PLANET_RADIUS + self.height,
            angle.sin() * self.radius,
        );
        let target = DVec3::new(0.0, PLANET_RADIUS + 2.0, 0.0);
        Some(Camera::look_at(position, target, DVec3::Y, FRAC_PI_3, 16.0 / 9.0))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use atmos_world::EntityQuery;

    use super::*;

    #[test]
    fn demo_world_sits_inside_the_atmosphere() {
        let world = SimWorld::new();
        let source = build(&world).unwrap();
        let inside = world.top_entities_in_sphere(&source.influence_sphere());
        // Planet, three grids, three characters, six floating objects.
        assert_eq!(inside.len(), 13);
    }

    #[test]
    fn orbit_camera_stays_above_ground() {
        let mut feed = OrbitCamera::default();
        for tick in [0, 100, 1_000] {
            let camera = feed.camera(tick).unwrap();
            assert!(camera.position.length() > PLANET_RADIUS);
        }
    }
}
