//! Camera-driven rain sampling.
//!
//! Every `sample_every` frames the generator rebuilds the world-space box
//! around the camera frustum, casts `line_count` short lines from above the
//! camera toward the nearest hazard source's centre, samples each against
//! the grids and terrain inside the box, and fills the [`ProbePool`] with
//! droplets along the visible part of each line.
//!
//! Droplet placement follows one policy. A line stopped by a rigid body is
//! filled from the hit point back toward its start; a line that reaches the
//! terrain, or hits nothing, is filled from its start forward. A skip
//! counter, reset to a random value after each placement, thins every line
//! into sparse droplets.
//!
//! Lines start half the frustum box's height above the camera, not its full
//! height, and are tested over `length_fraction` of that rise.
//!
//! Above half the source's atmosphere height the generator is idle: the pool
//! is still drained each sampling frame, so nothing stays on screen.
//!
//! A failing cycle never propagates. Failures are counted and logged at
//! most once every `error_log_every` frames.

use std::time::Duration;

use atmos_types::{
    Aabb, Camera, Color, DMat4, DVec3, EntityKey, GeometryError, HazardSource, Line, PooledProbe,
    SourceId,
};
use atmos_world::{EntityQuery, PhysicsQuery, VolumeQuery};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::RainConfig;
use crate::pool::ProbePool;
use crate::sampler::{Candidates, HitKind, IntersectionSampler, LineSample};
use crate::timing::ScopeTimer;

/// Hits closer than this to the line start are ignored.
const MIN_HIT_DISTANCE: f64 = 0.001;

/// Errors from one sampling cycle.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SampleError {
    /// The camera's projection or view cannot be inverted.
    #[error("degenerate camera: {reason}")]
    DegenerateCamera {
        /// What made the camera unusable.
        reason: &'static str,
    },

    /// A line could not be constructed.
    #[error("invalid sampling line: {source}")]
    Geometry {
        /// The underlying geometry error.
        #[from]
        source: GeometryError,
    },
}

/// What one call to [`FrustumLineGenerator::frame`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Whether this frame was a sampling frame.
    pub sampled: bool,
    /// Whether sampling was skipped because the camera was too high.
    pub idle: bool,
    /// Lines that crossed the frustum box and were tested.
    pub lines_tested: usize,
    /// Lines stopped by a rigid body.
    pub rigid_hits: usize,
    /// Lines that reached the terrain surface.
    pub surface_hits: usize,
    /// Probes allocated this frame.
    pub probes: usize,
    /// Whether the pool grew this frame.
    pub pool_grew: bool,
    /// Whether the cycle failed.
    pub failed: bool,
}

/// Probes handed to the renderer for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawBatch {
    /// Randomly chosen active probes.
    pub probes: Vec<PooledProbe>,
    /// Line thickness to draw them with.
    pub thickness: f32,
}

/// The hazard source the camera is currently nearest to.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RainTarget {
    id: SourceId,
    center: DVec3,
    radius: f64,
    atmosphere_altitude: f64,
    volume: Option<EntityKey>,
}

impl From<&HazardSource> for RainTarget {
    fn from(source: &HazardSource) -> Self {
        Self {
            id: source.id,
            center: source.center,
            radius: source.radius,
            atmosphere_altitude: source.atmosphere_altitude,
            volume: source.volume,
        }
    }
}

/// Per-frame rain sampler backed by a [`ProbePool`].
#[derive(Debug)]
pub struct FrustumLineGenerator {
    settings: RainConfig,
    pool: ProbePool,
    rng: SmallRng,
    frame: u64,
    target: Option<RainTarget>,
    camera_altitude: Option<f64>,
    frustum_box: Option<Aabb>,
    thickness: f32,
    failures: u64,
}

impl FrustumLineGenerator {
    /// Generator with a pool sized from `settings`.
    pub fn new(settings: RainConfig, seed: u64) -> Self {
        let pool = ProbePool::new(settings.pool_capacity, settings.pool_growth);
        let thickness = settings.thickness_max;
        Self {
            settings,
            pool,
            rng: SmallRng::seed_from_u64(seed),
            frame: 0,
            target: None,
            camera_altitude: None,
            frustum_box: None,
            thickness,
            failures: 0,
        }
    }

    /// The probe pool.
    pub const fn pool(&self) -> &ProbePool {
        &self.pool
    }

    /// Frustum box of the last sampling cycle.
    pub const fn frustum_box(&self) -> Option<Aabb> {
        self.frustum_box
    }

    /// Camera height above the current target's surface.
    pub const fn camera_altitude(&self) -> Option<f64> {
        self.camera_altitude
    }

    /// Source the generator is sampling toward.
    pub fn target(&self) -> Option<SourceId> {
        self.target.map(|t| t.id)
    }

    /// Failed sampling cycles so far.
    pub const fn failures(&self) -> u64 {
        self.failures
    }

    /// Advance one visual frame.
    pub fn frame<H>(&mut self, host: &H, camera: &Camera, sources: &[HazardSource]) -> FrameReport
    where
        H: EntityQuery + PhysicsQuery + VolumeQuery,
    {
        let frame = self.frame;
        self.frame = self.frame.wrapping_add(1);
        if !self.settings.enabled {
            return FrameReport::default();
        }

        let every = |n: u64| frame.checked_rem(n.max(1)) == Some(0);
        if self.target.is_none() || every(self.settings.source_refresh) {
            self.refresh_target(camera.position, sources);
        }
        if self.camera_altitude.is_none() || every(self.settings.altitude_refresh) {
            self.refresh_altitude(host, camera.position);
        }
        if !every(self.settings.sample_every) {
            return FrameReport::default();
        }

        let _timer = ScopeTimer::start(
            "rain_sampling",
            Duration::from_micros(self.settings.budget_micros),
        );
        match self.sample_cycle(host, camera) {
            Ok(report) => report,
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                if every(self.settings.error_log_every) {
                    warn!(error = %e, failures = self.failures, "rain sampling failed");
                }
                FrameReport {
                    sampled: true,
                    failed: true,
                    ..FrameReport::default()
                }
            }
        }
    }

    /// Up to `draw_limit` randomly chosen active probes.
    pub fn draw_batch(&mut self) -> DrawBatch {
        let active = self.pool.active_snapshot();
        let probes = if active.is_empty() {
            Vec::new()
        } else {
            (0..self.settings.draw_limit)
                .filter_map(|_| active.get(self.rng.random_range(0..active.len())))
                .copied()
                .collect()
        };
        DrawBatch {
            probes,
            thickness: self.thickness,
        }
    }

    fn refresh_target(&mut self, camera: DVec3, sources: &[HazardSource]) {
        let nearest = sources.iter().min_by(|a, b| {
            a.center
                .distance_squared(camera)
                .total_cmp(&b.center.distance_squared(camera))
        });
        let target = nearest.map(RainTarget::from);
        if target.map(|t| t.id) != self.target.map(|t| t.id) {
            debug!(source = ?target.map(|t| t.id), "rain target changed");
            self.camera_altitude = None;
        }
        self.target = target;
    }

    fn refresh_altitude<H: VolumeQuery>(&mut self, host: &H, camera: DVec3) {
        let Some(target) = self.target else {
            self.camera_altitude = None;
            return;
        };
        let surface = target
            .volume
            .and_then(|v| host.closest_surface_point(v, camera));
        self.camera_altitude = Some(surface.map_or_else(
            || camera.distance(target.center) - target.radius,
            |s| camera.distance(s),
        ));
    }

    fn sample_cycle<H>(&mut self, host: &H, camera: &Camera) -> Result<FrameReport, SampleError>
    where
        H: EntityQuery + PhysicsQuery + VolumeQuery,
    {
        self.pool.deallocate_all();
        let mut report = FrameReport {
            sampled: true,
            ..FrameReport::default()
        };
        let Some(target) = self.target else {
            report.idle = true;
            return Ok(report);
        };

        let fbox = frustum_box(camera, self.settings.near_plane, self.settings.far_plane)?;
        self.frustum_box = Some(fbox);

        let altitude = self.camera_altitude.unwrap_or(f64::INFINITY);
        if altitude >= target.atmosphere_altitude / 2.0 {
            report.idle = true;
            return Ok(report);
        }

        let up = (camera.position - target.center)
            .try_normalize()
            .ok_or(SampleError::DegenerateCamera {
                reason: "camera at source centre",
            })?;
        let forward = up.any_orthonormal_vector();
        let right = forward.cross(up);

        let candidates = Candidates::classify(&host.top_entities_in_box(&fbox));
        let sampler = IntersectionSampler::new(host, target.center, target.volume);
        let rise = fbox.half_extents().y;
        let length = rise * self.settings.length_fraction;
        let spread = self.settings.lateral_spread.max(1);

        for _ in 0..self.settings.line_count {
            self.thickness = self.random_thickness();
            let x = nudge(self.rng.random_range(-spread..spread));
            let z = nudge(self.rng.random_range(-spread..spread));
            let start =
                camera.position + right * f64::from(x) + up * rise - forward * f64::from(z);
            let line = Line::with_length(start, target.center, length)?;
            if !fbox.intersects_line(&line) {
                continue;
            }
            report.lines_tested = report.lines_tested.saturating_add(1);

            let sample = sampler.sample(&line, &candidates);
            match sample.hit {
                Some(HitKind::RigidBody) => report.rigid_hits = report.rigid_hits.saturating_add(1),
                Some(HitKind::Surface) => {
                    report.surface_hits = report.surface_hits.saturating_add(1);
                }
                None => {}
            }
            let (placed, grew) = self.emit_droplets(&line, &sample);
            report.probes = report.probes.saturating_add(placed);
            report.pool_grew |= grew;
        }

        debug!(
            tested = report.lines_tested,
            probes = report.probes,
            rigid = report.rigid_hits,
            surface = report.surface_hits,
            "rain sampled"
        );
        Ok(report)
    }

    /// Fill the visible part of `line` with droplets. Returns how many were
    /// placed and whether the pool grew.
    fn emit_droplets(&mut self, line: &Line, sample: &LineSample) -> (usize, bool) {
        let (lo, hi) = (self.settings.drop_size_min, self.settings.drop_size_max);
        let drop_size = if lo.is_finite() && hi.is_finite() && lo <= hi {
            self.rng.random_range(lo..=hi)
        } else {
            lo
        };
        let skip_max = self.settings.skip_max.max(1);
        let mut skip = self.rng.random_range(0..skip_max);

        let has_hit = sample.hit.is_some()
            && sample.distance > MIN_HIT_DISTANCE
            && sample.distance < line.length;
        let rigid = sample.is_rigid();
        let distance = if has_hit { sample.distance } else { line.length };
        let (origin, direction) = if has_hit && rigid {
            (sample.point, -line.direction)
        } else {
            (line.from, line.direction)
        };
        let color = if rigid { Color::WHITE } else { Color::GREEN };

        #[allow(clippy::cast_possible_truncation)]
        let draw_length = drop_size as f32;
        let mut placed = 0_usize;
        let mut grew = false;
        let mut step_start = origin;
        for _ in 0..step_count(distance, drop_size) {
            if skip == 0 {
                let allocation = self.pool.allocate_or_create(|probe| {
                    probe.start = step_start;
                    probe.direction = direction;
                    probe.length = draw_length;
                    probe.color = color;
                });
                grew |= allocation.grew;
                placed = placed.saturating_add(1);
                skip = self.rng.random_range(0..skip_max);
            } else {
                skip = skip.saturating_sub(1);
            }
            step_start += direction * drop_size;
        }
        (placed, grew)
    }

    fn random_thickness(&mut self) -> f32 {
        let lo = self.settings.thickness_min;
        let hi = self.settings.thickness_max;
        if lo.is_finite() && hi.is_finite() && lo <= hi {
            self.rng.random_range(lo..=hi)
        } else {
            lo
        }
    }
}

/// Move a zero lateral offset to one so no line starts on the axis.
const fn nudge(offset: i32) -> i32 {
    if offset == 0 { 1 } else { offset }
}

/// Number of fixed-size steps that cover `distance`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn step_count(distance: f64, drop_size: f64) -> usize {
    if !(distance > 0.0 && drop_size > 0.0) {
        return 0;
    }
    let steps = (distance / drop_size).ceil();
    if steps.is_finite() {
        steps.min(1e9) as usize
    } else {
        0
    }
}

/// World-space box enclosing the camera frustum between `near` and `far`.
pub fn frustum_box(camera: &Camera, near: f64, far: f64) -> Result<Aabb, SampleError> {
    if !(camera.fov_y > 0.0 && camera.aspect > 0.0 && near > 0.0 && far > near) {
        return Err(SampleError::DegenerateCamera {
            reason: "non-positive field of view, aspect or clip planes",
        });
    }
    let clip = DMat4::perspective_rh(camera.fov_y, camera.aspect, near, far) * camera.view;
    let det = clip.determinant();
    if !det.is_finite() || det.abs() < f64::EPSILON {
        return Err(SampleError::DegenerateCamera {
            reason: "view-projection is singular",
        });
    }
    let inverse = clip.inverse();
    let corners = [-1.0, 1.0].into_iter().flat_map(|x| {
        [-1.0, 1.0].into_iter().flat_map(move |y| {
            [0.0, 1.0]
                .into_iter()
                .map(move |z| inverse.project_point3(DVec3::new(x, y, z)))
        })
    });
    Aabb::from_points(corners).ok_or(SampleError::DegenerateCamera {
        reason: "no frustum corners",
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use atmos_types::GridSize;
    use atmos_world::SimWorld;

    use super::*;

    const PLANET_RADIUS: f64 = 1_000.0;

    fn planet(world: &SimWorld) -> HazardSource {
        let volume = world.add_volume(DVec3::ZERO, PLANET_RADIUS, 0);
        HazardSource {
            id: SourceId::new(),
            name: "Acidia".to_owned(),
            center: DVec3::ZERO,
            radius: PLANET_RADIUS,
            atmosphere_altitude: 400.0,
            volume: Some(volume),
        }
    }

    /// Camera just above the surface, looking straight up.
    fn camera_at(height: f64) -> Camera {
        let position = DVec3::new(0.0, PLANET_RADIUS + height, 0.0);
        Camera::look_at(position, position + DVec3::Y, DVec3::Z, FRAC_PI_2, 1.0)
    }

    fn settings() -> RainConfig {
        RainConfig {
            line_count: 200,
            lateral_spread: 20,
            pool_capacity: 64,
            pool_growth: 64,
            ..RainConfig::default()
        }
    }

    #[test]
    fn frustum_box_contains_far_plane_corners() {
        let camera = camera_at(5.0);
        let fbox = frustum_box(&camera, 0.1, 70.0).unwrap();
        // Looking up with a 90 degree field of view, the far plane spans
        // +-70 m laterally at 70 m above the camera.
        assert!((fbox.max.y - camera.position.y - 70.0).abs() < 1e-6);
        assert!((fbox.half_extents().x - 70.0).abs() < 1e-6);
        assert!(fbox.contains(camera.position + DVec3::new(0.0, 1.0, 0.0)));
    }

    #[test]
    fn degenerate_camera_is_rejected() {
        let mut camera = camera_at(5.0);
        camera.aspect = 0.0;
        assert!(matches!(
            frustum_box(&camera, 0.1, 70.0),
            Err(SampleError::DegenerateCamera { .. })
        ));
    }

    #[test]
    fn sampling_frame_fills_pool_with_green_rain() {
        let world = SimWorld::new();
        let source = planet(&world);
        let mut rain = FrustumLineGenerator::new(settings(), 7);

        let report = rain.frame(&world, &camera_at(5.0), std::slice::from_ref(&source));
        assert!(report.sampled);
        assert!(!report.idle);
        assert!(report.lines_tested > 0);
        assert!(report.probes > 0);
        assert_eq!(report.probes, rain.pool().active_len());
        assert!(
            rain.pool()
                .active_snapshot()
                .iter()
                .all(|p| p.color == Color::GREEN)
        );
    }

    #[test]
    fn only_every_nth_frame_samples() {
        let world = SimWorld::new();
        let source = planet(&world);
        let mut rain = FrustumLineGenerator::new(settings(), 7);
        let sources = [source];
        let sampled: Vec<bool> = (0..10)
            .map(|_| rain.frame(&world, &camera_at(5.0), &sources).sampled)
            .collect();
        assert_eq!(
            sampled,
            vec![true, false, false, false, false, true, false, false, false, false]
        );
    }

    #[test]
    fn high_camera_idles_and_drains_pool() {
        let world = SimWorld::new();
        let source = planet(&world);
        let mut rain = FrustumLineGenerator::new(settings(), 7);
        let sources = [source];
        rain.frame(&world, &camera_at(5.0), &sources);
        assert!(rain.pool().active_len() > 0);

        let mut high = FrustumLineGenerator::new(settings(), 7);
        let report = high.frame(&world, &camera_at(300.0), &sources);
        assert!(report.idle);
        assert_eq!(high.pool().active_len(), 0);
    }

    #[test]
    fn rigid_hits_are_white() {
        let world = SimWorld::new();
        let source = planet(&world);
        // A wide roof between the line starts and their ends stops every
        // line.
        let roof = world.add_grid(
            DVec3::new(0.0, PLANET_RADIUS + 35.0, 0.0),
            GridSize::Large,
            true,
        );
        world
            .add_block(roof, DVec3::ZERO, DVec3::new(200.0, 1.0, 200.0), true)
            .unwrap();

        let mut rain = FrustumLineGenerator::new(settings(), 11);
        let report = rain.frame(&world, &camera_at(5.0), &[source]);
        assert!(report.rigid_hits > 0);
        assert!(
            rain.pool()
                .active_snapshot()
                .iter()
                .any(|p| p.color == Color::WHITE)
        );
    }

    #[test]
    fn draw_batch_is_capped() {
        let world = SimWorld::new();
        let source = planet(&world);
        let mut rain = FrustumLineGenerator::new(
            RainConfig {
                draw_limit: 10,
                ..settings()
            },
            3,
        );
        assert!(rain.draw_batch().probes.is_empty());
        rain.frame(&world, &camera_at(5.0), &[source]);
        let batch = rain.draw_batch();
        assert_eq!(batch.probes.len(), 10);
        assert!(batch.thickness >= 0.01 && batch.thickness <= 0.05);
    }

    #[test]
    fn non_finite_sizes_do_not_panic_the_frame() {
        let world = SimWorld::new();
        let source = planet(&world);
        let mut rain = FrustumLineGenerator::new(
            RainConfig {
                drop_size_max: f64::INFINITY,
                thickness_min: f32::NAN,
                ..settings()
            },
            5,
        );
        let report = rain.frame(&world, &camera_at(5.0), &[source]);
        assert!(report.lines_tested > 0);
        assert!(rain.draw_batch().thickness.is_nan());
    }

    #[test]
    fn step_count_covers_distance() {
        assert_eq!(step_count(10.0, 1.0), 10);
        assert_eq!(step_count(10.5, 1.0), 11);
        assert_eq!(step_count(0.0, 1.0), 0);
        assert_eq!(step_count(f64::NAN, 1.0), 0);
    }

    #[test]
    fn nudge_moves_zero_only() {
        assert_eq!(nudge(0), 1);
        assert_eq!(nudge(-3), -3);
        assert_eq!(nudge(5), 5);
    }
}
