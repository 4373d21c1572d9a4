//! Segment intersection against rigid grids and terrain volumes.
//!
//! A line is first tested against every rigid grid whose coarse bounds it
//! touches. For those, the host's block ray cast picks the struck block and
//! the segment is intersected with that block's oriented box; the nearest
//! such distance wins. Only when no rigid body was struck is the nearest
//! terrain volume considered, and only if it is a root volume, is the
//! configured target, and passes the directional gate. The precise volume
//! query runs while the volume is pinned.
//!
//! Missing or closed candidates are skipped. A miss is the common case and
//! reports the segment end at full length.

use atmos_types::{DVec3, EntityKey, Line, Obb};
use atmos_world::{EntityKind, EntitySnapshot, PhysicsQuery, VolumePin, VolumeQuery};
use tracing::trace;

/// What a line struck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    /// A block of a rigid grid.
    RigidBody,
    /// The surface of a terrain volume.
    Surface,
}

/// Outcome of sampling one line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSample {
    /// Hit point, or the segment end on a miss.
    pub point: DVec3,
    /// Distance from the segment start to `point`.
    pub distance: f64,
    /// What was struck, if anything.
    pub hit: Option<HitKind>,
}

impl LineSample {
    fn miss(line: &Line) -> Self {
        Self {
            point: line.to,
            distance: line.length,
            hit: None,
        }
    }

    /// Whether a rigid body was struck.
    pub fn is_rigid(&self) -> bool {
        self.hit == Some(HitKind::RigidBody)
    }
}

/// A rigid grid that may occlude lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCandidate {
    /// Grid handle.
    pub key: EntityKey,
    /// Coarse oriented bounds.
    pub bounds: Obb,
}

/// A terrain volume that may be struck.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeCandidate {
    /// Volume handle.
    pub key: EntityKey,
    /// Volume centre.
    pub center: DVec3,
    /// Whether the volume is its own root.
    pub root: bool,
}

/// Entities near the camera, split by how lines are tested against them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    /// Open grids with physics.
    pub grids: Vec<GridCandidate>,
    /// Open terrain volumes.
    pub volumes: Vec<VolumeCandidate>,
}

impl Candidates {
    /// Keep open grids with physics and open volumes; drop everything else.
    pub fn classify(entities: &[EntitySnapshot]) -> Self {
        let mut out = Self::default();
        for entity in entities.iter().filter(|e| !e.closed) {
            match entity.kind {
                EntityKind::Grid {
                    has_physics: true,
                    bounds,
                    ..
                } => out.grids.push(GridCandidate {
                    key: entity.key,
                    bounds,
                }),
                EntityKind::Volume { root, .. } => out.volumes.push(VolumeCandidate {
                    key: entity.key,
                    center: entity.position,
                    root,
                }),
                _ => {}
            }
        }
        out
    }

    /// Whether there is nothing to test against.
    pub fn is_empty(&self) -> bool {
        self.grids.is_empty() && self.volumes.is_empty()
    }
}

/// Tests lines against a candidate set for one hazard source.
#[derive(Debug)]
pub struct IntersectionSampler<'h, H> {
    host: &'h H,
    center: DVec3,
    target_volume: Option<EntityKey>,
}

impl<'h, H> IntersectionSampler<'h, H>
where
    H: PhysicsQuery + VolumeQuery,
{
    /// Sampler for a source centred at `center`. When `target_volume` is set,
    /// only that volume is eligible for surface hits.
    pub const fn new(host: &'h H, center: DVec3, target_volume: Option<EntityKey>) -> Self {
        Self {
            host,
            center,
            target_volume,
        }
    }

    /// Closest hit of `line` among `candidates`.
    pub fn sample(&self, line: &Line, candidates: &Candidates) -> LineSample {
        if let Some(distance) = self.nearest_rigid_hit(line, candidates) {
            return LineSample {
                point: line.point_at(distance),
                distance,
                hit: Some(HitKind::RigidBody),
            };
        }
        self.surface_hit(line, candidates)
            .unwrap_or_else(|| LineSample::miss(line))
    }

    fn nearest_rigid_hit(&self, line: &Line, candidates: &Candidates) -> Option<f64> {
        let mut best: Option<f64> = None;
        for grid in &candidates.grids {
            if !grid.bounds.intersects_line(line) {
                continue;
            }
            let Some(block) = self.host.ray_cast_blocks(grid.key, line) else {
                continue;
            };
            let Some(distance) = block.intersect_line(line) else {
                continue;
            };
            // Strict comparison keeps the first of equal hits.
            if best.is_none_or(|b| distance < b) {
                best = Some(distance);
            }
        }
        best
    }

    fn surface_hit(&self, line: &Line, candidates: &Candidates) -> Option<LineSample> {
        let volume = candidates.volumes.iter().min_by(|a, b| {
            a.center
                .distance_squared(line.from)
                .total_cmp(&b.center.distance_squared(line.from))
        })?;
        if !volume.root || self.target_volume.is_some_and(|t| t != volume.key) {
            return None;
        }
        if !self.gate_open(volume.key, line) {
            return None;
        }
        let point = {
            let mut pin = self.host.pin(volume.key)?;
            pin.intersect_line(line)?
        };
        trace!(volume = ?volume.key, "surface hit");
        Some(LineSample {
            point,
            distance: line.from.distance(point),
            hit: Some(HitKind::Surface),
        })
    }

    /// Open when the surface point nearest the segment start lies farther
    /// from the centre than the start or the truncated end.
    fn gate_open(&self, volume: EntityKey, line: &Line) -> bool {
        let Some(surface) = self.host.closest_surface_point(volume, line.from) else {
            return false;
        };
        let surface_sq = surface.distance_squared(self.center);
        surface_sq > line.from.distance_squared(self.center)
            || surface_sq > line.to.distance_squared(self.center)
    }
}
