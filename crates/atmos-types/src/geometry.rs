//! Geometry primitives used by the intersection sampler.
//!
//! All math is double precision because hazard sources sit far from the
//! world origin and single precision loses centimetres at planetary
//! distances.
//!
//! Segment tests return the distance along the segment's unit direction,
//! measured from its start point. A segment that starts inside a box
//! reports distance `0.0`.

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

/// Direction components smaller than this are treated as parallel to a slab.
const PARALLEL_EPSILON: f64 = 1e-12;

/// Errors raised when constructing geometry from degenerate input.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GeometryError {
    /// The start and end points coincide, so no direction exists.
    #[error("degenerate line: start and end coincide")]
    DegenerateLine,

    /// A coordinate was NaN or infinite.
    #[error("non-finite coordinate in {what}")]
    NonFinite {
        /// Which value carried the bad coordinate.
        what: &'static str,
    },
}

/// A directed line segment with a cached unit direction and length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Segment start.
    pub from: DVec3,
    /// Segment end.
    pub to: DVec3,
    /// Unit direction from `from` toward `to`.
    pub direction: DVec3,
    /// Distance between `from` and `to`.
    pub length: f64,
}

impl Line {
    /// Build the segment between two points.
    pub fn new(from: DVec3, to: DVec3) -> Result<Self, GeometryError> {
        let delta = to - from;
        let length = delta.length();
        Self::from_parts(from, delta, length)
    }

    /// Build a segment that starts at `from`, aims at `toward`, and is
    /// truncated to `length`.
    pub fn with_length(from: DVec3, toward: DVec3, length: f64) -> Result<Self, GeometryError> {
        Self::from_parts(from, toward - from, length)
    }

    fn from_parts(from: DVec3, delta: DVec3, length: f64) -> Result<Self, GeometryError> {
        if !from.is_finite() || !delta.is_finite() || !length.is_finite() {
            return Err(GeometryError::NonFinite { what: "line" });
        }
        let direction = delta.try_normalize().ok_or(GeometryError::DegenerateLine)?;
        Ok(Self {
            from,
            to: from + direction * length,
            direction,
            length,
        })
    }

    /// Point at `distance` along the segment direction.
    pub fn point_at(&self, distance: f64) -> DVec3 {
        self.from + self.direction * distance
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: DVec3,
    /// Maximum corner.
    pub max: DVec3,
}

impl Aabb {
    /// Box from two corners, in any order.
    pub fn new(a: DVec3, b: DVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Box centred on `center` with the given half extents.
    pub fn from_center(center: DVec3, half_extents: DVec3) -> Self {
        let half = half_extents.abs();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Smallest box enclosing every point. Returns `None` for an empty input.
    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |acc, p| Self {
            min: acc.min.min(p),
            max: acc.max.max(p),
        }))
    }

    /// Centre point.
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Full size along each axis.
    pub fn extents(&self) -> DVec3 {
        self.max - self.min
    }

    /// Half the size along each axis.
    pub fn half_extents(&self) -> DVec3 {
        self.extents() * 0.5
    }

    /// Whether `point` lies inside or on the box.
    pub fn contains(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Distance along `line` to the first contact with the box, if the
    /// segment touches it.
    pub fn intersect_line(&self, line: &Line) -> Option<f64> {
        let (enter, exit) = slab_interval(line.from, line.direction, self.min, self.max)?;
        clip_to_segment(enter, exit, line.length)
    }

    /// Whether the segment touches the box.
    pub fn intersects_line(&self, line: &Line) -> bool {
        self.intersect_line(line).is_some()
    }
}

/// Oriented bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obb {
    /// World-space centre.
    pub center: DVec3,
    /// Half size along each local axis.
    pub half_extents: DVec3,
    /// Rotation from local to world space.
    pub orientation: DQuat,
}

impl Obb {
    /// Box from a centre, half extents and orientation.
    pub fn new(center: DVec3, half_extents: DVec3, orientation: DQuat) -> Self {
        Self {
            center,
            half_extents: half_extents.abs(),
            orientation: orientation.normalize(),
        }
    }

    /// Place a local-space box in the world with a rotation and translation.
    pub fn from_local_aabb(local: &Aabb, orientation: DQuat, translation: DVec3) -> Self {
        let orientation = orientation.normalize();
        Self {
            center: translation + orientation * local.center(),
            half_extents: local.half_extents(),
            orientation,
        }
    }

    /// Distance along `line` to the first contact with the box.
    pub fn intersect_line(&self, line: &Line) -> Option<f64> {
        let to_local = self.orientation.inverse();
        let origin = to_local * (line.from - self.center);
        let direction = to_local * line.direction;
        let (enter, exit) = slab_interval(origin, direction, -self.half_extents, self.half_extents)?;
        clip_to_segment(enter, exit, line.length)
    }

    /// Whether the segment touches the box.
    pub fn intersects_line(&self, line: &Line) -> bool {
        self.intersect_line(line).is_some()
    }
}

/// Sphere, used for influence volumes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    /// Centre point.
    pub center: DVec3,
    /// Radius.
    pub radius: f64,
}

impl Sphere {
    /// Sphere from centre and radius.
    pub const fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Whether `point` lies inside or on the sphere.
    pub fn contains(&self, point: DVec3) -> bool {
        self.center.distance_squared(point) <= self.radius * self.radius
    }

    /// Distance along `line` to where it first enters the sphere surface,
    /// or `0.0` when it starts inside.
    pub fn intersect_line(&self, line: &Line) -> Option<f64> {
        let offset = line.from - self.center;
        let b = offset.dot(line.direction);
        let c = offset.length_squared() - self.radius * self.radius;
        let discriminant = b * b - c;
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        clip_to_segment(-b - root, -b + root, line.length)
    }
}

/// Ray-versus-slab interval. Returns the entry and exit parameters along
/// `direction`, or `None` when the ray misses.
fn slab_interval(origin: DVec3, direction: DVec3, min: DVec3, max: DVec3) -> Option<(f64, f64)> {
    let mut enter = f64::NEG_INFINITY;
    let mut exit = f64::INFINITY;

    let axes = origin
        .to_array()
        .into_iter()
        .zip(direction.to_array())
        .zip(min.to_array().into_iter().zip(max.to_array()));

    for ((o, d), (lo, hi)) in axes {
        if d.abs() < PARALLEL_EPSILON {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }
        let inv = d.recip();
        let near = (lo - o) * inv;
        let far = (hi - o) * inv;
        enter = enter.max(near.min(far));
        exit = exit.min(near.max(far));
        if enter > exit {
            return None;
        }
    }
    Some((enter, exit))
}

fn clip_to_segment(enter: f64, exit: f64, length: f64) -> Option<f64> {
    if exit < 0.0 || enter > length {
        return None;
    }
    Some(enter.max(0.0))
}
