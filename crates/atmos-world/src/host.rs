//! Capability traits the hazard pipeline consumes from its host.
//!
//! The host owns the entity table, the physics and volumetric queries, the
//! damage model and the particle system. These traits are the whole surface
//! the pipeline depends on; the pipeline implements none of them itself.
//!
//! Queries return snapshots or `Option`s rather than errors for missing
//! entities: a handle that went stale between a scan and its use is a normal
//! outcome and callers skip it.

use atmos_types::{
    Aabb, DVec3, EffectHandle, EffectId, EntityKey, GridSize, Line, Obb, Sphere,
};

use crate::error::WorldError;

/// Point-in-time view of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    /// Handle of the entity.
    pub key: EntityKey,
    /// World-space position (centre for volumes and grids).
    pub position: DVec3,
    /// Whether the entity is closed or marked for close.
    pub closed: bool,
    /// Kind-specific data.
    pub kind: EntityKind,
}

/// Kind-specific part of an [`EntitySnapshot`].
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    /// A rigid grid of blocks.
    Grid {
        /// Small or large block grid.
        size: GridSize,
        /// Whether the grid currently has a physics body.
        has_physics: bool,
        /// Coarse oriented bounds of the whole grid.
        bounds: Obb,
    },
    /// One block of a grid. Never returned as a top-level entity.
    Block {
        /// The grid that owns this block.
        grid: EntityKey,
        /// Size class of the owning grid.
        size: GridSize,
    },
    /// A player or NPC character.
    Character,
    /// A loose item floating in the world.
    FloatingObject,
    /// A volumetric terrain body.
    Volume {
        /// Whether this volume is its own root. Sub-volumes attached to a
        /// parent report `false`.
        root: bool,
        /// Bounding radius around [`EntitySnapshot::position`].
        radius: f64,
    },
}

/// Blocks of a grid touching a terrain volume, and the material they touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeContact {
    /// Blocks in contact.
    pub blocks: Vec<EntityKey>,
    /// Material id at the contact, when any block touches.
    pub material: Option<u8>,
}

/// Entity lookup and spatial queries.
pub trait EntityQuery {
    /// Top-level entities whose bounds overlap the sphere.
    fn top_entities_in_sphere(&self, sphere: &Sphere) -> Vec<EntitySnapshot>;

    /// Top-level entities whose bounds overlap the box.
    fn top_entities_in_box(&self, aabb: &Aabb) -> Vec<EntitySnapshot>;

    /// Snapshot of a single entity, or `None` if the handle is stale.
    fn entity(&self, key: EntityKey) -> Option<EntitySnapshot>;
}

/// Rigid-body queries.
pub trait PhysicsQuery {
    /// Precise ray cast against a grid's blocks along the segment.
    ///
    /// Returns the oriented bounds of the struck block, computed from the
    /// block's local extents and world transform.
    fn ray_cast_blocks(&self, grid: EntityKey, line: &Line) -> Option<Obb>;

    /// All blocks of a grid.
    fn grid_blocks(&self, grid: EntityKey) -> Vec<EntityKey>;

    /// Blocks of `grid` in contact with `volume`.
    fn blocks_contacting_volume(&self, grid: EntityKey, volume: EntityKey) -> VolumeContact;

    /// Exterior blocks of a grid. When `facing` is given, only blocks on the
    /// side of the grid that faces along that direction are returned.
    fn exposed_blocks(&self, grid: EntityKey, facing: Option<DVec3>) -> Vec<EntityKey>;

    /// Whether something shelters `entity` from a hazard arriving from `from`.
    fn is_covered(&self, entity: EntityKey, from: DVec3) -> bool;
}

/// Exclusive access to a volume's shared read caches.
///
/// Obtained from [`VolumeQuery::pin`]. Dropping the pin releases the volume.
pub trait VolumePin {
    /// Precise first intersection of the segment with the volume's surface.
    fn intersect_line(&mut self, line: &Line) -> Option<DVec3>;
}

/// Volumetric terrain queries.
pub trait VolumeQuery {
    /// Guard type returned by [`VolumeQuery::pin`].
    type Pin: VolumePin;

    /// Closest point on the volume's surface to `point`.
    fn closest_surface_point(&self, volume: EntityKey, point: DVec3) -> Option<DVec3>;

    /// Material id of the surface at `point`.
    fn material_at(&self, volume: EntityKey, point: DVec3) -> Option<u8>;

    /// Whether `entity` is fully buried inside `volume`.
    fn is_inside_volume(&self, entity: EntityKey, volume: EntityKey) -> bool;

    /// Acquire exclusive access for an intersection query.
    fn pin(&self, volume: EntityKey) -> Option<Self::Pin>;
}

/// Breathable-atmosphere queries used by the radiation rule.
pub trait LifeSupport {
    /// Oxygen level supplied by the environment at `point`.
    fn oxygen_at(&self, point: DVec3) -> f32;

    /// Oxygen level inside a character's suit, or `None` if the entity is
    /// not a character.
    fn character_oxygen(&self, character: EntityKey) -> Option<f32>;
}

/// Damage application.
pub trait DamageSink {
    /// Apply `amount` damage to `target`, attributed to `cause`.
    ///
    /// `sync` asks the host to replicate the damage to other peers.
    fn apply_damage(
        &self,
        target: EntityKey,
        amount: f32,
        cause: &str,
        sync: bool,
    ) -> Result<(), WorldError>;
}

/// Particle effect lifecycle.
pub trait EffectHost {
    /// Instantiate an effect at `position` with the given emitter scale.
    fn create_effect(&self, effect: EffectId, position: DVec3, scale: f32) -> Option<EffectHandle>;

    /// Move a live effect. Returns `false` if the handle is stale.
    fn move_effect(&self, handle: EffectHandle, position: DVec3) -> bool;

    /// Stop and remove an effect. Stale handles are ignored.
    fn remove_effect(&self, handle: EffectHandle);
}

/// Everything the hazard pipeline needs from its host.
pub trait HostWorld:
    EntityQuery + PhysicsQuery + VolumeQuery + LifeSupport + DamageSink + EffectHost + Send + Sync + 'static
{
}

impl<T> HostWorld for T where
    T: EntityQuery
        + PhysicsQuery
        + VolumeQuery
        + LifeSupport
        + DamageSink
        + EffectHost
        + Send
        + Sync
        + 'static
{
}
