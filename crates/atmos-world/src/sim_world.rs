//! In-memory host world.
//!
//! [`SimWorld`] implements every capability trait in [`crate::host`] over a
//! slot-map entity table. Terrain volumes are spheres, grids are collections
//! of box-shaped blocks sharing the grid's orientation, and damage reduces a
//! per-entity integrity value until the entity is removed.
//!
//! All state sits behind `parking_lot` locks so a world can be shared with
//! background scans through an `Arc`. Volume caches use an `Arc`-owned mutex
//! so that a [`SimVolumePin`] can hold the lock without borrowing the world.

use std::sync::Arc;

use atmos_types::{
    Aabb, DQuat, DVec3, EffectHandle, EffectId, EntityKey, GridSize, Line, Obb, Sphere,
};
use parking_lot::{Mutex, RawMutex, RwLock, lock_api::ArcMutexGuard};
use slotmap::SlotMap;
use tracing::trace;

use crate::error::WorldError;
use crate::host::{
    DamageSink, EffectHost, EntityKind, EntityQuery, EntitySnapshot, LifeSupport, PhysicsQuery,
    VolumeContact, VolumePin, VolumeQuery,
};

/// Integrity of a freshly placed block.
const BLOCK_INTEGRITY: f32 = 100.0;
/// Integrity of a fresh character.
const CHARACTER_INTEGRITY: f32 = 100.0;
/// Integrity of a fresh floating object.
const FLOATING_INTEGRITY: f32 = 10.0;
/// Integrity of a grid hull. Damage is normally applied to blocks.
const GRID_INTEGRITY: f32 = 1_000.0;
/// Half extents used for a grid with no blocks.
const EMPTY_GRID_HALF_EXTENT: f64 = 0.5;

/// One recorded damage application.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageEvent {
    /// Entity that was damaged.
    pub target: EntityKey,
    /// Amount applied.
    pub amount: f32,
    /// Cause label passed by the caller.
    pub cause: String,
    /// Whether replication was requested.
    pub sync: bool,
    /// Whether the damage destroyed the target.
    pub destroyed: bool,
}

/// A particle effect currently alive in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveEffect {
    /// Handle the effect was created under.
    pub handle: EffectHandle,
    /// Effect definition.
    pub effect: EffectId,
    /// Current position.
    pub position: DVec3,
    /// Emitter scale.
    pub scale: f32,
}

/// Shared read cache of a terrain volume.
///
/// Only touched while pinned.
#[derive(Debug, Default)]
struct VolumeCache {
    queries: u64,
}

#[derive(Debug)]
struct SimEntity {
    position: DVec3,
    integrity: f32,
    covered: bool,
    closed: bool,
    body: SimBody,
}

#[derive(Debug)]
enum SimBody {
    Grid {
        size: GridSize,
        physics: bool,
        orientation: DQuat,
        blocks: Vec<EntityKey>,
    },
    Block {
        grid: EntityKey,
        local_offset: DVec3,
        half_extents: DVec3,
        exterior: bool,
    },
    Character {
        oxygen: f32,
    },
    FloatingObject,
    Volume {
        radius: f64,
        material: u8,
        parent: Option<EntityKey>,
        cache: Arc<Mutex<VolumeCache>>,
    },
}

type EntityTable = SlotMap<EntityKey, SimEntity>;

/// Deterministic in-memory implementation of the host capabilities.
#[derive(Debug)]
pub struct SimWorld {
    entities: RwLock<EntityTable>,
    effects: Mutex<SlotMap<EffectHandle, LiveEffect>>,
    ambient_oxygen: RwLock<f32>,
    damage_log: Mutex<Vec<DamageEvent>>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    /// Empty world with no breathable atmosphere.
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(SlotMap::with_key()),
            effects: Mutex::new(SlotMap::with_key()),
            ambient_oxygen: RwLock::new(0.0),
            damage_log: Mutex::new(Vec::new()),
        }
    }

    /// Set the oxygen level the environment supplies everywhere.
    pub fn set_ambient_oxygen(&self, level: f32) {
        *self.ambient_oxygen.write() = level;
    }

    // -----------------------------------------------------------------------
    // Population
    // -----------------------------------------------------------------------

    /// Add a root terrain volume.
    pub fn add_volume(&self, center: DVec3, radius: f64, material: u8) -> EntityKey {
        self.insert(center, f32::MAX, Self::volume_body(radius, material, None))
    }

    /// Add a terrain volume attached to `parent`. It is not its own root.
    pub fn add_sub_volume(
        &self,
        parent: EntityKey,
        center: DVec3,
        radius: f64,
        material: u8,
    ) -> EntityKey {
        self.insert(center, f32::MAX, Self::volume_body(radius, material, Some(parent)))
    }

    /// Add an empty grid with identity orientation.
    pub fn add_grid(&self, position: DVec3, size: GridSize, physics: bool) -> EntityKey {
        self.add_oriented_grid(position, DQuat::IDENTITY, size, physics)
    }

    /// Add an empty grid with the given orientation.
    pub fn add_oriented_grid(
        &self,
        position: DVec3,
        orientation: DQuat,
        size: GridSize,
        physics: bool,
    ) -> EntityKey {
        let body = SimBody::Grid {
            size,
            physics,
            orientation: orientation.normalize(),
            blocks: Vec::new(),
        };
        self.insert(position, GRID_INTEGRITY, body)
    }

    /// Add a block to `grid` at `local_offset` from the grid origin.
    pub fn add_block(
        &self,
        grid: EntityKey,
        local_offset: DVec3,
        half_extents: DVec3,
        exterior: bool,
    ) -> Result<EntityKey, WorldError> {
        let mut entities = self.entities.write();
        let parent = entities.get(grid).ok_or(WorldError::StaleEntity(grid))?;
        let SimBody::Grid { orientation, .. } = &parent.body else {
            return Err(WorldError::WrongKind {
                key: grid,
                expected: "grid",
            });
        };
        let position = parent.position + *orientation * local_offset;
        let block = entities.insert(SimEntity {
            position,
            integrity: BLOCK_INTEGRITY,
            covered: false,
            closed: false,
            body: SimBody::Block {
                grid,
                local_offset,
                half_extents: half_extents.abs(),
                exterior,
            },
        });
        if let Some(SimEntity {
            body: SimBody::Grid { blocks, .. },
            ..
        }) = entities.get_mut(grid)
        {
            blocks.push(block);
        }
        Ok(block)
    }

    /// Add a character carrying `oxygen` in its suit.
    pub fn add_character(&self, position: DVec3, oxygen: f32) -> EntityKey {
        self.insert(position, CHARACTER_INTEGRITY, SimBody::Character { oxygen })
    }

    /// Add a loose floating object.
    pub fn add_floating_object(&self, position: DVec3) -> EntityKey {
        self.insert(position, FLOATING_INTEGRITY, SimBody::FloatingObject)
    }

    /// Mark an entity as sheltered from sky hazards.
    pub fn set_covered(&self, key: EntityKey, covered: bool) -> Result<(), WorldError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(key).ok_or(WorldError::StaleEntity(key))?;
        entity.covered = covered;
        Ok(())
    }

    /// Move an entity. Moving a grid carries its blocks along.
    pub fn move_entity(&self, key: EntityKey, position: DVec3) -> Result<(), WorldError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(key).ok_or(WorldError::StaleEntity(key))?;
        let delta = position - entity.position;
        entity.position = position;
        let blocks = match &entity.body {
            SimBody::Grid { blocks, .. } => blocks.clone(),
            _ => Vec::new(),
        };
        for block in blocks {
            if let Some(b) = entities.get_mut(block) {
                b.position += delta;
            }
        }
        Ok(())
    }

    /// Mark an entity as closed without removing it.
    pub fn close(&self, key: EntityKey) -> Result<(), WorldError> {
        let mut entities = self.entities.write();
        let entity = entities.get_mut(key).ok_or(WorldError::StaleEntity(key))?;
        entity.closed = true;
        Ok(())
    }

    /// Remove an entity (and a grid's blocks). Returns `false` for a stale key.
    pub fn remove(&self, key: EntityKey) -> bool {
        let mut entities = self.entities.write();
        Self::remove_locked(&mut entities, key)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Whether the key refers to a live entity.
    pub fn contains(&self, key: EntityKey) -> bool {
        self.entities.read().contains_key(key)
    }

    /// Remaining integrity of an entity.
    pub fn integrity(&self, key: EntityKey) -> Option<f32> {
        self.entities.read().get(key).map(|e| e.integrity)
    }

    /// Every damage application so far, in order.
    pub fn damage_events(&self) -> Vec<DamageEvent> {
        self.damage_log.lock().clone()
    }

    /// Effects currently alive.
    pub fn live_effects(&self) -> Vec<LiveEffect> {
        self.effects.lock().values().copied().collect()
    }

    /// How many intersection queries a volume has served while pinned.
    pub fn volume_queries(&self, volume: EntityKey) -> Option<u64> {
        let cache = match &self.entities.read().get(volume)?.body {
            SimBody::Volume { cache, .. } => Arc::clone(cache),
            _ => return None,
        };
        let queries = cache.lock().queries;
        Some(queries)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn volume_body(radius: f64, material: u8, parent: Option<EntityKey>) -> SimBody {
        SimBody::Volume {
            radius: radius.abs(),
            material,
            parent,
            cache: Arc::new(Mutex::new(VolumeCache::default())),
        }
    }

    fn insert(&self, position: DVec3, integrity: f32, body: SimBody) -> EntityKey {
        self.entities.write().insert(SimEntity {
            position,
            integrity,
            covered: false,
            closed: false,
            body,
        })
    }

    fn remove_locked(entities: &mut EntityTable, key: EntityKey) -> bool {
        let Some(removed) = entities.remove(key) else {
            return false;
        };
        match removed.body {
            SimBody::Grid { blocks, .. } => {
                for block in blocks {
                    entities.remove(block);
                }
            }
            SimBody::Block { grid, .. } => {
                if let Some(SimEntity {
                    body: SimBody::Grid { blocks, .. },
                    ..
                }) = entities.get_mut(grid)
                {
                    blocks.retain(|b| *b != key);
                }
            }
            _ => {}
        }
        true
    }

    /// Oriented bounds of a grid, enclosing all of its blocks.
    fn grid_bounds(entities: &EntityTable, entity: &SimEntity) -> Option<Obb> {
        let SimBody::Grid {
            orientation,
            blocks,
            ..
        } = &entity.body
        else {
            return None;
        };
        let corners = blocks.iter().filter_map(|b| match entities.get(*b) {
            Some(SimEntity {
                body:
                    SimBody::Block {
                        local_offset,
                        half_extents,
                        ..
                    },
                ..
            }) => Some([*local_offset - *half_extents, *local_offset + *half_extents]),
            _ => None,
        });
        let local = Aabb::from_points(corners.flatten()).unwrap_or_else(|| {
            Aabb::from_center(DVec3::ZERO, DVec3::splat(EMPTY_GRID_HALF_EXTENT))
        });
        Some(Obb::from_local_aabb(&local, *orientation, entity.position))
    }

    fn block_bounds(entities: &EntityTable, entity: &SimEntity) -> Option<Obb> {
        let SimBody::Block {
            grid, half_extents, ..
        } = &entity.body
        else {
            return None;
        };
        let orientation = match entities.get(*grid).map(|g| &g.body) {
            Some(SimBody::Grid { orientation, .. }) => *orientation,
            _ => DQuat::IDENTITY,
        };
        Some(Obb::new(entity.position, *half_extents, orientation))
    }

    /// Radius of a sphere around the entity position that encloses it.
    fn bounding_radius(entities: &EntityTable, entity: &SimEntity) -> f64 {
        match &entity.body {
            SimBody::Volume { radius, .. } => *radius,
            SimBody::Grid { .. } => Self::grid_bounds(entities, entity).map_or(0.0, |obb| {
                obb.center.distance(entity.position) + obb.half_extents.length()
            }),
            _ => 0.0,
        }
    }

    fn snapshot(entities: &EntityTable, key: EntityKey, entity: &SimEntity) -> EntitySnapshot {
        let kind = match &entity.body {
            SimBody::Grid { size, physics, .. } => EntityKind::Grid {
                size: *size,
                has_physics: *physics,
                bounds: Self::grid_bounds(entities, entity).unwrap_or_else(|| {
                    Obb::new(
                        entity.position,
                        DVec3::splat(EMPTY_GRID_HALF_EXTENT),
                        DQuat::IDENTITY,
                    )
                }),
            },
            SimBody::Block { grid, .. } => EntityKind::Block {
                grid: *grid,
                size: match entities.get(*grid).map(|g| &g.body) {
                    Some(SimBody::Grid { size, .. }) => *size,
                    _ => GridSize::Large,
                },
            },
            SimBody::Character { .. } => EntityKind::Character,
            SimBody::FloatingObject => EntityKind::FloatingObject,
            SimBody::Volume { radius, parent, .. } => EntityKind::Volume {
                root: parent.is_none(),
                radius: *radius,
            },
        };
        EntitySnapshot {
            key,
            position: entity.position,
            closed: entity.closed,
            kind,
        }
    }

    fn volume(entities: &EntityTable, key: EntityKey) -> Option<(DVec3, f64, u8)> {
        match entities.get(key) {
            Some(SimEntity {
                position,
                body: SimBody::Volume {
                    radius, material, ..
                },
                ..
            }) => Some((*position, *radius, *material)),
            _ => None,
        }
    }
}

impl EntityQuery for SimWorld {
    fn top_entities_in_sphere(&self, sphere: &Sphere) -> Vec<EntitySnapshot> {
        let entities = self.entities.read();
        entities
            .iter()
            .filter(|(_, e)| !matches!(e.body, SimBody::Block { .. }))
            .filter(|(_, e)| {
                let reach = sphere.radius + Self::bounding_radius(&entities, e);
                e.position.distance_squared(sphere.center) <= reach * reach
            })
            .map(|(k, e)| Self::snapshot(&entities, k, e))
            .collect()
    }

    fn top_entities_in_box(&self, aabb: &Aabb) -> Vec<EntitySnapshot> {
        let entities = self.entities.read();
        entities
            .iter()
            .filter(|(_, e)| !matches!(e.body, SimBody::Block { .. }))
            .filter(|(_, e)| {
                let radius = Self::bounding_radius(&entities, e);
                let nearest = e.position.clamp(aabb.min, aabb.max);
                nearest.distance_squared(e.position) <= radius * radius
            })
            .map(|(k, e)| Self::snapshot(&entities, k, e))
            .collect()
    }

    fn entity(&self, key: EntityKey) -> Option<EntitySnapshot> {
        let entities = self.entities.read();
        entities
            .get(key)
            .map(|e| Self::snapshot(&entities, key, e))
    }
}

impl PhysicsQuery for SimWorld {
    fn ray_cast_blocks(&self, grid: EntityKey, line: &Line) -> Option<Obb> {
        let entities = self.entities.read();
        let SimBody::Grid { blocks, .. } = &entities.get(grid)?.body else {
            return None;
        };
        blocks
            .iter()
            .filter_map(|b| entities.get(*b))
            .filter_map(|b| Self::block_bounds(&entities, b))
            .filter_map(|obb| obb.intersect_line(line).map(|d| (d, obb)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, obb)| obb)
    }

    fn grid_blocks(&self, grid: EntityKey) -> Vec<EntityKey> {
        match self.entities.read().get(grid).map(|g| &g.body) {
            Some(SimBody::Grid { blocks, .. }) => blocks.clone(),
            _ => Vec::new(),
        }
    }

    fn blocks_contacting_volume(&self, grid: EntityKey, volume: EntityKey) -> VolumeContact {
        let entities = self.entities.read();
        let Some((center, radius, material)) = Self::volume(&entities, volume) else {
            return VolumeContact::default();
        };
        let Some(SimBody::Grid { blocks, .. }) = entities.get(grid).map(|g| &g.body) else {
            return VolumeContact::default();
        };
        let touching: Vec<EntityKey> = blocks
            .iter()
            .copied()
            .filter(|b| match entities.get(*b) {
                Some(SimEntity {
                    position,
                    body: SimBody::Block { half_extents, .. },
                    ..
                }) => position.distance(center) <= radius + half_extents.length(),
                _ => false,
            })
            .collect();
        let material = (!touching.is_empty()).then_some(material);
        VolumeContact {
            blocks: touching,
            material,
        }
    }

    fn exposed_blocks(&self, grid: EntityKey, facing: Option<DVec3>) -> Vec<EntityKey> {
        let entities = self.entities.read();
        let Some(SimBody::Grid {
            blocks,
            orientation,
            ..
        }) = entities.get(grid).map(|g| &g.body)
        else {
            return Vec::new();
        };
        blocks
            .iter()
            .copied()
            .filter(|b| match entities.get(*b) {
                Some(SimEntity {
                    body:
                        SimBody::Block {
                            local_offset,
                            exterior,
                            ..
                        },
                    ..
                }) => {
                    *exterior
                        && facing.is_none_or(|dir| (*orientation * *local_offset).dot(dir) >= 0.0)
                }
                _ => false,
            })
            .collect()
    }

    fn is_covered(&self, entity: EntityKey, _from: DVec3) -> bool {
        self.entities.read().get(entity).is_some_and(|e| e.covered)
    }
}

/// Exclusive hold on a sphere volume's cache.
pub struct SimVolumePin {
    guard: ArcMutexGuard<RawMutex, VolumeCache>,
    surface: Sphere,
}

impl core::fmt::Debug for SimVolumePin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimVolumePin")
            .field("surface", &self.surface)
            .finish_non_exhaustive()
    }
}

impl VolumePin for SimVolumePin {
    fn intersect_line(&mut self, line: &Line) -> Option<DVec3> {
        self.guard.queries = self.guard.queries.saturating_add(1);
        self.surface
            .intersect_line(line)
            .map(|distance| line.point_at(distance))
    }
}

impl VolumeQuery for SimWorld {
    type Pin = SimVolumePin;

    fn closest_surface_point(&self, volume: EntityKey, point: DVec3) -> Option<DVec3> {
        let (center, radius, _) = Self::volume(&self.entities.read(), volume)?;
        let outward = (point - center).try_normalize()?;
        Some(center + outward * radius)
    }

    fn material_at(&self, volume: EntityKey, _point: DVec3) -> Option<u8> {
        Self::volume(&self.entities.read(), volume).map(|(_, _, material)| material)
    }

    fn is_inside_volume(&self, entity: EntityKey, volume: EntityKey) -> bool {
        let entities = self.entities.read();
        let Some((center, radius, _)) = Self::volume(&entities, volume) else {
            return false;
        };
        entities
            .get(entity)
            .is_some_and(|e| e.position.distance_squared(center) < radius * radius)
    }

    fn pin(&self, volume: EntityKey) -> Option<Self::Pin> {
        let (cache, surface) = match self.entities.read().get(volume)? {
            SimEntity {
                position,
                body: SimBody::Volume { radius, cache, .. },
                ..
            } => (Arc::clone(cache), Sphere::new(*position, *radius)),
            _ => return None,
        };
        trace!(?volume, "pinning volume");
        Some(SimVolumePin {
            guard: cache.lock_arc(),
            surface,
        })
    }
}

impl LifeSupport for SimWorld {
    fn oxygen_at(&self, _point: DVec3) -> f32 {
        *self.ambient_oxygen.read()
    }

    fn character_oxygen(&self, character: EntityKey) -> Option<f32> {
        match self.entities.read().get(character).map(|c| &c.body) {
            Some(SimBody::Character { oxygen }) => Some(*oxygen),
            _ => None,
        }
    }
}

impl DamageSink for SimWorld {
    fn apply_damage(
        &self,
        target: EntityKey,
        amount: f32,
        cause: &str,
        sync: bool,
    ) -> Result<(), WorldError> {
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(target)
            .ok_or(WorldError::StaleEntity(target))?;
        if entity.closed {
            return Err(WorldError::Closed(target));
        }
        entity.integrity -= amount;
        let destroyed = entity.integrity <= 0.0;
        if destroyed {
            Self::remove_locked(&mut entities, target);
        }
        drop(entities);

        trace!(?target, amount, cause, destroyed, "damage applied");
        self.damage_log.lock().push(DamageEvent {
            target,
            amount,
            cause: cause.to_owned(),
            sync,
            destroyed,
        });
        Ok(())
    }
}

impl EffectHost for SimWorld {
    fn create_effect(&self, effect: EffectId, position: DVec3, scale: f32) -> Option<EffectHandle> {
        let mut effects = self.effects.lock();
        let handle = effects.insert_with_key(|handle| LiveEffect {
            handle,
            effect,
            position,
            scale,
        });
        Some(handle)
    }

    fn move_effect(&self, handle: EffectHandle, position: DVec3) -> bool {
        self.effects
            .lock()
            .get_mut(handle)
            .map(|e| e.position = position)
            .is_some()
    }

    fn remove_effect(&self, handle: EffectHandle) {
        self.effects.lock().remove(handle);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn grid_with_blocks(world: &SimWorld) -> (EntityKey, EntityKey, EntityKey) {
        let grid = world.add_grid(DVec3::new(0.0, 0.0, 10.0), GridSize::Large, true);
        let near = world
            .add_block(grid, DVec3::new(0.0, 0.0, -2.0), DVec3::splat(1.0), true)
            .unwrap();
        let far = world
            .add_block(grid, DVec3::new(0.0, 0.0, 2.0), DVec3::splat(1.0), false)
            .unwrap();
        (grid, near, far)
    }

    #[test]
    fn sphere_query_returns_top_level_entities_only() {
        let world = SimWorld::new();
        let (grid, _, _) = grid_with_blocks(&world);
        let character = world.add_character(DVec3::new(1.0, 0.0, 0.0), 1.0);
        world.add_character(DVec3::new(500.0, 0.0, 0.0), 1.0);

        let found = world.top_entities_in_sphere(&Sphere::new(DVec3::ZERO, 20.0));
        let keys: Vec<_> = found.iter().map(|s| s.key).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&grid));
        assert!(keys.contains(&character));
    }

    #[test]
    fn ray_cast_picks_nearest_block() {
        let world = SimWorld::new();
        let (grid, _, _) = grid_with_blocks(&world);
        let line = Line::new(DVec3::ZERO, DVec3::new(0.0, 0.0, 30.0)).unwrap();
        let obb = world.ray_cast_blocks(grid, &line).unwrap();
        assert!(obb.center.abs_diff_eq(DVec3::new(0.0, 0.0, 8.0), 1e-9));
        assert!((obb.intersect_line(&line).unwrap() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn destroying_a_block_removes_it_from_its_grid() {
        let world = SimWorld::new();
        let (grid, near, far) = grid_with_blocks(&world);
        world.apply_damage(near, 150.0, "acid", true).unwrap();
        assert!(!world.contains(near));
        assert_eq!(world.grid_blocks(grid), vec![far]);

        let events = world.damage_events();
        assert_eq!(events.len(), 1);
        assert!(events.first().unwrap().destroyed);
    }

    #[test]
    fn stale_and_closed_targets_are_rejected() {
        let world = SimWorld::new();
        let thing = world.add_floating_object(DVec3::ZERO);
        world.close(thing).unwrap();
        assert_eq!(
            world.apply_damage(thing, 1.0, "acid", false),
            Err(WorldError::Closed(thing))
        );
        assert!(world.remove(thing));
        assert_eq!(
            world.apply_damage(thing, 1.0, "acid", false),
            Err(WorldError::StaleEntity(thing))
        );
        assert!(world.damage_events().is_empty());
    }

    #[test]
    fn exposed_blocks_respect_facing() {
        let world = SimWorld::new();
        let (grid, near, far) = grid_with_blocks(&world);
        world.add_block(grid, DVec3::new(0.0, 0.0, 4.0), DVec3::ONE, true).unwrap();

        let all = world.exposed_blocks(grid, None);
        assert_eq!(all.len(), 2);
        assert!(!all.contains(&far));

        let facing_back = world.exposed_blocks(grid, Some(DVec3::NEG_Z));
        assert_eq!(facing_back, vec![near]);
    }

    #[test]
    fn pinned_volume_counts_queries() {
        let world = SimWorld::new();
        let planet = world.add_volume(DVec3::ZERO, 100.0, 3);
        let line = Line::new(DVec3::new(0.0, 150.0, 0.0), DVec3::ZERO).unwrap();
        {
            let mut pin = world.pin(planet).unwrap();
            let hit = pin.intersect_line(&line).unwrap();
            assert!(hit.abs_diff_eq(DVec3::new(0.0, 100.0, 0.0), 1e-9));
        }
        assert_eq!(world.volume_queries(planet), Some(1));
        assert!(world.pin(world.add_character(DVec3::ZERO, 0.0)).is_none());
    }

    #[test]
    fn sub_volume_is_not_root() {
        let world = SimWorld::new();
        let planet = world.add_volume(DVec3::ZERO, 100.0, 0);
        let moon = world.add_sub_volume(planet, DVec3::new(0.0, 300.0, 0.0), 10.0, 0);
        let snapshot = world.entity(moon).unwrap();
        assert!(matches!(snapshot.kind, EntityKind::Volume { root: false, .. }));
    }

    #[test]
    fn moving_a_grid_moves_its_blocks() {
        let world = SimWorld::new();
        let (grid, near, _) = grid_with_blocks(&world);
        world.move_entity(grid, DVec3::new(5.0, 0.0, 10.0)).unwrap();
        let block = world.entity(near).unwrap();
        assert!(block.position.abs_diff_eq(DVec3::new(5.0, 0.0, 8.0), 1e-9));
    }

    #[test]
    fn effects_can_be_moved_and_removed() {
        let world = SimWorld::new();
        let handle = world.create_effect(EffectId(4), DVec3::ZERO, 1.0).unwrap();
        assert!(world.move_effect(handle, DVec3::ONE));
        assert_eq!(world.live_effects().first().unwrap().position, DVec3::ONE);
        world.remove_effect(handle);
        assert!(!world.move_effect(handle, DVec3::ZERO));
        assert!(world.live_effects().is_empty());
    }
}
