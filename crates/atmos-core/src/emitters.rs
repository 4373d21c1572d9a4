//! Particle emitters on blocks grinding against hazardous terrain.
//!
//! Workers report which blocks should smoke and with which effect. The
//! active aggregator reconciles that request against the live set once per
//! collection cycle and moves the live emitters every frame.

use std::collections::HashMap;

use atmos_types::{DVec3, EffectHandle, EffectId, EmitterBatch, EntityKey, GridSize};
use atmos_world::{EffectHost, EntityKind, EntityQuery};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::config::EmitterConfig;

/// Counts from one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterChanges {
    /// Emitters stopped.
    pub removed: usize,
    /// Emitters started.
    pub added: usize,
}

#[derive(Debug, Clone, Copy)]
struct LiveEmitter {
    handle: EffectHandle,
    effect: EffectId,
}

/// Live emitters keyed by the block they follow.
#[derive(Debug)]
pub struct EmitterSet {
    settings: EmitterConfig,
    live: HashMap<EntityKey, LiveEmitter>,
}

impl EmitterSet {
    /// Empty set.
    pub fn new(settings: EmitterConfig) -> Self {
        Self {
            settings,
            live: HashMap::new(),
        }
    }

    /// Number of live emitters.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no emitter is live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Effect currently playing on `block`.
    pub fn effect_on(&self, block: EntityKey) -> Option<EffectId> {
        self.live.get(&block).map(|e| e.effect)
    }

    /// Stop emitters that are no longer requested or have drifted out of
    /// range of the camera, then start requested emitters near the camera
    /// in random order.
    pub fn reconcile<H>(
        &mut self,
        host: &H,
        requested: &EmitterBatch,
        camera: DVec3,
        rng: &mut impl Rng,
    ) -> EmitterChanges
    where
        H: EntityQuery + EffectHost,
    {
        let keep_sq = self.settings.keep_radius * self.settings.keep_radius;
        let spawn_sq = self.settings.spawn_radius * self.settings.spawn_radius;
        let mut changes = EmitterChanges::default();

        self.live.retain(|block, emitter| {
            let keep = requested.contains_key(block)
                && host
                    .entity(*block)
                    .is_some_and(|b| b.position.distance_squared(camera) <= keep_sq);
            if !keep {
                host.remove_effect(emitter.handle);
                changes.removed = changes.removed.saturating_add(1);
            }
            keep
        });

        let mut fresh: Vec<(EntityKey, EffectId, DVec3, GridSize)> = requested
            .iter()
            .filter(|(block, _)| !self.live.contains_key(*block))
            .filter_map(|(block, effect)| {
                let snapshot = host.entity(*block)?;
                let EntityKind::Block { size, .. } = snapshot.kind else {
                    return None;
                };
                (snapshot.position.distance_squared(camera) < spawn_sq)
                    .then_some((*block, *effect, snapshot.position, size))
            })
            .collect();
        fresh.shuffle(rng);

        for (block, effect, position, size) in fresh {
            let scale = match size {
                GridSize::Small => self.settings.small_grid_scale,
                GridSize::Large => 1.0,
            };
            if let Some(handle) = host.create_effect(effect, position, scale) {
                self.live.insert(block, LiveEmitter { handle, effect });
                changes.added = changes.added.saturating_add(1);
            }
        }

        if changes != EmitterChanges::default() {
            debug!(
                removed = changes.removed,
                added = changes.added,
                live = self.live.len(),
                "emitters reconciled"
            );
        }
        changes
    }

    /// Move every emitter onto its block. Emitters whose block is gone or
    /// closed are stopped. Returns how many were stopped.
    pub fn follow<H>(&mut self, host: &H) -> usize
    where
        H: EntityQuery + EffectHost,
    {
        let before = self.live.len();
        self.live.retain(|block, emitter| {
            let alive = host
                .entity(*block)
                .filter(|b| !b.closed)
                .is_some_and(|b| host.move_effect(emitter.handle, b.position));
            if !alive {
                host.remove_effect(emitter.handle);
            }
            alive
        });
        before.saturating_sub(self.live.len())
    }

    /// Stop every emitter.
    pub fn clear<H: EffectHost>(&mut self, host: &H) {
        for (_, emitter) in self.live.drain() {
            host.remove_effect(emitter.handle);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use atmos_world::SimWorld;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    const SMOKE: EffectId = EffectId(3);

    fn block_at(world: &SimWorld, position: DVec3, size: GridSize) -> EntityKey {
        let grid = world.add_grid(position, size, true);
        world.add_block(grid, DVec3::ZERO, DVec3::splat(0.5), true).unwrap()
    }

    #[test]
    fn starts_only_near_the_camera_with_size_scale() {
        let world = SimWorld::new();
        let near_small = block_at(&world, DVec3::new(10.0, 0.0, 0.0), GridSize::Small);
        let near_large = block_at(&world, DVec3::new(-10.0, 0.0, 0.0), GridSize::Large);
        let far = block_at(&world, DVec3::new(150.0, 0.0, 0.0), GridSize::Large);
        let requested: EmitterBatch = [(near_small, SMOKE), (near_large, SMOKE), (far, SMOKE)]
            .into_iter()
            .collect();

        let mut set = EmitterSet::new(EmitterConfig::default());
        let mut rng = SmallRng::seed_from_u64(9);
        let changes = set.reconcile(&world, &requested, DVec3::ZERO, &mut rng);
        assert_eq!(changes, EmitterChanges { removed: 0, added: 2 });
        assert_eq!(set.effect_on(near_small), Some(SMOKE));
        assert_eq!(set.effect_on(far), None);

        let mut scales: Vec<f32> = world.live_effects().iter().map(|e| e.scale).collect();
        scales.sort_by(f32::total_cmp);
        assert_eq!(scales, vec![0.1, 1.0]);
    }

    #[test]
    fn stops_unrequested_and_out_of_range() {
        let world = SimWorld::new();
        let a = block_at(&world, DVec3::new(10.0, 0.0, 0.0), GridSize::Large);
        let b = block_at(&world, DVec3::new(20.0, 0.0, 0.0), GridSize::Large);
        let both: EmitterBatch = [(a, SMOKE), (b, SMOKE)].into_iter().collect();

        let mut set = EmitterSet::new(EmitterConfig::default());
        let mut rng = SmallRng::seed_from_u64(1);
        set.reconcile(&world, &both, DVec3::ZERO, &mut rng);
        assert_eq!(set.len(), 2);

        // `a` is no longer requested; the camera moved 250 m away from `b`.
        let only_b: EmitterBatch = [(b, SMOKE)].into_iter().collect();
        let changes = set.reconcile(&world, &only_b, DVec3::new(270.0, 0.0, 0.0), &mut rng);
        assert_eq!(changes.removed, 2);
        assert!(set.is_empty());
        assert!(world.live_effects().is_empty());
    }

    #[test]
    fn follow_tracks_moving_blocks_and_drops_destroyed_ones() {
        let world = SimWorld::new();
        let grid = world.add_grid(DVec3::new(5.0, 0.0, 0.0), GridSize::Large, true);
        let moving = world.add_block(grid, DVec3::ZERO, DVec3::ONE, true).unwrap();
        let doomed = block_at(&world, DVec3::new(-5.0, 0.0, 0.0), GridSize::Large);
        let requested: EmitterBatch = [(moving, SMOKE), (doomed, SMOKE)].into_iter().collect();

        let mut set = EmitterSet::new(EmitterConfig::default());
        let mut rng = SmallRng::seed_from_u64(4);
        set.reconcile(&world, &requested, DVec3::ZERO, &mut rng);

        world.move_entity(grid, DVec3::new(8.0, 0.0, 0.0)).unwrap();
        assert!(world.remove(doomed));
        assert_eq!(set.follow(&world), 1);
        assert_eq!(set.len(), 1);

        let live = world.live_effects();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].position, DVec3::new(8.0, 0.0, 0.0));

        set.clear(&world);
        assert!(world.live_effects().is_empty());
    }
}
