//! Per-source hazard scanning.
//!
//! A [`HazardWorker`] owns one hazard source. Every scheduling opportunity
//! (every `worker_interval` simulation ticks) it advances its own counter
//! and, when the counter lands on the character or collection period,
//! launches a scan on the blocking pool. The scan reads the host, evaluates
//! the hazard rules, and upserts damage into a [`DamageAccumulator`]. It
//! never mutates the world.
//!
//! At most one scan per source runs at a time. The worker holds the scan's
//! `JoinHandle` in a single slot and only launches the next scan after it
//! has observed the previous one finish. A panicking scan surfaces as a
//! `JoinError`, is logged, and frees the slot.
//!
//! The worker answers three bus topics: damage collection (drains the
//! accumulator), emitter collection (the block to effect map of its last
//! planet scan) and debug draw (source-to-target lines of its last scan,
//! kept only in debug mode).

use std::sync::Arc;

use atmos_types::{
    DVec3, DamageBatch, EmitterBatch, EntityKey, GridSize, HazardSource, Line, Obb, SourceId,
};
use atmos_world::{DamageRules, EntityKind, EntitySnapshot, HostWorld};
use futures::FutureExt;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::bus::{HandlerId, Message, MessageBus, Topic};

/// Thread-safe map of pending damage keyed by target.
///
/// Upserts replace: within one collection window the last write for a
/// target wins.
#[derive(Debug, Default)]
pub struct DamageAccumulator {
    pending: Mutex<DamageBatch>,
}

impl DamageAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the pending amount for `target`.
    pub fn upsert(&self, target: EntityKey, amount: f32) {
        self.pending.lock().insert(target, amount);
    }

    /// Move every pending entry into `batch`, leaving the accumulator empty.
    /// Returns how many entries moved.
    pub fn drain_into(&self, batch: &mut DamageBatch) -> usize {
        let mut pending = self.pending.lock();
        let moved = pending.len();
        batch.extend(pending.drain());
        moved
    }

    /// Pending amount for `target`.
    pub fn get(&self, target: EntityKey) -> Option<f32> {
        self.pending.lock().get(&target).copied()
    }

    /// Number of pending targets.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Cadence and mode of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Collection period; planet passes run when the counter hits it.
    pub update_rate: u64,
    /// Ticks the counter advances per scheduling opportunity.
    pub worker_interval: u64,
    /// Character passes run when the counter hits this period.
    pub character_interval: u64,
    /// Keep scan lines for the debug-draw topic.
    pub debug: bool,
    /// Seed for block picks.
    pub seed: u64,
}

/// What one scheduling opportunity did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerTick {
    /// The previous scan is still running; the counter did not advance.
    Busy,
    /// Neither period was due.
    Idle,
    /// A scan was launched.
    Started {
        /// The scan includes the character pass.
        characters: bool,
        /// The scan includes the grid and floating-object passes.
        planet: bool,
    },
}

/// Counts from one finished scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Top-level entities inside the influence sphere.
    pub entities: usize,
    /// Characters evaluated.
    pub characters: usize,
    /// Grids evaluated.
    pub grids: usize,
    /// Floating objects evaluated.
    pub floating: usize,
    /// Upserts made into the accumulator.
    pub contributions: usize,
}

/// State shared between the worker, its scans and its bus handlers.
#[derive(Debug, Default)]
struct WorkerShared {
    accumulator: DamageAccumulator,
    emitters: Mutex<EmitterBatch>,
    debug_lines: Mutex<Vec<Line>>,
}

/// Background hazard scanner for one source.
pub struct HazardWorker<H: HostWorld> {
    source: HazardSource,
    host: Arc<H>,
    rules: Arc<DamageRules>,
    settings: WorkerSettings,
    shared: Arc<WorkerShared>,
    bus: Arc<MessageBus>,
    handlers: Vec<HandlerId>,
    runtime: Handle,
    scan: Option<JoinHandle<ScanReport>>,
    counter: u64,
    scans: u64,
    last_report: Option<ScanReport>,
}

impl<H: HostWorld> core::fmt::Debug for HazardWorker<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HazardWorker")
            .field("source", &self.source.id)
            .field("counter", &self.counter)
            .field("busy", &self.scan.is_some())
            .finish_non_exhaustive()
    }
}

impl<H: HostWorld> HazardWorker<H> {
    /// Create a worker for `source` and subscribe it to the bus.
    pub fn new(
        source: HazardSource,
        host: Arc<H>,
        rules: Arc<DamageRules>,
        settings: WorkerSettings,
        bus: Arc<MessageBus>,
        runtime: Handle,
    ) -> Self {
        let shared = Arc::new(WorkerShared::default());
        let handlers = vec![
            {
                let shared = Arc::clone(&shared);
                bus.register(Topic::CollectDamage, move |msg| {
                    if let Message::CollectDamage(batch) = msg {
                        shared.accumulator.drain_into(batch);
                    }
                })
            },
            {
                let shared = Arc::clone(&shared);
                bus.register(Topic::CollectEmitters, move |msg| {
                    if let Message::CollectEmitters(batch) = msg {
                        batch.extend(shared.emitters.lock().iter());
                    }
                })
            },
            {
                let shared = Arc::clone(&shared);
                bus.register(Topic::DebugDraw, move |msg| {
                    if let Message::DebugDraw(lines) = msg {
                        lines.extend(shared.debug_lines.lock().iter().copied());
                    }
                })
            },
        ];
        debug!(source = %source.id, name = %source.name, "hazard worker attached");
        Self {
            source,
            host,
            rules,
            settings,
            shared,
            bus,
            handlers,
            runtime,
            scan: None,
            counter: 0,
            scans: 0,
            last_report: None,
        }
    }

    /// The source this worker scans.
    pub const fn source(&self) -> &HazardSource {
        &self.source
    }

    /// Identity of the source.
    pub const fn source_id(&self) -> SourceId {
        self.source.id
    }

    /// The worker's accumulator.
    pub fn accumulator(&self) -> &DamageAccumulator {
        &self.shared.accumulator
    }

    /// Whether a scan is in flight.
    pub const fn is_busy(&self) -> bool {
        self.scan.is_some()
    }

    /// Scans launched so far.
    pub const fn scans_started(&self) -> u64 {
        self.scans
    }

    /// Counts from the most recently observed finished scan.
    pub const fn last_report(&self) -> Option<ScanReport> {
        self.last_report
    }

    /// One scheduling opportunity. Never blocks.
    pub fn tick(&mut self) -> WorkerTick {
        if let Some(handle) = self.scan.as_mut() {
            if !handle.is_finished() {
                return WorkerTick::Busy;
            }
            let Some(result) = handle.now_or_never() else {
                return WorkerTick::Busy;
            };
            self.scan = None;
            self.observe(result);
        }

        self.counter = self.counter.saturating_add(self.settings.worker_interval);
        let counter = self.counter;
        let every = |n: u64| counter.checked_rem(n.max(1)) == Some(0);
        let characters = every(self.settings.character_interval);
        let planet = every(self.settings.update_rate);
        if !(characters || planet) {
            return WorkerTick::Idle;
        }

        let job = ScanJob {
            host: Arc::clone(&self.host),
            source: self.source.clone(),
            rules: Arc::clone(&self.rules),
            shared: Arc::clone(&self.shared),
            characters,
            planet,
            debug: self.settings.debug,
            seed: self.settings.seed ^ self.counter,
        };
        self.scan = Some(self.runtime.spawn_blocking(move || job.run()));
        self.scans = self.scans.saturating_add(1);
        trace!(source = %self.source.id, counter = self.counter, characters, planet, "scan launched");
        WorkerTick::Started { characters, planet }
    }

    /// Wait for the in-flight scan, if any. Used at shutdown and in tests;
    /// the simulation tick never waits.
    pub async fn wait_for_scan(&mut self) {
        if let Some(handle) = self.scan.take() {
            let result = handle.await;
            self.observe(result);
        }
    }

    /// Unsubscribe from the bus. The in-flight scan, if any, finishes on its
    /// own and its results stay uncollected.
    pub fn close(&mut self) {
        for id in self.handlers.drain(..) {
            self.bus.unregister(id);
        }
        self.scan = None;
    }

    fn observe(&mut self, result: Result<ScanReport, tokio::task::JoinError>) {
        match result {
            Ok(report) => {
                debug!(
                    source = %self.source.id,
                    entities = report.entities,
                    contributions = report.contributions,
                    "scan finished"
                );
                self.last_report = Some(report);
            }
            Err(e) => warn!(source = %self.source.id, error = %e, "hazard scan failed"),
        }
    }
}

impl<H: HostWorld> Drop for HazardWorker<H> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Everything one background scan needs, moved onto the blocking pool.
struct ScanJob<H> {
    host: Arc<H>,
    source: HazardSource,
    rules: Arc<DamageRules>,
    shared: Arc<WorkerShared>,
    characters: bool,
    planet: bool,
    debug: bool,
    seed: u64,
}

impl<H: HostWorld> ScanJob<H> {
    fn run(self) -> ScanReport {
        let mut scan = Scan {
            host: &*self.host,
            source: &self.source,
            rules: &self.rules,
            accumulator: &self.shared.accumulator,
            rng: SmallRng::seed_from_u64(self.seed),
            emitters: EmitterBatch::new(),
            lines: Vec::new(),
            report: ScanReport::default(),
        };

        let entities = self
            .host
            .top_entities_in_sphere(&self.source.influence_sphere());
        scan.report.entities = entities.len();

        for entity in entities.iter().filter(|e| !e.closed) {
            let before = scan.report.contributions;
            match entity.kind {
                EntityKind::Character if self.characters && self.rules.damage_players => {
                    scan.character(entity);
                }
                EntityKind::Grid {
                    size,
                    has_physics: true,
                    bounds,
                } if self.planet => scan.grid(entity.key, size, &bounds),
                EntityKind::FloatingObject if self.planet => scan.floating(entity),
                _ => {}
            }
            if self.debug && scan.report.contributions > before {
                if let Ok(line) = Line::new(self.source.center, entity.position) {
                    scan.lines.push(line);
                }
            }
        }

        let Scan {
            emitters,
            lines,
            report,
            ..
        } = scan;
        if self.planet {
            *self.shared.emitters.lock() = emitters;
        }
        if self.debug {
            *self.shared.debug_lines.lock() = lines;
        }
        report
    }
}

/// Working state of one scan.
struct Scan<'a, H> {
    host: &'a H,
    source: &'a HazardSource,
    rules: &'a DamageRules,
    accumulator: &'a DamageAccumulator,
    rng: SmallRng,
    emitters: EmitterBatch,
    lines: Vec<Line>,
    report: ScanReport,
}

impl<H: HostWorld> Scan<'_, H> {
    fn damage(&mut self, target: EntityKey, amount: f32) {
        self.accumulator.upsert(target, amount);
        self.report.contributions = self.report.contributions.saturating_add(1);
    }

    /// Material id of the source's surface within `reach` of `position`.
    fn surface_material(&self, position: DVec3, reach: f64) -> Option<u8> {
        let volume = self.source.volume?;
        let surface = self.host.closest_surface_point(volume, position)?;
        if position.distance_squared(surface) > reach * reach {
            return None;
        }
        self.host.material_at(volume, surface)
    }

    fn character(&mut self, entity: &EntitySnapshot) {
        self.report.characters = self.report.characters.saturating_add(1);
        let key = entity.key;
        let amount = self.rules.player_damage_amount;

        if self.rules.player_acid_rain && !self.host.is_covered(key, self.source.center) {
            self.damage(key, amount);
        }

        if self.rules.player_radiation_damage {
            let breathing_ambient = self
                .host
                .character_oxygen(key)
                .is_none_or(|own| self.host.oxygen_at(entity.position) >= own);
            if breathing_ambient {
                self.damage(key, amount);
            }
        }

        if self.rules.player_voxel_damage {
            let item = self
                .surface_material(entity.position, self.rules.character_contact_distance)
                .and_then(|m| self.rules.material(m));
            if let Some(multiplier) = item.map(|i| i.character_multiplier) {
                self.damage(key, amount * multiplier);
            }
        }
    }

    fn grid(&mut self, grid: EntityKey, size: GridSize, bounds: &Obb) {
        self.report.grids = self.report.grids.saturating_add(1);
        let damage = self.rules.grid_damage(size);

        if self.rules.block_voxel_damage {
            if let Some(volume) = self.source.volume {
                self.voxel_contact(grid, volume, damage);
            }
        }

        if !self.rules.blocks_exposed_to_sky() {
            return;
        }

        let count = self.host.grid_blocks(grid).len();
        let facing = self
            .rules
            .block_acid_rain
            .then(|| (bounds.center - self.source.center).normalize_or_zero());
        let exposed = self.host.exposed_blocks(grid, facing);
        if exposed.is_empty() {
            return;
        }
        for _ in 0..exposure_picks(count, self.rules.exposed_block_fraction) {
            let pick = self.rng.random_range(0..exposed.len());
            if let Some(block) = exposed.get(pick) {
                self.damage(*block, damage);
            }
        }
    }

    fn voxel_contact(&mut self, grid: EntityKey, volume: EntityKey, damage: f32) {
        let contact = self.host.blocks_contacting_volume(grid, volume);
        if contact.blocks.is_empty() {
            return;
        }
        let Some(item) = self
            .rules
            .material_or_fallback(contact.material.unwrap_or_default())
        else {
            return;
        };
        let amount = damage * item.damage_multiplier;
        let effect = item.particle_effect;
        for block in contact.blocks {
            self.damage(block, amount);
            if let Some(effect) = effect {
                self.emitters.insert(block, effect);
            }
        }
    }

    fn floating(&mut self, entity: &EntitySnapshot) {
        self.report.floating = self.report.floating.saturating_add(1);
        let key = entity.key;
        let small = self.rules.small_ship_damage;

        if self.rules.block_radiation_damage {
            self.damage(key, small);
        }

        if self.rules.block_acid_rain {
            let buried = self
                .source
                .volume
                .is_some_and(|v| self.host.is_inside_volume(key, v));
            if !buried && !self.host.is_covered(key, self.source.center) {
                self.damage(key, small);
            }
        }

        let item = self
            .surface_material(entity.position, self.rules.floating_contact_distance)
            .and_then(|m| self.rules.material(m));
        if let Some(multiplier) = item.map(|i| i.damage_multiplier) {
            self.damage(key, self.rules.large_ship_damage * multiplier);
        }
    }
}

/// How many exposed blocks to damage on a grid of `count` blocks.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn exposure_picks(count: usize, fraction: f64) -> usize {
    let picks = (count as f64 * fraction).max(1.0).ceil();
    if picks.is_finite() {
        picks.min(count.max(1) as f64) as usize
    } else {
        1
    }
}
