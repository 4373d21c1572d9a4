//! Damage aggregation with single-instance election and throttled apply.
//!
//! Several aggregator instances may be loaded into one session. Exactly one
//! of them becomes active:
//!
//! 1. On its first tick an instance registers an init handler and an
//!    inhibit handler on the bus and moves to awaiting election.
//! 2. On its second tick it drops its own inhibit handler and declares
//!    itself to the session's [`Election`]. The first declaration wins. The
//!    winner broadcasts `Init(true)`; every registered init handler answers
//!    with `InitInhibit(true)`, and every instance still awaiting election
//!    receives that and disables itself.
//!
//! Instances that load after the broadcast find the election settled when
//! they declare and disable themselves.
//!
//! The active instance applies a bounded number of queued contributions per
//! tick and, every `update_rate` ticks, collects from all workers, shuffles
//! the batch and refills the queue up to `max_queue`. The per-tick budget is
//! sized so that one batch drains in one collection period.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use atmos_types::{DVec3, DamageBatch, DamageContribution, EmitterBatch, InstanceId, Line};
use atmos_world::{DamageSink, EffectHost, EntityQuery};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, trace, warn};

use crate::bus::{HandlerId, Message, MessageBus, Topic};
use crate::config::{ConfigError, EmitterConfig, ThrottleConfig};
use crate::emitters::{EmitterChanges, EmitterSet};
use crate::timing::ScopeTimer;

/// Lifecycle of an aggregator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    /// Loaded, not yet ticked.
    Uninitialized = 0,
    /// Handlers registered; the election runs on the next tick.
    AwaitingElection = 1,
    /// The one instance that collects and applies damage.
    Active = 2,
    /// Lost the election. Inert until unloaded.
    Disabled = 3,
}

impl Role {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::AwaitingElection,
            2 => Self::Active,
            _ => Self::Disabled,
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingElection => "awaiting_election",
            Self::Active => "active",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Role shared with the instance's bus handlers.
#[derive(Debug)]
struct RoleCell(AtomicU8);

impl RoleCell {
    const fn new(role: Role) -> Self {
        Self(AtomicU8::new(role as u8))
    }

    fn load(&self) -> Role {
        Role::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, role: Role) {
        self.0.store(role as u8, Ordering::Release);
    }

    fn transition(&self, from: Role, to: Role) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Session-scoped record of the elected aggregator.
#[derive(Debug, Default)]
pub struct Election {
    winner: OnceLock<InstanceId>,
}

impl Election {
    /// An election nobody has declared for yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `candidate`. Returns the winner, which is `candidate` only if
    /// nobody declared before.
    pub fn declare(&self, candidate: InstanceId) -> InstanceId {
        *self.winner.get_or_init(|| candidate)
    }

    /// The elected instance, if the election has run.
    pub fn winner(&self) -> Option<InstanceId> {
        self.winner.get().copied()
    }
}

/// Outcome of refilling the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Enqueued {
    /// Contributions accepted into the queue.
    pub accepted: usize,
    /// Contributions dropped at the capacity bound.
    pub dropped: usize,
}

/// Bounded FIFO of contributions waiting to be applied.
#[derive(Debug)]
pub struct PendingQueue {
    entries: VecDeque<DamageContribution>,
    capacity: usize,
    per_tick: usize,
}

impl PendingQueue {
    /// Empty queue holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            per_tick: 0,
        }
    }

    /// Append `batch` until the queue is full, then size the per-tick budget
    /// so the whole queue drains within `period` ticks.
    pub fn refill(
        &mut self,
        batch: impl IntoIterator<Item = DamageContribution>,
        period: u64,
    ) -> Enqueued {
        let mut outcome = Enqueued::default();
        for contribution in batch {
            if self.entries.len() < self.capacity {
                self.entries.push_back(contribution);
                outcome.accepted = outcome.accepted.saturating_add(1);
            } else {
                outcome.dropped = outcome.dropped.saturating_add(1);
            }
        }
        let period = usize::try_from(period.max(1)).unwrap_or(usize::MAX);
        self.per_tick = self.entries.len().div_ceil(period);
        outcome
    }

    /// Take up to one tick's worth of entries, oldest first.
    pub fn take_tick(&mut self) -> impl Iterator<Item = DamageContribution> + '_ {
        let n = self.per_tick.min(self.entries.len());
        self.entries.drain(..n)
    }

    /// Entries waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries applied per tick until the next refill.
    pub const fn per_tick(&self) -> usize {
        self.per_tick
    }
}

/// Running totals of an aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Collection cycles run.
    pub collections: u64,
    /// Contributions received from workers.
    pub collected: u64,
    /// Contributions dropped at the queue bound.
    pub dropped: u64,
    /// Contributions applied to the world.
    pub applied: u64,
    /// Contributions whose target was gone or rejected at apply time.
    pub stale: u64,
}

/// What one collection cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Collection {
    /// Contributions drained from workers.
    pub collected: usize,
    /// Queue refill outcome.
    pub enqueued: Enqueued,
    /// Per-tick budget after the refill.
    pub per_tick: usize,
    /// Emitter changes, when a camera position is known.
    pub emitters: Option<EmitterChanges>,
}

/// What one aggregator tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorTick {
    /// Role after the tick.
    pub role: Role,
    /// Contributions applied this tick.
    pub applied: usize,
    /// Contributions skipped this tick.
    pub stale: usize,
    /// Present when this tick ran a collection cycle.
    pub collection: Option<Collection>,
}

/// Static settings for one aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Collection cadence and queue bound.
    pub throttle: ThrottleConfig,
    /// Emitter ranges.
    pub emitters: EmitterConfig,
    /// Cause label passed to the host with every application.
    pub damage_cause: String,
    /// Log debug-draw counts on each collection.
    pub debug: bool,
    /// Seed for the shuffle.
    pub seed: u64,
}

/// One aggregator instance.
pub struct Aggregator {
    id: InstanceId,
    role: Arc<RoleCell>,
    election: Arc<Election>,
    bus: Arc<MessageBus>,
    settings: AggregatorSettings,
    ticks: u64,
    update_count: u64,
    queue: PendingQueue,
    rng: SmallRng,
    emitters: EmitterSet,
    camera: Option<DVec3>,
    stats: AggregatorStats,
    init_handler: Option<HandlerId>,
    inhibit_handler: Option<HandlerId>,
}

impl core::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Aggregator")
            .field("id", &self.id)
            .field("role", &self.role.load())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Load an instance. It does nothing until ticked.
    pub fn new(settings: AggregatorSettings, bus: Arc<MessageBus>, election: Arc<Election>) -> Self {
        let id = InstanceId::new();
        debug!(instance = %id, "aggregator loaded");
        Self {
            id,
            role: Arc::new(RoleCell::new(Role::Uninitialized)),
            election,
            bus,
            queue: PendingQueue::new(settings.throttle.max_queue),
            rng: SmallRng::seed_from_u64(settings.seed),
            emitters: EmitterSet::new(settings.emitters.clone()),
            settings,
            ticks: 0,
            update_count: 0,
            camera: None,
            stats: AggregatorStats::default(),
            init_handler: None,
            inhibit_handler: None,
        }
    }

    /// Identity of this instance.
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.role.load()
    }

    /// Whether this is the active instance.
    pub fn is_active(&self) -> bool {
        self.role() == Role::Active
    }

    /// Running totals.
    pub const fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Contributions waiting to be applied.
    pub const fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// Live particle emitters.
    pub const fn emitters(&self) -> &EmitterSet {
        &self.emitters
    }

    /// Record where the camera is, for emitter range checks.
    pub const fn observe_camera(&mut self, position: DVec3) {
        self.camera = Some(position);
    }

    /// Move live emitters onto their blocks. Runs every frame.
    pub fn follow_emitters<H: EntityQuery + EffectHost>(&mut self, host: &H) -> usize {
        self.emitters.follow(host)
    }

    /// One simulation tick.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on the first tick when the collection
    /// period is not a multiple of the worker interval.
    pub fn tick<H>(&mut self, host: &H) -> Result<AggregatorTick, ConfigError>
    where
        H: DamageSink + EntityQuery + EffectHost,
    {
        self.ticks = self.ticks.saturating_add(1);
        let mut out = AggregatorTick {
            role: self.role(),
            applied: 0,
            stale: 0,
            collection: None,
        };

        match out.role {
            Role::Uninitialized => {
                self.initialize()?;
                out.role = self.role();
                return Ok(out);
            }
            Role::AwaitingElection => {
                self.elect();
                out.role = self.role();
                return Ok(out);
            }
            Role::Disabled => {
                self.release_handlers();
                return Ok(out);
            }
            Role::Active => {}
        }

        (out.applied, out.stale) = self.process_queue(host);

        self.update_count = self.update_count.saturating_add(1);
        if self.update_count.checked_rem(self.settings.throttle.update_rate) == Some(0) {
            out.collection = Some(self.collect(host));
        }
        Ok(out)
    }

    /// Unregister from the bus and stop emitters.
    pub fn close<H: EffectHost>(&mut self, host: &H) {
        self.release_handlers();
        self.emitters.clear(host);
    }

    // -----------------------------------------------------------------------
    // Election
    // -----------------------------------------------------------------------

    fn initialize(&mut self) -> Result<(), ConfigError> {
        let throttle = &self.settings.throttle;
        if throttle.worker_interval == 0
            || throttle.update_rate == 0
            || throttle.update_rate.checked_rem(throttle.worker_interval) != Some(0)
        {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "collection period {} is not a multiple of worker interval {}",
                    throttle.update_rate, throttle.worker_interval
                ),
            });
        }

        let bus: Weak<MessageBus> = Arc::downgrade(&self.bus);
        self.init_handler = Some(self.bus.register(Topic::Init, move |msg| {
            if let Message::Init(true) = msg {
                if let Some(bus) = bus.upgrade() {
                    bus.publish(&mut Message::InitInhibit(true));
                }
            }
        }));

        let role = Arc::clone(&self.role);
        let id = self.id;
        self.inhibit_handler = Some(self.bus.register(Topic::InitInhibit, move |msg| {
            if let Message::InitInhibit(true) = msg {
                if role.transition(Role::AwaitingElection, Role::Disabled) {
                    debug!(instance = %id, "aggregator inhibited");
                }
            }
        }));

        self.role.store(Role::AwaitingElection);
        Ok(())
    }

    fn elect(&mut self) {
        if let Some(id) = self.inhibit_handler.take() {
            self.bus.unregister(id);
        }
        let winner = self.election.declare(self.id);
        if winner == self.id && self.role.transition(Role::AwaitingElection, Role::Active) {
            info!(instance = %self.id, "aggregator elected");
            self.bus.publish(&mut Message::Init(true));
        } else {
            self.role.store(Role::Disabled);
            debug!(instance = %self.id, %winner, "aggregator stands down");
        }
    }

    fn release_handlers(&mut self) {
        for id in [self.init_handler.take(), self.inhibit_handler.take()]
            .into_iter()
            .flatten()
        {
            self.bus.unregister(id);
        }
    }

    // -----------------------------------------------------------------------
    // Apply and collect
    // -----------------------------------------------------------------------

    fn process_queue<H: DamageSink>(&mut self, host: &H) -> (usize, usize) {
        let mut applied = 0_usize;
        let mut stale = 0_usize;
        let cause = self.settings.damage_cause.as_str();
        for c in self.queue.take_tick() {
            match host.apply_damage(c.target, c.amount, cause, true) {
                Ok(()) => applied = applied.saturating_add(1),
                Err(e) => {
                    stale = stale.saturating_add(1);
                    trace!(target_entity = ?c.target, error = %e, "contribution skipped");
                }
            }
        }
        self.stats.applied = self.stats.applied.saturating_add(applied as u64);
        self.stats.stale = self.stats.stale.saturating_add(stale as u64);
        (applied, stale)
    }

    fn collect<H: EntityQuery + EffectHost>(&mut self, host: &H) -> Collection {
        let _timer = ScopeTimer::start("damage collection", Duration::from_millis(1));

        let mut damage = DamageBatch::new();
        self.bus.publish(&mut Message::CollectDamage(&mut damage));

        let mut requested = EmitterBatch::new();
        self.bus.publish(&mut Message::CollectEmitters(&mut requested));
        let emitters = self
            .camera
            .map(|camera| self.emitters.reconcile(host, &requested, camera, &mut self.rng));

        let mut batch: Vec<DamageContribution> = damage
            .into_iter()
            .map(|(target, amount)| DamageContribution { target, amount })
            .collect();
        batch.shuffle(&mut self.rng);
        let collected = batch.len();
        let enqueued = self.queue.refill(batch, self.settings.throttle.update_rate);
        if enqueued.dropped > 0 {
            warn!(
                dropped = enqueued.dropped,
                capacity = self.settings.throttle.max_queue,
                "damage queue full, contributions dropped"
            );
        }

        self.stats.collections = self.stats.collections.saturating_add(1);
        self.stats.collected = self.stats.collected.saturating_add(collected as u64);
        self.stats.dropped = self.stats.dropped.saturating_add(enqueued.dropped as u64);

        if self.settings.debug {
            let mut lines: Vec<Line> = Vec::new();
            self.bus.publish(&mut Message::DebugDraw(&mut lines));
            debug!(
                collected,
                emitters = requested.len(),
                lines = lines.len(),
                queued = self.queue.len(),
                "collection"
            );
        }

        Collection {
            collected,
            enqueued,
            per_tick: self.queue.per_tick(),
            emitters,
        }
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.release_handlers();
    }
}
