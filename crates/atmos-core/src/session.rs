//! A hazard session: the aggregators, workers and rain generator sharing
//! one host world and one message bus.
//!
//! The host drives the session with two calls. [`HazardSession::tick`] runs
//! once per simulation step and never waits on background work.
//! [`HazardSession::draw`] runs once per rendered frame and returns the
//! probes to draw.

use std::sync::Arc;

use atmos_types::{Camera, HazardSource, InstanceId, SourceId};
use atmos_world::{DamageRules, HostWorld};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::aggregator::{Aggregator, AggregatorSettings, AggregatorStats, Election, Role};
use crate::bus::MessageBus;
use crate::config::{ConfigError, HazardConfig};
use crate::frustum::{DrawBatch, FrameReport, FrustumLineGenerator};
use crate::worker::{HazardWorker, WorkerSettings, WorkerTick};

/// Errors raised while setting up or ticking a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The configuration failed validation.
    #[error("invalid hazard configuration: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: ConfigError,
    },

    /// Sessions spawn scans on a tokio runtime and none was entered.
    #[error("hazard session must be created inside a tokio runtime: {reason}")]
    NoRuntime {
        /// Why no runtime handle was available.
        reason: String,
    },
}

/// What one session tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTick {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Contributions applied.
    pub applied: usize,
    /// Contributions skipped because their target was gone.
    pub stale: usize,
    /// Contributions collected, on collection ticks.
    pub collected: usize,
    /// Contributions dropped at the queue bound.
    pub dropped: usize,
    /// Worker scans launched.
    pub scans_started: usize,
    /// Workers still busy with the previous scan.
    pub scans_busy: usize,
}

/// What one session frame did.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFrame {
    /// Rain sampling outcome.
    pub rain: FrameReport,
    /// Emitters stopped because their block disappeared.
    pub emitters_lost: usize,
    /// Probes to draw.
    pub batch: DrawBatch,
}

/// One running hazard simulation.
pub struct HazardSession<H: HostWorld> {
    config: HazardConfig,
    host: Arc<H>,
    bus: Arc<MessageBus>,
    election: Arc<Election>,
    rules: Arc<DamageRules>,
    runtime: Handle,
    aggregators: Vec<Aggregator>,
    workers: Vec<HazardWorker<H>>,
    sources: Vec<HazardSource>,
    rain: FrustumLineGenerator,
    ticks: u64,
    probes_drawn: u64,
}

impl<H: HostWorld> core::fmt::Debug for HazardSession<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HazardSession")
            .field("ticks", &self.ticks)
            .field("aggregators", &self.aggregators.len())
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}

impl<H: HostWorld> HazardSession<H> {
    /// Validate `config` and load `session.aggregator_copies` aggregators.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if validation fails and
    /// [`SessionError::NoRuntime`] outside a tokio runtime.
    pub fn new(host: Arc<H>, config: HazardConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| SessionError::NoRuntime {
            reason: e.to_string(),
        })?;
        let rain = FrustumLineGenerator::new(config.rain.clone(), config.session.seed);
        let mut session = Self {
            rules: Arc::new(config.rules.clone()),
            config,
            host,
            bus: Arc::new(MessageBus::new()),
            election: Arc::new(Election::new()),
            runtime,
            aggregators: Vec::new(),
            workers: Vec::new(),
            sources: Vec::new(),
            rain,
            ticks: 0,
            probes_drawn: 0,
        };
        for _ in 0..session.config.session.aggregator_copies {
            session.load_aggregator();
        }
        info!(
            aggregators = session.aggregators.len(),
            update_rate = session.config.throttle.update_rate,
            "hazard session started"
        );
        Ok(session)
    }

    /// Load another aggregator copy. It joins the election on its second
    /// tick and stands down if one is already active.
    pub fn load_aggregator(&mut self) -> InstanceId {
        let n = self.aggregators.len() as u64;
        let settings = AggregatorSettings {
            throttle: self.config.throttle.clone(),
            emitters: self.config.emitters.clone(),
            damage_cause: self.config.session.damage_cause.clone(),
            debug: self.config.session.debug,
            seed: self.config.session.seed.wrapping_add(n),
        };
        let aggregator =
            Aggregator::new(settings, Arc::clone(&self.bus), Arc::clone(&self.election));
        let id = aggregator.id();
        self.aggregators.push(aggregator);
        id
    }

    /// Attach a worker for `source` if its name passes the admission prefix.
    /// Returns whether it was attached.
    pub fn attach_source(&mut self, source: HazardSource) -> bool {
        let prefix = self.config.session.source_name_prefix.as_str();
        if !source.name.starts_with(prefix) {
            debug!(name = %source.name, prefix, "hazard source not admitted");
            return false;
        }
        let throttle = &self.config.throttle;
        let settings = WorkerSettings {
            update_rate: throttle.update_rate,
            worker_interval: throttle.worker_interval,
            character_interval: throttle.character_interval,
            debug: self.config.session.debug,
            seed: self
                .config
                .session
                .seed
                .wrapping_add(self.workers.len() as u64)
                .rotate_left(17),
        };
        info!(source = %source.id, name = %source.name, "hazard source attached");
        self.workers.push(HazardWorker::new(
            source.clone(),
            Arc::clone(&self.host),
            Arc::clone(&self.rules),
            settings,
            Arc::clone(&self.bus),
            self.runtime.clone(),
        ));
        self.sources.push(source);
        true
    }

    /// Remove a source and its worker. Pending damage it had not handed over
    /// is discarded.
    pub fn detach_source(&mut self, id: SourceId) -> bool {
        let before = self.workers.len();
        self.workers.retain(|w| w.source_id() != id);
        self.sources.retain(|s| s.id != id);
        self.workers.len() != before
    }

    /// One simulation tick.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if an aggregator rejects the
    /// throttle settings on its first tick.
    pub fn tick(&mut self) -> Result<SessionTick, SessionError> {
        self.ticks = self.ticks.saturating_add(1);
        let mut out = SessionTick {
            tick: self.ticks,
            ..SessionTick::default()
        };

        for aggregator in &mut self.aggregators {
            let t = aggregator.tick(&*self.host)?;
            out.applied = out.applied.saturating_add(t.applied);
            out.stale = out.stale.saturating_add(t.stale);
            if let Some(c) = t.collection {
                out.collected = out.collected.saturating_add(c.collected);
                out.dropped = out.dropped.saturating_add(c.enqueued.dropped);
            }
        }

        if self.ticks.checked_rem(self.config.throttle.worker_interval) == Some(0) {
            for worker in &mut self.workers {
                match worker.tick() {
                    WorkerTick::Started { .. } => {
                        out.scans_started = out.scans_started.saturating_add(1);
                    }
                    WorkerTick::Busy => out.scans_busy = out.scans_busy.saturating_add(1),
                    WorkerTick::Idle => {}
                }
            }
        }
        Ok(out)
    }

    /// One rendered frame seen from `camera`.
    pub fn draw(&mut self, camera: &Camera) -> SessionFrame {
        let rain = self.rain.frame(&*self.host, camera, &self.sources);

        let mut emitters_lost = 0_usize;
        for aggregator in self.aggregators.iter_mut().filter(|a| a.is_active()) {
            aggregator.observe_camera(camera.position);
            let lost = aggregator.follow_emitters(&*self.host);
            emitters_lost = emitters_lost.saturating_add(lost);
        }

        let batch = self.rain.draw_batch();
        self.probes_drawn = self.probes_drawn.saturating_add(batch.probes.len() as u64);
        SessionFrame {
            rain,
            emitters_lost,
            batch,
        }
    }

    /// Wait for every in-flight scan to finish.
    pub async fn settle(&mut self) {
        for worker in &mut self.workers {
            worker.wait_for_scan().await;
        }
    }

    /// Unregister every aggregator and worker and stop emitters.
    pub fn shutdown(&mut self) {
        for aggregator in &mut self.aggregators {
            aggregator.close(&*self.host);
        }
        for worker in &mut self.workers {
            worker.close();
        }
        info!(ticks = self.ticks, "hazard session stopped");
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The host world.
    pub const fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// The session's configuration.
    pub const fn config(&self) -> &HazardConfig {
        &self.config
    }

    /// The session's message bus.
    pub const fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Ticks run so far.
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Probes handed to the renderer so far.
    pub const fn probes_drawn(&self) -> u64 {
        self.probes_drawn
    }

    /// Attached sources.
    pub fn sources(&self) -> &[HazardSource] {
        &self.sources
    }

    /// Workers, one per attached source.
    pub fn workers(&self) -> &[HazardWorker<H>] {
        &self.workers
    }

    /// Loaded aggregators, in load order.
    pub fn aggregators(&self) -> &[Aggregator] {
        &self.aggregators
    }

    /// Role of every loaded aggregator, in load order.
    pub fn roles(&self) -> Vec<(InstanceId, Role)> {
        self.aggregators.iter().map(|a| (a.id(), a.role())).collect()
    }

    /// The active aggregator, once elected.
    pub fn active_aggregator(&self) -> Option<&Aggregator> {
        self.aggregators.iter().find(|a| a.is_active())
    }

    /// Totals summed over every aggregator.
    pub fn damage_stats(&self) -> AggregatorStats {
        self.aggregators
            .iter()
            .map(Aggregator::stats)
            .fold(AggregatorStats::default(), |acc, s| AggregatorStats {
                collections: acc.collections.saturating_add(s.collections),
                collected: acc.collected.saturating_add(s.collected),
                dropped: acc.dropped.saturating_add(s.dropped),
                applied: acc.applied.saturating_add(s.applied),
                stale: acc.stale.saturating_add(s.stale),
            })
    }

    /// The rain generator.
    pub const fn rain(&self) -> &FrustumLineGenerator {
        &self.rain
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use atmos_types::DVec3;
    use atmos_world::SimWorld;

    use super::*;

    fn source(name: &str) -> HazardSource {
        HazardSource {
            id: SourceId::new(),
            name: name.to_owned(),
            center: DVec3::ZERO,
            radius: 1_000.0,
            atmosphere_altitude: 500.0,
            volume: None,
        }
    }

    #[test]
    fn requires_a_runtime() {
        let world = Arc::new(SimWorld::new());
        let err = HazardSession::new(world, HazardConfig::default()).unwrap_err();
        assert!(matches!(err, SessionError::NoRuntime { .. }));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let world = Arc::new(SimWorld::new());
        let mut config = HazardConfig::default();
        config.throttle.update_rate = 65;
        let err = HazardSession::new(world, config).unwrap_err();
        assert!(matches!(err, SessionError::Config { .. }));
    }

    #[tokio::test]
    async fn admission_uses_name_prefix() {
        let world = Arc::new(SimWorld::new());
        let mut config = HazardConfig::default();
        config.session.source_name_prefix = "Acid".to_owned();
        let mut session = HazardSession::new(world, config).unwrap();

        assert!(session.attach_source(source("AcidMoon")));
        assert!(!session.attach_source(source("EarthLike")));
        assert_eq!(session.sources().len(), 1);
        assert_eq!(session.workers().len(), 1);

        let id = session.sources()[0].id;
        assert!(session.detach_source(id));
        assert!(session.workers().is_empty());
    }

    #[tokio::test]
    async fn loads_configured_copies_and_elects_one() {
        let world = Arc::new(SimWorld::new());
        let mut config = HazardConfig::default();
        config.session.aggregator_copies = 3;
        let mut session = HazardSession::new(world, config).unwrap();
        session.tick().unwrap();
        session.tick().unwrap();

        let roles = session.roles();
        assert_eq!(roles.len(), 3);
        assert_eq!(roles.iter().filter(|(_, r)| *r == Role::Active).count(), 1);
        assert_eq!(roles.iter().filter(|(_, r)| *r == Role::Disabled).count(), 2);
        assert!(session.active_aggregator().is_some());
    }
}
