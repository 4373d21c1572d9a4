//! End-to-end scenarios for a hazard session over the in-memory world.
//!
//! Each scenario builds a [`SimWorld`] with one planet, attaches it as a
//! hazard source and drives the session tick by tick, waiting for
//! background scans where the scenario depends on their results.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::cast_precision_loss
)]

use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use atmos_core::aggregator::Role;
use atmos_core::bus::{Message, Topic};
use atmos_core::config::HazardConfig;
use atmos_core::runner::{FixedCamera, RunControl, RunEndReason, run_session};
use atmos_core::session::{HazardSession, SessionTick};
use atmos_types::{Camera, DVec3, EntityKey, GridSize, HazardSource, SourceId};
use atmos_world::SimWorld;

const RADIUS: f64 = 1_000.0;

fn planet(world: &SimWorld) -> HazardSource {
    HazardSource {
        id: SourceId::new(),
        name: "AcidMoon".to_owned(),
        center: DVec3::ZERO,
        radius: RADIUS,
        atmosphere_altitude: 500.0,
        volume: Some(world.add_volume(DVec3::ZERO, RADIUS, 0)),
    }
}

fn config(update_rate: u64, max_queue: usize) -> HazardConfig {
    let mut config = HazardConfig::default();
    config.throttle.update_rate = update_rate;
    config.throttle.character_interval = update_rate;
    config.throttle.max_queue = max_queue;
    config.session.tick_interval_ms = 0;
    config.rain.pool_capacity = 1_024;
    config.rain.pool_growth = 1_024;
    config
}

/// Floating objects well above the surface, each worth one acid-rain hit.
fn scatter_floating(world: &SimWorld, n: usize) -> Vec<EntityKey> {
    (0..n)
        .map(|i| world.add_floating_object(DVec3::new(i as f64 * 4.0, RADIUS + 100.0, 0.0)))
        .collect()
}

/// Tick `n` times, collecting every tick summary.
fn run_ticks(session: &mut HazardSession<SimWorld>, n: u64) -> Vec<SessionTick> {
    (0..n).map(|_| session.tick().unwrap()).collect()
}

fn count_active(session: &HazardSession<SimWorld>) -> usize {
    session
        .roles()
        .iter()
        .filter(|(_, role)| *role == Role::Active)
        .count()
}

#[tokio::test]
async fn copies_loaded_together_elect_exactly_one() {
    let world = Arc::new(SimWorld::new());
    let mut cfg = config(60, 100);
    cfg.session.aggregator_copies = 4;
    let mut session = HazardSession::new(world, cfg).unwrap();

    run_ticks(&mut session, 3);
    assert_eq!(count_active(&session), 1);
    assert!(
        session
            .roles()
            .iter()
            .all(|(_, r)| matches!(r, Role::Active | Role::Disabled))
    );
}

#[tokio::test]
async fn copy_loaded_later_stays_disabled() {
    let world = Arc::new(SimWorld::new());
    let mut cfg = config(60, 100);
    cfg.session.aggregator_copies = 1;
    let mut session = HazardSession::new(world, cfg).unwrap();
    run_ticks(&mut session, 5);
    let first = session.roles()[0].0;

    let late = session.load_aggregator();
    run_ticks(&mut session, 5);

    let roles = session.roles();
    assert_eq!(roles, vec![(first, Role::Active), (late, Role::Disabled)]);
}

#[tokio::test]
async fn disabled_copy_never_requests_collection() {
    let world = Arc::new(SimWorld::new());
    let mut cfg = config(60, 100);
    cfg.session.aggregator_copies = 2;
    let mut session = HazardSession::new(Arc::clone(&world), cfg).unwrap();
    assert!(session.attach_source(planet(&world)));

    let requests = Arc::new(AtomicU64::new(0));
    {
        let requests = Arc::clone(&requests);
        session.bus().register(Topic::CollectDamage, move |msg| {
            if matches!(msg, Message::CollectDamage(_)) {
                requests.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    run_ticks(&mut session, 242);
    session.settle().await;

    let aggregators = session.aggregators();
    let active: Vec<_> = aggregators.iter().filter(|a| a.role() == Role::Active).collect();
    let disabled: Vec<_> = aggregators
        .iter()
        .filter(|a| a.role() == Role::Disabled)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(disabled.len(), 1);

    let collections = active[0].stats().collections;
    assert!(collections >= 3, "only {collections} collections in four periods");
    assert_eq!(requests.load(Ordering::Relaxed), collections);
    assert_eq!(disabled[0].stats().collections, 0);
}

#[tokio::test]
async fn one_contribution_is_applied_exactly_once() {
    let world = Arc::new(SimWorld::new());
    let source = planet(&world);
    let grid = world.add_grid(DVec3::new(0.0, RADIUS + 50.0, 0.0), GridSize::Large, true);
    let block = world.add_block(grid, DVec3::ZERO, DVec3::ONE, true).unwrap();

    let mut session = HazardSession::new(Arc::clone(&world), config(60, 100)).unwrap();
    assert!(session.attach_source(source));

    // The worker's counter reaches the collection period on tick 60.
    let ticks = run_ticks(&mut session, 60);
    assert_eq!(ticks.iter().map(|t| t.scans_started).sum::<usize>(), 1);
    session.settle().await;
    assert_eq!(session.workers()[0].accumulator().get(block), Some(10.0));

    // Election takes two ticks, so the first collection lands on tick 62.
    let ticks = run_ticks(&mut session, 2);
    assert_eq!(ticks[1].collected, 1);
    assert!(session.workers()[0].accumulator().is_empty());
    assert!(world.damage_events().is_empty());

    let ticks = run_ticks(&mut session, 57);
    assert_eq!(ticks.iter().map(|t| t.applied).sum::<usize>(), 1);
    assert_eq!(ticks[0].applied, 1);

    let events = world.damage_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].target, block);
    assert_eq!(events[0].amount, 10.0);
    assert_eq!(events[0].cause, "Environment");
    assert_eq!(world.integrity(block), Some(90.0));
}

#[tokio::test]
async fn queue_bound_drops_excess_and_applies_one_per_tick() {
    let world = Arc::new(SimWorld::new());
    let source = planet(&world);
    scatter_floating(&world, 12);

    let mut session = HazardSession::new(Arc::clone(&world), config(60, 5)).unwrap();
    session.attach_source(source);

    run_ticks(&mut session, 60);
    session.settle().await;
    let ticks = run_ticks(&mut session, 2);
    assert_eq!(ticks[1].collected, 12);
    assert_eq!(ticks[1].dropped, 7);

    let ticks = run_ticks(&mut session, 10);
    assert!(ticks.iter().all(|t| t.applied <= 1));
    assert_eq!(ticks.iter().map(|t| t.applied).sum::<usize>(), 5);

    let stats = session.damage_stats();
    assert_eq!(stats.dropped, 7);
    assert_eq!(stats.applied, 5);
    assert_eq!(world.damage_events().len(), 5);
}

#[tokio::test]
async fn application_is_spread_over_one_period() {
    let world = Arc::new(SimWorld::new());
    let source = planet(&world);
    scatter_floating(&world, 25);

    let mut session = HazardSession::new(Arc::clone(&world), config(10, 1_000)).unwrap();
    session.attach_source(source);

    run_ticks(&mut session, 10);
    session.settle().await;
    let ticks = run_ticks(&mut session, 2);
    assert_eq!(ticks[1].collected, 25);

    // ceil(25 / 10) = 3 per tick; the batch drains before the next
    // collection.
    let ticks = run_ticks(&mut session, 10);
    assert!(ticks.iter().all(|t| t.applied <= 3));
    assert_eq!(ticks.iter().map(|t| t.applied).sum::<usize>(), 25);
}

#[tokio::test]
async fn target_removed_before_application_is_skipped() {
    let world = Arc::new(SimWorld::new());
    let source = planet(&world);
    let objects = scatter_floating(&world, 2);

    let mut session = HazardSession::new(Arc::clone(&world), config(10, 100)).unwrap();
    session.attach_source(source);

    run_ticks(&mut session, 10);
    session.settle().await;
    run_ticks(&mut session, 2);
    assert!(world.remove(objects[0]));

    let ticks = run_ticks(&mut session, 2);
    assert_eq!(ticks.iter().map(|t| t.applied).sum::<usize>(), 1);
    assert_eq!(ticks.iter().map(|t| t.stale).sum::<usize>(), 1);
    assert!(world.damage_events().iter().all(|e| e.target == objects[1]));
}

#[tokio::test]
async fn bounded_run_draws_rain_near_the_surface() {
    let world = Arc::new(SimWorld::new());
    let source = planet(&world);
    let mut cfg = config(60, 100);
    cfg.session.max_ticks = 30;
    cfg.rain.line_count = 100;
    cfg.rain.lateral_spread = 20;
    let mut session = HazardSession::new(Arc::clone(&world), cfg).unwrap();
    session.attach_source(source);

    let position = DVec3::new(0.0, RADIUS + 5.0, 0.0);
    let camera = Camera::look_at(position, position + DVec3::Y, DVec3::Z, FRAC_PI_2, 1.0);
    let summary = run_session(&mut session, &mut FixedCamera(camera), &RunControl::new())
        .await
        .unwrap();

    assert_eq!(summary.end_reason, RunEndReason::MaxTicksReached);
    assert_eq!(summary.ticks, 30);
    assert!(summary.probes_drawn > 0);
    assert_eq!(summary.roles.len(), 2);
    assert_eq!(
        summary
            .roles
            .iter()
            .filter(|(_, r)| *r == Role::Active)
            .count(),
        1
    );
}
