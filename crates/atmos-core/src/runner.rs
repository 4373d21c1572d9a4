//! Bounded session loop.
//!
//! [`run_session`] drives a [`HazardSession`] the way a host engine would:
//! one simulation tick every `tick_interval_ms`, one rendered frame per tick
//! when a camera is available, until `max_ticks` is reached or a stop is
//! requested through [`RunControl`]. The final [`SessionSummary`] carries the
//! counters a caller needs to judge the run.

use std::sync::atomic::{AtomicBool, Ordering};

use atmos_types::{Camera, InstanceId};
use atmos_world::HostWorld;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::aggregator::Role;
use crate::session::{HazardSession, SessionError};

/// Errors that can end a run early.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A session tick failed.
    #[error("session error: {source}")]
    Session {
        /// The underlying session error.
        #[from]
        source: SessionError,
    },
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEndReason {
    /// Reached `session.max_ticks`.
    MaxTicksReached,
    /// [`RunControl::request_stop`] was called.
    StopRequested,
}

/// Stop flag shared between the loop and whoever may end it.
#[derive(Debug, Default)]
pub struct RunControl {
    stop_requested: AtomicBool,
}

impl RunControl {
    /// A control with no stop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop before its next tick.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }
}

/// Supplies the camera for each rendered frame.
pub trait CameraFeed: Send {
    /// Camera for the frame after `tick`, or `None` to skip rendering.
    fn camera(&mut self, tick: u64) -> Option<Camera>;
}

/// A camera that never moves.
#[derive(Debug, Clone, Copy)]
pub struct FixedCamera(pub Camera);

impl CameraFeed for FixedCamera {
    fn camera(&mut self, _tick: u64) -> Option<Camera> {
        Some(self.0)
    }
}

/// No rendering at all; useful for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCamera;

impl CameraFeed for NoCamera {
    fn camera(&mut self, _tick: u64) -> Option<Camera> {
        None
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Why the loop stopped.
    pub end_reason: RunEndReason,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end.
    pub finished_at: DateTime<Utc>,
    /// Ticks run by this call.
    pub ticks: u64,
    /// Contributions applied to the world.
    pub damage_applied: u64,
    /// Contributions skipped because the target was gone.
    pub damage_stale: u64,
    /// Contributions dropped at the queue bound.
    pub dropped: u64,
    /// Rain probes handed to the renderer.
    pub probes_drawn: u64,
    /// Final aggregator roles, in load order.
    pub roles: Vec<(InstanceId, Role)>,
}

/// Run `session` until `session.max_ticks` (0 means unbounded) or until
/// `control` asks it to stop. In-flight scans are awaited before
/// returning.
///
/// # Errors
///
/// Returns [`RunnerError`] if a tick fails.
pub async fn run_session<H: HostWorld>(
    session: &mut HazardSession<H>,
    feed: &mut dyn CameraFeed,
    control: &RunControl,
) -> Result<SessionSummary, RunnerError> {
    let started_at = Utc::now();
    let max_ticks = session.config().session.max_ticks;
    let interval_ms = session.config().session.tick_interval_ms;
    let first_tick = session.ticks();
    let probes_before = session.probes_drawn();

    info!(max_ticks, tick_interval_ms = interval_ms, "hazard run starting");

    let end_reason = loop {
        if control.is_stop_requested() {
            info!("stop requested");
            break RunEndReason::StopRequested;
        }

        let tick = session.tick()?;
        if let Some(camera) = feed.camera(tick.tick) {
            session.draw(&camera);
        }

        if max_ticks > 0 && tick.tick.saturating_sub(first_tick) >= max_ticks {
            info!(tick = tick.tick, max_ticks, "tick limit reached");
            break RunEndReason::MaxTicksReached;
        }

        if interval_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(interval_ms)).await;
        } else {
            tokio::task::yield_now().await;
        }
    };

    session.settle().await;
    let stats = session.damage_stats();
    let summary = SessionSummary {
        end_reason,
        started_at,
        finished_at: Utc::now(),
        ticks: session.ticks().saturating_sub(first_tick),
        damage_applied: stats.applied,
        damage_stale: stats.stale,
        dropped: stats.dropped,
        probes_drawn: session.probes_drawn().saturating_sub(probes_before),
        roles: session.roles(),
    };
    log_session_end(&summary);
    Ok(summary)
}

/// Log the end of a run.
pub fn log_session_end(summary: &SessionSummary) {
    let elapsed_ms = summary
        .finished_at
        .signed_duration_since(summary.started_at)
        .num_milliseconds();
    info!(
        reason = ?summary.end_reason,
        ticks = summary.ticks,
        damage_applied = summary.damage_applied,
        dropped = summary.dropped,
        probes_drawn = summary.probes_drawn,
        elapsed_ms,
        "hazard run ended"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use atmos_world::SimWorld;

    use super::*;
    use crate::config::HazardConfig;

    fn config(max_ticks: u64) -> HazardConfig {
        let mut config = HazardConfig::default();
        config.session.max_ticks = max_ticks;
        config.session.tick_interval_ms = 0;
        config
    }

    #[tokio::test]
    async fn stops_at_tick_limit() {
        let world = Arc::new(SimWorld::new());
        let mut session = HazardSession::new(world, config(25)).unwrap();
        let summary = run_session(&mut session, &mut NoCamera, &RunControl::new())
            .await
            .unwrap();
        assert_eq!(summary.end_reason, RunEndReason::MaxTicksReached);
        assert_eq!(summary.ticks, 25);
        assert_eq!(summary.probes_drawn, 0);
        assert!(summary.finished_at >= summary.started_at);
    }

    #[tokio::test]
    async fn stop_request_wins_before_first_tick() {
        let world = Arc::new(SimWorld::new());
        let mut session = HazardSession::new(world, config(0)).unwrap();
        let control = RunControl::new();
        control.request_stop();
        let summary = run_session(&mut session, &mut NoCamera, &control)
            .await
            .unwrap();
        assert_eq!(summary.end_reason, RunEndReason::StopRequested);
        assert_eq!(summary.ticks, 0);
    }
}
