//! Headless driver for the atmospheric hazard simulation.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `atmos-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build the demo world and its hazard source
//! 4. Start the hazard session and attach the source
//! 5. Run the bounded session loop, stopping early on Ctrl-C
//! 6. Log the summary

mod demo;
mod error;

use std::path::Path;
use std::sync::Arc;

use atmos_core::config::{HazardConfig, LoggingConfig};
use atmos_core::runner::{self, RunControl};
use atmos_core::session::HazardSession;
use atmos_world::SimWorld;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::demo::OrbitCamera;
use crate::error::EngineError;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the run itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging)?;
    info!(
        seed = config.session.seed,
        update_rate = config.throttle.update_rate,
        max_ticks = config.session.max_ticks,
        "atmos-engine starting"
    );

    // 3. Build the demo world.
    let world = Arc::new(SimWorld::new());
    let source = demo::build(&world).map_err(EngineError::from)?;

    // 4. Start the session.
    let mut session = HazardSession::new(Arc::clone(&world), config).map_err(EngineError::from)?;
    if !session.attach_source(source) {
        warn!("demo planet rejected by source_name_prefix, running without hazards");
    }

    // 5. Run until the tick limit or Ctrl-C.
    let control = Arc::new(RunControl::new());
    {
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping");
                control.request_stop();
            }
        });
    }
    let mut camera = OrbitCamera::default();
    let summary = runner::run_session(&mut session, &mut camera, &control)
        .await
        .map_err(EngineError::from)?;
    session.shutdown();

    // 6. Log the summary.
    info!(
        end_reason = ?summary.end_reason,
        ticks = summary.ticks,
        damage_applied = summary.damage_applied,
        damage_stale = summary.damage_stale,
        dropped = summary.dropped,
        destroyed = world.damage_events().iter().filter(|e| e.destroyed).count(),
        "atmos-engine shutdown complete"
    );
    Ok(())
}

/// Load `atmos-config.yaml` from the working directory, or defaults when it
/// is absent.
fn load_config() -> Result<HazardConfig, EngineError> {
    let config_path = Path::new("atmos-config.yaml");
    if config_path.exists() {
        Ok(HazardConfig::from_file(config_path)?)
    } else {
        Ok(HazardConfig::default())
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_logging(logging: &LoggingConfig) -> Result<(), EngineError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| EngineError::Logging {
        message: e.to_string(),
    })
}
